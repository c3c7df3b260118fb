//! Text fields for WebP, stored as attributes of `rdf:Description` in the
//! RIFF `XMP ` chunk.
//!
//! Only the `XMP ` chunk (and the `VP8X` header flags) are rewritten; the
//! bitstream chunks are copied through untouched.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use img_parts::riff::{RiffChunk, RiffContent};
use img_parts::webp::{WebP, CHUNK_VP8, CHUNK_VP8L, CHUNK_VP8X, CHUNK_XMP};
use img_parts::Bytes;
use roxmltree::{Document, Node};

use super::MetadataError;

const FLAG_XMP: u8 = 0x04;
const FLAG_ALPHA: u8 = 0x10;

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
const TEXT_NS: &str = "http://ns.photonote.org/text/1.0/";
const TEXT_PREFIX: &str = "pntext";

fn parse(data: Bytes) -> Result<WebP, MetadataError> {
    WebP::from_bytes(data).map_err(|err| MetadataError::Decode(err.to_string()))
}

fn chunk_data(chunk: &RiffChunk) -> &[u8] {
    match chunk.content().data() {
        Some(data) => data,
        None => &[],
    }
}

fn data_chunk(id: [u8; 4], data: Vec<u8>) -> RiffChunk {
    RiffChunk::new(id, RiffContent::Data(Bytes::from(data)))
}

/// Canvas size and alpha flag of a simple-format (`VP8 ` or `VP8L`) file.
fn bitstream_info(chunk: &RiffChunk) -> Option<(u32, u32, bool)> {
    let d = chunk_data(chunk);
    match chunk.id() {
        CHUNK_VP8L if d.len() >= 5 && d[0] == 0x2F => {
            let bits = u32::from_le_bytes([d[1], d[2], d[3], d[4]]);
            let width = (bits & 0x3FFF) + 1;
            let height = ((bits >> 14) & 0x3FFF) + 1;
            let alpha = (bits >> 28) & 1 == 1;
            Some((width, height, alpha))
        }
        CHUNK_VP8 if d.len() >= 10 && d[3..6] == [0x9D, 0x01, 0x2A] => {
            let width = u32::from(u16::from_le_bytes([d[6], d[7]]) & 0x3FFF);
            let height = u32::from(u16::from_le_bytes([d[8], d[9]]) & 0x3FFF);
            Some((width, height, false))
        }
        _ => None,
    }
}

/// Makes sure the file uses the extended layout and advertises XMP.
fn mark_xmp(chunks: &mut Vec<RiffChunk>) -> Result<(), MetadataError> {
    if let Some(header) = chunks.iter_mut().find(|chunk| chunk.id() == CHUNK_VP8X) {
        let mut data = chunk_data(header).to_vec();
        let flags = data
            .first_mut()
            .ok_or_else(|| MetadataError::Decode("short VP8X chunk".into()))?;
        *flags |= FLAG_XMP;
        *header = data_chunk(CHUNK_VP8X, data);
        return Ok(());
    }
    let (width, height, alpha) = chunks
        .first()
        .and_then(bitstream_info)
        .ok_or_else(|| MetadataError::Decode("unrecognised WebP bitstream".into()))?;
    if width == 0 || height == 0 {
        return Err(MetadataError::Decode("zero-sized WebP canvas".into()));
    }
    let mut data = vec![0u8; 10];
    data[0] = FLAG_XMP | if alpha { FLAG_ALPHA } else { 0 };
    data[4..7].copy_from_slice(&(width - 1).to_le_bytes()[..3]);
    data[7..10].copy_from_slice(&(height - 1).to_le_bytes()[..3]);
    chunks.insert(0, data_chunk(CHUNK_VP8X, data));
    Ok(())
}

fn xmp_text(chunk: &RiffChunk) -> Result<&str, MetadataError> {
    let text = std::str::from_utf8(chunk_data(chunk))
        .map_err(|err| MetadataError::Decode(format!("XMP packet is not UTF-8: {err}")))?;
    Ok(text.trim_start_matches('\u{feff}').trim_end_matches('\0'))
}

fn is_description(node: &Node) -> bool {
    node.is_element()
        && node.tag_name().namespace() == Some(RDF_NS)
        && node.tag_name().name() == "Description"
        && node.parent_element().is_some_and(|parent| {
            parent.tag_name().namespace() == Some(RDF_NS) && parent.tag_name().name() == "RDF"
        })
}

fn descriptions<'a, 'input>(doc: &'a Document<'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    doc.descendants().filter(is_description)
}

/// Text of a `dc:description` language alternative, preferring `x-default`.
fn dc_description(node: &Node) -> Option<String> {
    let property = node.children().find(|child| {
        child.tag_name().namespace() == Some(DC_NS) && child.tag_name().name() == "description"
    })?;
    let items: Vec<Node> = property
        .descendants()
        .filter(|item| item.tag_name().namespace() == Some(RDF_NS) && item.tag_name().name() == "li")
        .collect();
    items
        .iter()
        .find(|item| item.attribute((XML_NS, "lang")) == Some("x-default"))
        .or_else(|| items.first())
        .map(|item| item.text().unwrap_or_default().to_string())
}

pub(super) fn read_fields(data: &[u8]) -> Result<BTreeMap<String, String>, MetadataError> {
    let webp = parse(Bytes::copy_from_slice(data))?;
    let mut fields = BTreeMap::new();
    let Some(chunk) = webp.chunk_by_id(CHUNK_XMP) else {
        return Ok(fields);
    };
    let xml = xmp_text(chunk)?;
    let doc = Document::parse(xml).map_err(|err| MetadataError::Decode(err.to_string()))?;
    for node in descriptions(&doc) {
        for attr in node.attributes() {
            let key = match attr.namespace() {
                Some(TEXT_NS) => attr.name().to_string(),
                Some(RDF_NS) => continue,
                Some(uri) => match node.lookup_prefix(uri) {
                    Some(prefix) => format!("{prefix}:{}", attr.name()),
                    None => continue,
                },
                None => attr.name().to_string(),
            };
            fields.entry(key).or_insert_with(|| attr.value().to_string());
        }
        if let Some(text) = dc_description(&node) {
            fields.entry("dc:description".to_string()).or_insert(text);
        }
    }
    Ok(fields)
}

/// Sets `fields` in the XMP packet, carrying every other property forward.
pub(super) fn write_fields(data: Vec<u8>, fields: &[(&str, &str)]) -> Result<Vec<u8>, MetadataError> {
    let mut webp = parse(Bytes::from(data))?;
    let packet = match webp.chunk_by_id(CHUNK_XMP) {
        Some(chunk) => merge_packet(Some(xmp_text(chunk)?), fields)?,
        None => merge_packet(None, fields)?,
    };
    let chunks = webp.chunks_mut();
    mark_xmp(chunks)?;
    let xmp = data_chunk(CHUNK_XMP, packet.into_bytes());
    match chunks.iter_mut().find(|chunk| chunk.id() == CHUNK_XMP) {
        Some(chunk) => *chunk = xmp,
        None => chunks.push(xmp),
    }
    Ok(webp.encoder().bytes().to_vec())
}

fn merge_packet(existing: Option<&str>, fields: &[(&str, &str)]) -> Result<String, MetadataError> {
    let mut ours: Vec<(String, String)> = Vec::new();
    let mut rebuilt: Vec<String> = Vec::new();

    if let Some(xml) = existing {
        let doc = Document::parse(xml).map_err(|err| MetadataError::Decode(err.to_string()))?;
        let nodes: Vec<Node> = descriptions(&doc).collect();
        for node in &nodes {
            for attr in node.attributes() {
                if attr.namespace() == Some(TEXT_NS) && !ours.iter().any(|(k, _)| k == attr.name()) {
                    ours.push((attr.name().to_string(), attr.value().to_string()));
                }
            }
        }
        for (key, value) in fields {
            match ours.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value.to_string(),
                None => ours.push((key.to_string(), value.to_string())),
            }
        }
        for (i, node) in nodes.iter().enumerate() {
            let carried = if i == 0 { Some(ours.as_slice()) } else { None };
            rebuilt.push(rebuild_description(xml, node, carried));
        }
    } else {
        ours.extend(fields.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    }

    if rebuilt.is_empty() {
        rebuilt.push(format!(
            "<rdf:Description rdf:about=\"\" xmlns:{TEXT_PREFIX}=\"{TEXT_NS}\"{}/>",
            text_attributes(&ours)
        ));
    }

    let mut packet = String::new();
    packet.push_str("<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n");
    packet.push_str("<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n");
    let _ = writeln!(packet, " <rdf:RDF xmlns:rdf=\"{RDF_NS}\">");
    for description in rebuilt {
        let _ = writeln!(packet, "  {description}");
    }
    packet.push_str(" </rdf:RDF>\n</x:xmpmeta>\n<?xpacket end=\"w\"?>");
    Ok(packet)
}

fn text_attributes(fields: &[(String, String)]) -> String {
    let mut out = String::new();
    for (key, value) in fields {
        let _ = write!(out, " {TEXT_PREFIX}:{key}=\"{}\"", escape(value));
    }
    out
}

/// Re-emits one `rdf:Description`, dropping our text attributes unless
/// `carried` supplies the merged set for this element.
fn rebuild_description(xml: &str, node: &Node, carried: Option<&[(String, String)]>) -> String {
    let about = node.attribute((RDF_NS, "about")).unwrap_or("");
    let mut out = format!("<rdf:Description rdf:about=\"{}\"", escape(about));
    for ns in node.namespaces() {
        match ns.name() {
            Some("xml") | Some("rdf") | Some(TEXT_PREFIX) => {}
            Some(prefix) => {
                let _ = write!(out, " xmlns:{prefix}=\"{}\"", escape(ns.uri()));
            }
            None => {
                let _ = write!(out, " xmlns=\"{}\"", escape(ns.uri()));
            }
        }
    }
    if carried.is_some() {
        let _ = write!(out, " xmlns:{TEXT_PREFIX}=\"{TEXT_NS}\"");
    }
    for attr in node.attributes() {
        match attr.namespace() {
            Some(RDF_NS) | Some(TEXT_NS) => {}
            Some(uri) => {
                if let Some(prefix) = node.lookup_prefix(uri) {
                    let _ = write!(out, " {prefix}:{}=\"{}\"", attr.name(), escape(attr.value()));
                }
            }
            None => {
                let _ = write!(out, " {}=\"{}\"", attr.name(), escape(attr.value()));
            }
        }
    }
    if let Some(fields) = carried {
        out.push_str(&text_attributes(fields));
    }
    let children: String = node.children().map(|child| &xml[child.range()]).collect();
    if children.trim().is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        out.push_str(&children);
        out.push_str("</rdf:Description>");
    }
    out
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // attribute-value normalisation would turn these into spaces
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            _ => out.push(c),
        }
    }
    out
}
