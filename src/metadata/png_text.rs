use std::collections::BTreeMap;
use std::io::Read;

use flate2::read::ZlibDecoder;
use img_parts::png::{Png, PngChunk};
use img_parts::Bytes;

use super::MetadataError;

const TEXT: [u8; 4] = *b"tEXt";
const ZTXT: [u8; 4] = *b"zTXt";
const ITXT: [u8; 4] = *b"iTXt";
const IEND: [u8; 4] = *b"IEND";

fn parse(data: Bytes) -> Result<Png, MetadataError> {
    Png::from_bytes(data).map_err(|err| MetadataError::Decode(err.to_string()))
}

/// Collects every text chunk as `keyword -> text`. The first chunk wins when
/// a keyword repeats.
pub(super) fn read_fields(data: &[u8]) -> Result<BTreeMap<String, String>, MetadataError> {
    let png = parse(Bytes::copy_from_slice(data))?;
    let mut fields = BTreeMap::new();
    for chunk in png.chunks() {
        if let Some((key, value)) = decode_text_chunk(chunk.kind(), chunk.contents()) {
            fields.entry(key).or_insert(value);
        }
    }
    Ok(fields)
}

/// Replaces the text chunks named in `fields` and leaves every other chunk,
/// including image data, exactly as it was.
pub(super) fn write_fields(data: Vec<u8>, fields: &[(&str, &str)]) -> Result<Vec<u8>, MetadataError> {
    let mut png = parse(Bytes::from(data))?;
    let chunks = png.chunks_mut();
    chunks.retain(|chunk| match text_keyword(chunk.kind(), chunk.contents()) {
        Some(keyword) => !fields.iter().any(|(key, _)| *key == keyword),
        None => true,
    });
    let iend = chunks
        .iter()
        .position(|chunk| chunk.kind() == IEND)
        .ok_or_else(|| MetadataError::Encode("missing IEND chunk".into()))?;
    for (offset, (key, value)) in fields.iter().enumerate() {
        chunks.insert(iend + offset, encode_text_chunk(key, value)?);
    }
    Ok(png.encoder().bytes().to_vec())
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn split_nul(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = bytes.iter().position(|&b| b == 0)?;
    Some((&bytes[..pos], &bytes[pos + 1..]))
}

fn inflate(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes).read_to_end(&mut out).ok()?;
    Some(out)
}

fn text_keyword(kind: [u8; 4], body: &[u8]) -> Option<String> {
    if kind != TEXT && kind != ZTXT && kind != ITXT {
        return None;
    }
    split_nul(body).map(|(keyword, _)| latin1(keyword))
}

fn decode_text_chunk(kind: [u8; 4], body: &[u8]) -> Option<(String, String)> {
    let (keyword, rest) = split_nul(body)?;
    let value = match kind {
        TEXT => latin1(rest),
        ZTXT => {
            // compression method byte, then a zlib stream
            let (_, stream) = rest.split_first()?;
            latin1(&inflate(stream)?)
        }
        ITXT => {
            let (&compressed, rest) = rest.split_first()?;
            let (_, rest) = rest.split_first()?;
            let (_language, rest) = split_nul(rest)?;
            let (_translated, text) = split_nul(rest)?;
            if compressed == 1 {
                String::from_utf8_lossy(&inflate(text)?).into_owned()
            } else {
                String::from_utf8_lossy(text).into_owned()
            }
        }
        _ => return None,
    };
    Some((latin1(keyword), value))
}

/// `tEXt` for plain ASCII, uncompressed `iTXt` for anything else.
fn encode_text_chunk(key: &str, value: &str) -> Result<PngChunk, MetadataError> {
    if key.is_empty() || key.len() > 79 || !key.is_ascii() || key.contains('\0') {
        return Err(MetadataError::Encode(format!("invalid text keyword {key:?}")));
    }
    let mut body = Vec::with_capacity(key.len() + value.len() + 5);
    body.extend_from_slice(key.as_bytes());
    body.push(0);
    let kind = if value.is_ascii() && !value.contains('\0') {
        TEXT
    } else {
        // no compression, empty language tag, empty translated keyword
        body.extend_from_slice(&[0, 0, 0, 0]);
        ITXT
    };
    body.extend_from_slice(value.as_bytes());
    Ok(PngChunk::new(kind, Bytes::from(body)))
}
