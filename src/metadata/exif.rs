use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use little_exif::exif_tag::ExifTag;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use rexif::{ExifError, TagValue};
use tracing::debug;

use super::MetadataError;

/// Character-set header written in front of every `UserComment` we store.
const ASCII_PREFIX: &[u8; 8] = b"ASCII\0\0\0";
const UNICODE_PREFIX: &[u8; 8] = b"UNICODE\0";
const JIS_PREFIX: &[u8; 8] = b"JIS\0\0\0\0\0";
const UNDEFINED_PREFIX: &[u8; 8] = &[0; 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Jpeg,
    Tiff,
}

impl Container {
    fn sniff(data: &[u8]) -> Result<Self, MetadataError> {
        match data {
            [0xFF, 0xD8, ..] => Ok(Self::Jpeg),
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Ok(Self::Tiff),
            _ => Err(MetadataError::Decode("not a JPEG or TIFF stream".into())),
        }
    }

    fn file_extension(self) -> FileExtension {
        match self {
            Self::Jpeg => FileExtension::JPEG,
            Self::Tiff => FileExtension::TIFF,
        }
    }
}

fn parse(data: &[u8]) -> Result<rexif::ExifData, MetadataError> {
    rexif::parse_buffer_quiet(data)
        .0
        .map_err(|err| MetadataError::Decode(format!("{err:?}")))
}

fn find(exif: &rexif::ExifData, tag: rexif::ExifTag) -> Option<&TagValue> {
    exif.entries
        .iter()
        .find(|entry| entry.tag == tag)
        .map(|entry| &entry.value)
}

pub(super) fn read_comment(data: &[u8]) -> Result<String, MetadataError> {
    let exif = parse(data)?;
    if let Some(comment) = find(&exif, rexif::ExifTag::UserComment).and_then(user_comment_text) {
        return Ok(comment);
    }
    let description = match find(&exif, rexif::ExifTag::ImageDescription) {
        Some(TagValue::Ascii(text)) => trim_nul(text).to_string(),
        Some(TagValue::Undefined(bytes, _)) | Some(TagValue::U8(bytes)) => {
            trim_nul(&String::from_utf8_lossy(bytes)).to_string()
        }
        _ => String::new(),
    };
    Ok(description)
}

/// Decodes a raw `UserComment` value. Empty values count as absent.
fn user_comment_text(value: &TagValue) -> Option<String> {
    let (raw, little_endian) = match value {
        TagValue::Undefined(bytes, le) => (bytes.as_slice(), *le),
        TagValue::U8(bytes) => (bytes.as_slice(), false),
        TagValue::Ascii(text) => (text.as_bytes(), false),
        _ => return None,
    };
    if raw.is_empty() {
        return None;
    }
    Some(decode_user_comment(raw, little_endian))
}

fn decode_user_comment(raw: &[u8], little_endian: bool) -> String {
    let text = match raw.split_at(raw.len().min(8)) {
        (prefix, payload) if prefix == UNICODE_PREFIX => decode_utf16(payload, little_endian),
        (prefix, payload)
            if prefix == ASCII_PREFIX || prefix == JIS_PREFIX || prefix == UNDEFINED_PREFIX =>
        {
            String::from_utf8_lossy(payload).into_owned()
        }
        _ => String::from_utf8_lossy(raw).into_owned(),
    };
    trim_nul(&text).to_string()
}

fn decode_utf16(payload: &[u8], little_endian: bool) -> String {
    let units = payload.chunks_exact(2).map(|pair| {
        let pair = [pair[0], pair[1]];
        if little_endian {
            u16::from_le_bytes(pair)
        } else {
            u16::from_be_bytes(pair)
        }
    });
    char::decode_utf16(units)
        .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn trim_nul(text: &str) -> &str {
    text.trim_end_matches('\0')
}

pub(super) fn read_fields(data: &[u8]) -> Result<BTreeMap<String, String>, MetadataError> {
    let exif = parse(data)?;
    let mut fields = BTreeMap::new();
    for entry in &exif.entries {
        if matches!(entry.tag, rexif::ExifTag::ExifOffset | rexif::ExifTag::GPSOffset) {
            continue;
        }
        fields
            .entry(format!("{:?}", entry.tag))
            .or_insert_with(|| entry.value_more_readable.to_string());
    }
    Ok(fields)
}

/// Runs a little_exif call that may panic on malformed input, reporting the
/// panic as an ordinary error.
fn guarded<T>(call: impl FnOnce() -> std::io::Result<T>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result.map_err(|err| err.to_string()),
        Err(_) => Err("little_exif panicked".to_string()),
    }
}

/// Sets `UserComment` and `ImageDescription`, re-serialising the whole EXIF
/// block so every other tag is carried over.
pub(super) fn write_comment(data: Vec<u8>, text: &str) -> Result<Vec<u8>, MetadataError> {
    let container = Container::sniff(&data)?;
    let mut metadata = match guarded(|| Metadata::new_from_vec(&data, container.file_extension())) {
        Ok(metadata) => metadata,
        Err(err) => match rexif::parse_buffer_quiet(&data).0 {
            // a JPEG with no APP1 block has nothing to lose
            Err(ExifError::JpegWithoutExif(_)) => {
                debug!("no existing EXIF block ({err}), creating one");
                Metadata::new()
            }
            _ => return Err(MetadataError::Decode(err)),
        },
    };

    let mut user_comment = ASCII_PREFIX.to_vec();
    user_comment.extend_from_slice(text.as_bytes());
    metadata.set_tag(ExifTag::UserComment(user_comment));
    metadata.set_tag(ExifTag::ImageDescription(text.to_string()));

    let mut out = data;
    guarded(|| metadata.write_to_vec(&mut out, container.file_extension()))
        .map_err(MetadataError::Encode)?;
    Ok(out)
}

fn orientation_from_tag_value(value: &TagValue) -> Option<u16> {
    let raw = match value {
        TagValue::U16(vals) => vals.first().copied(),
        TagValue::I16(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        TagValue::U8(vals) => vals.first().map(|&v| v as u16),
        TagValue::I8(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        TagValue::U32(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        TagValue::I32(vals) => vals.first().and_then(|v| u16::try_from(*v).ok()),
        TagValue::URational(vals) => vals.first().and_then(|r| {
            let num = r.numerator;
            let den = r.denominator;
            if den == 0 || num % den != 0 {
                return None;
            }
            u16::try_from(num / den).ok()
        }),
        TagValue::IRational(vals) => vals.first().and_then(|r| {
            let num = r.numerator;
            let den = r.denominator;
            if den == 0 || num % den != 0 {
                return None;
            }
            u16::try_from(num / den).ok()
        }),
        _ => None,
    }?;

    (1..=8).contains(&raw).then_some(raw)
}

/// EXIF orientation code (1..=8) of an encoded image, if it carries one.
pub(crate) fn orientation(data: &[u8]) -> Option<u16> {
    let exif = rexif::parse_buffer_quiet(data).0.ok()?;
    find(&exif, rexif::ExifTag::Orientation).and_then(orientation_from_tag_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ascii_prefix() {
        assert_eq!(decode_user_comment(b"ASCII\0\0\0cat photo", false), "cat photo");
    }

    #[test]
    fn keeps_unprefixed_payload() {
        assert_eq!(decode_user_comment("short ü".as_bytes(), false), "short ü");
    }

    #[test]
    fn invalid_utf8_becomes_replacement_character() {
        assert_eq!(
            decode_user_comment(b"ASCII\0\0\0ab\xFFcd", false),
            "ab\u{FFFD}cd"
        );
    }

    #[test]
    fn decodes_unicode_prefix_in_either_byte_order() {
        let mut be = UNICODE_PREFIX.to_vec();
        be.extend_from_slice(&[0x00, b'h', 0x00, b'i']);
        assert_eq!(decode_user_comment(&be, false), "hi");

        let mut le = UNICODE_PREFIX.to_vec();
        le.extend_from_slice(&[b'h', 0x00, b'i', 0x00]);
        assert_eq!(decode_user_comment(&le, true), "hi");
    }

    #[test]
    fn trailing_nuls_are_dropped() {
        assert_eq!(decode_user_comment(b"\0\0\0\0\0\0\0\0note\0\0", false), "note");
    }

    #[test]
    fn empty_user_comment_counts_as_absent() {
        assert_eq!(user_comment_text(&TagValue::Undefined(Vec::new(), true)), None);
        assert_eq!(
            user_comment_text(&TagValue::Undefined(ASCII_PREFIX.to_vec(), true)),
            Some(String::new())
        );
    }

    #[test]
    fn panics_in_the_writer_become_errors() {
        let result: Result<(), String> = guarded(|| panic!("bad IFD"));
        assert!(result.is_err());
        let result = guarded(|| Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "short")));
        assert_eq!(result, Err("short".to_string()));
        assert_eq!(guarded(|| Ok(3)), Ok(3));
    }

    #[test]
    fn unreadable_exif_block_is_not_replaced() {
        // APP1 "Exif" segment whose TIFF header is garbage
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x10];
        jpeg.extend_from_slice(b"Exif\0\0XXXXXXXX");
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        assert!(matches!(
            write_comment(jpeg, "text"),
            Err(MetadataError::Decode(_))
        ));
    }

    #[test]
    fn sniff_rejects_other_containers() {
        assert_eq!(Container::sniff(&[0xFF, 0xD8, 0xFF]).unwrap(), Container::Jpeg);
        assert_eq!(Container::sniff(b"II*\0rest").unwrap(), Container::Tiff);
        assert_eq!(Container::sniff(b"MM\0*rest").unwrap(), Container::Tiff);
        assert!(Container::sniff(b"\x89PNG").is_err());
    }

    #[test]
    fn orientation_from_urational_rounds_down() {
        let value = TagValue::URational(vec![rexif::URational {
            numerator: 6,
            denominator: 2,
        }]);
        assert_eq!(orientation_from_tag_value(&value), Some(3));
    }

    #[test]
    fn orientation_from_irational_with_negative_denominator() {
        let value = TagValue::IRational(vec![rexif::IRational {
            numerator: -12,
            denominator: -2,
        }]);
        assert_eq!(orientation_from_tag_value(&value), Some(6));
    }

    #[test]
    fn orientation_out_of_range_is_ignored() {
        assert_eq!(orientation_from_tag_value(&TagValue::U16(vec![9])), None);
        assert_eq!(orientation_from_tag_value(&TagValue::U16(vec![])), None);
    }
}
