//! Reading and writing the free-text comment embedded in image metadata.
//!
//! Three container families are handled, selected by file extension:
//!
//! * EXIF (`jpg`, `jpeg`, `tif`, `tiff`): `UserComment`, falling back to
//!   `ImageDescription`.
//! * PNG text chunks (`png`): `Description`, `Comment`, `ImageDescription`.
//! * WebP XMP (`webp`): `description`, `Comment`, `ImageDescription`, then
//!   a Dublin Core `dc:description` written by other tools.
//!
//! Reads never fail; anything unreadable is reported as an empty comment.
//! Writes return a [`MetadataError`] and only touch the file once the new
//! contents are complete in memory.

mod exif;
mod png_text;
mod webp_xmp;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

pub(crate) use exif::orientation;

/// Keys checked, in order, when reading a PNG comment.
static PNG_COMMENT_KEYS: [&str; 3] = ["Description", "Comment", "ImageDescription"];
/// Keys checked, in order, when reading a WebP comment.
static WEBP_COMMENT_KEYS: [&str; 4] = [
    "description",
    "Comment",
    "ImageDescription",
    "dc:description",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFamily {
    Exif,
    PngText,
    WebpXmp,
}

impl ImageFamily {
    /// Classifies a path by its extension, ignoring case.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "tif" | "tiff" => Some(Self::Exif),
            "png" => Some(Self::PngText),
            "webp" => Some(Self::WebpXmp),
            _ => None,
        }
    }

    /// Keys written by [`write_comment`] for the text-map families.
    fn comment_keys(self) -> &'static [&'static str] {
        match self {
            Self::Exif => &[],
            Self::PngText => &PNG_COMMENT_KEYS[..2],
            Self::WebpXmp => &WEBP_COMMENT_KEYS[..2],
        }
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported image format")]
    UnsupportedFormat,
    #[error("metadata decoding failed: {0}")]
    Decode(String),
    #[error("metadata encoding failed: {0}")]
    Encode(String),
}

/// Returns the comment stored in `path`, or an empty string when there is
/// none or the file cannot be parsed.
pub fn read_comment(path: &Path) -> String {
    match try_read_comment(path) {
        Ok(comment) => comment,
        Err(err) => {
            debug!(path = %path.display(), "no readable comment: {err}");
            String::new()
        }
    }
}

fn try_read_comment(path: &Path) -> Result<String, MetadataError> {
    let family = ImageFamily::from_path(path).ok_or(MetadataError::UnsupportedFormat)?;
    let data = fs::read(path)?;
    let comment = match family {
        ImageFamily::Exif => exif::read_comment(&data)?,
        ImageFamily::PngText => first_present(&png_text::read_fields(&data)?, &PNG_COMMENT_KEYS),
        ImageFamily::WebpXmp => first_present(&webp_xmp::read_fields(&data)?, &WEBP_COMMENT_KEYS),
    };
    Ok(comment)
}

fn first_present(fields: &BTreeMap<String, String>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| fields.get(*key))
        .cloned()
        .unwrap_or_default()
}

/// Snapshot of every string-valued metadata field in `path`.
///
/// EXIF files report each parsed tag by name with its readable value.
pub fn read_text_fields(path: &Path) -> Result<BTreeMap<String, String>, MetadataError> {
    let family = ImageFamily::from_path(path).ok_or(MetadataError::UnsupportedFormat)?;
    let data = fs::read(path)?;
    match family {
        ImageFamily::Exif => exif::read_fields(&data),
        ImageFamily::PngText => png_text::read_fields(&data),
        ImageFamily::WebpXmp => webp_xmp::read_fields(&data),
    }
}

/// Stores `text` as the comment of `path`, keeping all other metadata.
pub fn write_comment(path: &Path, text: &str) -> Result<(), MetadataError> {
    let family = ImageFamily::from_path(path).ok_or(MetadataError::UnsupportedFormat)?;
    let data = fs::read(path)?;
    let fields: Vec<(&str, &str)> = family
        .comment_keys()
        .iter()
        .map(|key| (*key, text))
        .collect();
    let updated = match family {
        ImageFamily::Exif => exif::write_comment(data, text)?,
        ImageFamily::PngText => png_text::write_fields(data, &fields)?,
        ImageFamily::WebpXmp => webp_xmp::write_fields(data, &fields)?,
    };
    replace_file(path, &updated)?;
    debug!(path = %path.display(), bytes = updated.len(), "comment written");
    Ok(())
}

/// Writes `contents` to a sibling temporary file and renames it over `path`.
fn replace_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    if let Ok(meta) = fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn family_from_extension_ignores_case() {
        assert_eq!(
            ImageFamily::from_path(Path::new("/a/b.JPG")),
            Some(ImageFamily::Exif)
        );
        assert_eq!(
            ImageFamily::from_path(Path::new("x.Tiff")),
            Some(ImageFamily::Exif)
        );
        assert_eq!(
            ImageFamily::from_path(Path::new("x.png")),
            Some(ImageFamily::PngText)
        );
        assert_eq!(
            ImageFamily::from_path(Path::new("x.WebP")),
            Some(ImageFamily::WebpXmp)
        );
        assert_eq!(ImageFamily::from_path(Path::new("x.gif")), None);
        assert_eq!(ImageFamily::from_path(Path::new("noext")), None);
    }

    #[test]
    fn reads_comments_from_each_family() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.png");
        let c = dir.path().join("c.webp");
        fixtures::write_jpeg(&a, Some("cat photo"), None);
        fixtures::write_png(&b, &[("Description", "dog photo")]);
        fixtures::write_webp(&c);

        assert_eq!(read_comment(&a), "cat photo");
        assert_eq!(read_comment(&b), "dog photo");
        assert_eq!(read_comment(&c), "");
    }

    #[test]
    fn missing_or_corrupt_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.jpg");
        fixtures::write_jpeg(&plain, None, None);
        assert_eq!(read_comment(&plain), "");

        let garbage = dir.path().join("garbage.png");
        fs::write(&garbage, b"definitely not an image").unwrap();
        assert_eq!(read_comment(&garbage), "");

        let text = dir.path().join("notes.txt");
        fs::write(&text, b"hello").unwrap();
        assert_eq!(read_comment(&text), "");

        assert_eq!(read_comment(&dir.path().join("absent.webp")), "");
    }

    #[test]
    fn round_trips_comments_in_every_family() {
        let dir = tempfile::tempdir().unwrap();
        let jpeg = dir.path().join("a.jpeg");
        let png = dir.path().join("b.png");
        let webp = dir.path().join("c.webp");
        fixtures::write_jpeg(&jpeg, None, None);
        fixtures::write_png(&png, &[]);
        fixtures::write_webp(&webp);

        for path in [&jpeg, &png, &webp] {
            for text in ["", "plain ascii", "Größe ⛰ 山の写真", "line one\nline two"] {
                write_comment(path, text).unwrap();
                assert_eq!(read_comment(path), text, "{}", path.display());
                write_comment(path, text).unwrap();
                assert_eq!(read_comment(path), text, "{}", path.display());
            }
        }
    }

    #[test]
    fn jpeg_write_keeps_other_exif_tags() {
        use little_exif::exif_tag::ExifTag;

        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        fixtures::write_jpeg_with_tags(
            &a,
            vec![
                ExifTag::Make("Fujifilm".into()),
                ExifTag::Model("X100V".into()),
                ExifTag::Artist("someone".into()),
                ExifTag::DateTimeOriginal("2021:06:01 10:20:30".into()),
                ExifTag::Orientation(vec![6]),
                ExifTag::UserComment(b"ASCII\0\0\0cat photo".to_vec()),
            ],
        );
        let before = read_text_fields(&a).unwrap();
        assert!(before.contains_key("Make") && before.contains_key("DateTimeOriginal"));

        write_comment(&a, "new text").unwrap();

        let after = read_text_fields(&a).unwrap();
        for (key, value) in &before {
            if key != "UserComment" && key != "ImageDescription" {
                assert_eq!(after.get(key), Some(value), "{key}");
            }
        }
        assert_eq!(read_comment(&a), "new text");
        assert_eq!(orientation(&fs::read(&a).unwrap()), Some(6));
        assert!(image::open(&a).is_ok());
    }

    #[test]
    fn tiff_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let t = dir.path().join("scan.tif");
        fixtures::write_tiff(&t);
        let before_pixels = image::open(&t).unwrap().to_rgba8();
        assert_eq!(read_comment(&t), "");

        for text in ["scanned negative", "Größe ⛰"] {
            write_comment(&t, text).unwrap();
            assert_eq!(read_comment(&t), text);
        }
        assert_eq!(image::open(&t).unwrap().to_rgba8(), before_pixels);
    }

    #[test]
    fn png_write_keeps_other_fields_and_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.png");
        fixtures::write_png(&b, &[("Author", "someone"), ("Comment", "old"), ("Software", "gimp")]);
        let before_pixels = image::open(&b).unwrap().to_rgba8();
        let before = read_text_fields(&b).unwrap();

        write_comment(&b, "dog photo").unwrap();

        let after = read_text_fields(&b).unwrap();
        for (key, value) in &before {
            if key != "Comment" && key != "Description" {
                assert_eq!(after.get(key), Some(value), "{key}");
            }
        }
        assert_eq!(after.get("Description").map(String::as_str), Some("dog photo"));
        assert_eq!(after.get("Comment").map(String::as_str), Some("dog photo"));
        assert_eq!(image::open(&b).unwrap().to_rgba8(), before_pixels);
    }

    #[test]
    fn webp_write_keeps_pixels_and_existing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let c = dir.path().join("c.webp");
        fixtures::write_webp_with_xmp(
            &c,
            r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
<rdf:Description rdf:about="" xmlns:xmp="http://ns.adobe.com/xap/1.0/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmp:CreatorTool="darktable">
<dc:description><rdf:Alt><rdf:li xml:lang="x-default">from the camera</rdf:li></rdf:Alt></dc:description>
</rdf:Description></rdf:RDF></x:xmpmeta>"#,
        );
        let before_pixels = image::open(&c).unwrap().to_rgba8();
        let before = read_text_fields(&c).unwrap();
        assert_eq!(read_comment(&c), "from the camera");

        write_comment(&c, "first").unwrap();
        let after = read_text_fields(&c).unwrap();
        for (key, value) in &before {
            assert_eq!(after.get(key), Some(value), "{key}");
        }
        assert_eq!(after.get("description").map(String::as_str), Some("first"));
        assert_eq!(after.get("Comment").map(String::as_str), Some("first"));

        write_comment(&c, "second").unwrap();
        assert_eq!(read_comment(&c), "second");
        assert_eq!(read_text_fields(&c).unwrap()["xmp:CreatorTool"], "darktable");
        assert_eq!(image::open(&c).unwrap().to_rgba8(), before_pixels);
    }

    #[test]
    fn failed_write_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.png");
        fs::write(&broken, b"\x89PNG but not really").unwrap();

        assert!(write_comment(&broken, "text").is_err());
        assert_eq!(fs::read(&broken).unwrap(), b"\x89PNG but not really");

        let unsupported = dir.path().join("x.bmp");
        assert!(matches!(
            write_comment(&unsupported, "text"),
            Err(MetadataError::UnsupportedFormat)
        ));
    }
}
