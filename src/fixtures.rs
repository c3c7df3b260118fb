//! Small generated images for unit tests.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use img_parts::png::{Png, PngChunk};
use img_parts::riff::{RiffChunk, RiffContent};
use img_parts::webp::{WebP, CHUNK_VP8L, CHUNK_VP8X, CHUNK_XMP};
use img_parts::Bytes;
use little_exif::exif_tag::ExifTag;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;

fn gradient() -> RgbImage {
    RgbImage::from_fn(24, 16, |x, y| Rgb([(x * 10) as u8, (y * 15) as u8, 128]))
}

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

/// JPEG with an optional `UserComment` and `Orientation`.
pub(crate) fn write_jpeg(path: &Path, user_comment: Option<&str>, orientation: Option<u16>) {
    let mut tags = Vec::new();
    if let Some(code) = orientation {
        tags.push(ExifTag::Orientation(vec![code]));
    }
    if let Some(text) = user_comment {
        let mut raw = b"ASCII\0\0\0".to_vec();
        raw.extend_from_slice(text.as_bytes());
        tags.push(ExifTag::UserComment(raw));
    }
    write_jpeg_with_tags(path, tags);
}

/// JPEG carrying exactly `tags`, or no EXIF block when `tags` is empty.
pub(crate) fn write_jpeg_with_tags(path: &Path, tags: Vec<ExifTag>) {
    let mut buf = encode(DynamicImage::ImageRgb8(gradient()), ImageFormat::Jpeg);
    if !tags.is_empty() {
        let mut metadata = Metadata::new();
        for tag in tags {
            metadata.set_tag(tag);
        }
        metadata.write_to_vec(&mut buf, FileExtension::JPEG).unwrap();
    }
    fs::write(path, buf).unwrap();
}

/// Uncompressed TIFF without extra tags.
pub(crate) fn write_tiff(path: &Path) {
    fs::write(path, encode(DynamicImage::ImageRgb8(gradient()), ImageFormat::Tiff)).unwrap();
}

/// PNG carrying one `tEXt` chunk per entry.
pub(crate) fn write_png(path: &Path, texts: &[(&str, &str)]) {
    let buf = encode(DynamicImage::ImageRgb8(gradient()), ImageFormat::Png);
    let mut png = Png::from_bytes(Bytes::from(buf)).unwrap();
    let chunks = png.chunks_mut();
    for (key, value) in texts {
        let mut body = key.as_bytes().to_vec();
        body.push(0);
        body.extend_from_slice(value.as_bytes());
        // right after IHDR
        chunks.insert(1, PngChunk::new(*b"tEXt", Bytes::from(body)));
    }
    fs::write(path, png.encoder().bytes()).unwrap();
}

/// Lossless WebP without any metadata.
pub(crate) fn write_webp(path: &Path) {
    let image = RgbaImage::from_fn(20, 12, |x, y| Rgba([(x * 12) as u8, (y * 20) as u8, 90, 255]));
    fs::write(path, encode(DynamicImage::ImageRgba8(image), ImageFormat::WebP)).unwrap();
}

/// Extended-format lossless WebP carrying `packet` as its XMP chunk.
pub(crate) fn write_webp_with_xmp(path: &Path, packet: &str) {
    write_webp(path);
    let mut webp = WebP::from_bytes(Bytes::from(fs::read(path).unwrap())).unwrap();
    let (width, height) = webp.dimensions().unwrap();
    let alpha = webp
        .chunk_by_id(CHUNK_VP8L)
        .and_then(|chunk| chunk.content().data())
        .is_some_and(|data| data.len() >= 5 && data[4] & 0x10 != 0);

    // VP8X flags: XMP, plus alpha when the bitstream has it
    let mut header = vec![0x04 | if alpha { 0x10 } else { 0 }, 0, 0, 0];
    header.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
    header.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
    let chunks = webp.chunks_mut();
    chunks.insert(0, RiffChunk::new(CHUNK_VP8X, RiffContent::Data(Bytes::from(header))));
    chunks.push(RiffChunk::new(
        CHUNK_XMP,
        RiffContent::Data(Bytes::copy_from_slice(packet.as_bytes())),
    ));
    fs::write(path, webp.encoder().bytes()).unwrap();
}
