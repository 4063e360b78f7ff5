//! Image encoding for uploads and decoding of downloaded results.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;

use crate::error::DomainError;
use crate::types::SharedImage;

/// JPEG quality used for upload parts.
pub const UPLOAD_JPEG_QUALITY: u8 = 80;

/// One JPEG-encoded upload part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Multipart file name, `image_{index}.jpg`.
    pub file_name: String,
    pub bytes: Arc<[u8]>,
}

impl EncodedImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encode an ordered batch as JPEG parts.
///
/// Alpha is flattened away since JPEG carries none. Fails on the first image
/// that cannot be encoded; nothing is dropped silently.
pub fn encode_batch(images: &[SharedImage]) -> Result<Vec<EncodedImage>, DomainError> {
    images
        .iter()
        .enumerate()
        .map(|(index, image)| {
            encode_jpeg(image).map(|bytes| EncodedImage {
                file_name: format!("image_{index}.jpg"),
                bytes: bytes.into(),
            })
        })
        .collect()
}

/// Encode a single image as JPEG at [`UPLOAD_JPEG_QUALITY`].
pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, DomainError> {
    let rgb = image.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, UPLOAD_JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| DomainError::Unknown(format!("Failed to encode request: {e}")))?;
    Ok(buf)
}

/// Total payload size of an encoded batch in bytes.
pub fn payload_size(images: &[EncodedImage]) -> usize {
    images.iter().map(EncodedImage::len).sum()
}

/// Decode downloaded bytes, guessing the format from the content.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
