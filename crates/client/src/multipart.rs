//! Hand-built `multipart/form-data` bodies for the staged upload path.
//!
//! The direct path lets [`reqwest::multipart::Form`] assemble parts in
//! memory. The staged path writes the same parts to any [`AsyncWrite`] one
//! at a time, so a batch can go to disk without a second in-memory copy.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tona_core::imaging::EncodedImage;

/// Form field name every image part is sent under.
pub const IMAGES_FIELD: &str = "images";

/// MIME type of every image part.
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Generate a fresh boundary token.
pub fn new_boundary() -> String {
    format!("tona-{}", uuid::Uuid::new_v4().simple())
}

/// `Content-Type` header value for a body built with `boundary`.
pub fn content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={boundary}")
}

fn part_header(boundary: &str, file_name: &str) -> String {
    format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"{IMAGES_FIELD}\"; filename=\"{file_name}\"\r\n\
         Content-Type: {IMAGE_CONTENT_TYPE}\r\n\r\n"
    )
}

/// Write `images` to `writer` as one `images` part each, in order, followed
/// by the closing boundary.
pub async fn write_body<W>(writer: &mut W, images: &[EncodedImage], boundary: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for image in images {
        writer
            .write_all(part_header(boundary, &image.file_name).as_bytes())
            .await?;
        writer.write_all(&image.bytes).await?;
        writer.write_all(b"\r\n").await?;
    }
    writer
        .write_all(format!("--{boundary}--\r\n").as_bytes())
        .await?;
    writer.flush().await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
