//! Spool files backing the staged upload path.
//!
//! Large batches are written part by part to a temporary file and streamed
//! from there in chunks by a background task, so the request body never
//! exists as a second in-memory copy of the batch. The file is removed when
//! the [`SpoolFile`] drops.

use std::path::{Path, PathBuf};

use tokio::io::BufWriter;
use tona_core::imaging::EncodedImage;
use tona_core::transport::TransportError;

use crate::multipart;

/// A temporary file holding a serialized multipart body.
#[derive(Debug)]
pub struct SpoolFile {
    path: PathBuf,
}

impl SpoolFile {
    /// Write the multipart body for `images` to a fresh file in `dir`.
    pub async fn write_in(dir: &Path, images: &[EncodedImage], boundary: &str) -> Result<Self, TransportError> {
        let path = dir.join(format!("tona-upload-{}.part", uuid::Uuid::new_v4()));
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| spool_error("create", &path, e))?;
        // From here on a failed write still removes the file.
        let spool = Self { path };

        let mut writer = BufWriter::new(file);
        multipart::write_body(&mut writer, images, boundary)
            .await
            .map_err(|e| spool_error("write", &spool.path, e))?;
        tracing::debug!(path = %spool.path.display(), parts = images.len(), "Spooled staged upload");
        Ok(spool)
    }

    /// Write the multipart body for `images` to the system temp directory.
    pub async fn write(images: &[EncodedImage], boundary: &str) -> Result<Self, TransportError> {
        Self::write_in(&std::env::temp_dir(), images, boundary).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the spooled body for streaming, with its length in bytes.
    pub async fn open(&self) -> Result<(tokio::fs::File, u64), TransportError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| spool_error("open", &self.path, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| spool_error("stat", &self.path, e))?
            .len();
        Ok((file, len))
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove spool file");
        }
    }
}

fn spool_error(action: &str, path: &Path, error: std::io::Error) -> TransportError {
    TransportError::Encoding(format!("{action} spool {}: {error}", path.display()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
