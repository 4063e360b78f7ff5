//! Loading an input batch from a directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tona_core::types::SharedImage;

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Image files directly inside `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Decode every image in `dir`, in file name order.
pub fn load_batch(dir: &Path) -> anyhow::Result<Vec<SharedImage>> {
    let paths = list_images(dir)?;
    tracing::info!(dir = %dir.display(), count = paths.len(), "Loading images");
    paths
        .iter()
        .map(|path| {
            image::open(path)
                .map(Arc::new)
                .with_context(|| format!("decoding {}", path.display()))
        })
        .collect()
}
