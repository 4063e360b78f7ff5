//! Tunables for the upload, polling and download stages.

use std::time::Duration;

/// Most images a single group may contain.
pub const MAX_IMAGES_PER_GROUP: usize = 10;

/// Encoded batches above this size go through the staged upload path.
pub const STAGED_UPLOAD_THRESHOLD_BYTES: usize = 10 * 1024 * 1024;

/// Pause between the end of one status poll and the start of the next.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Result downloads allowed in flight at once.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 3;

/// Status polling cadence.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    /// Wall-clock ceiling for one polling run. `None` polls until the job
    /// reaches a terminal status.
    pub max_duration: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_duration: None,
        }
    }
}

/// Upload validation and routing.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_images: usize,
    pub staged_threshold_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_images: MAX_IMAGES_PER_GROUP,
            staged_threshold_bytes: STAGED_UPLOAD_THRESHOLD_BYTES,
        }
    }
}

/// Everything the pipeline components need, bundled for construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub poll: PollConfig,
    pub upload: UploadConfig,
    pub download_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            upload: UploadConfig::default(),
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
        }
    }
}
