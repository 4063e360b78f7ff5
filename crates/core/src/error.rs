//! Closed taxonomy of failures surfaced to the user.
//!
//! Every failure in the job lifecycle ends up as a [`DomainError`]. Each
//! variant carries two derived flags that drive presentation:
//! [`is_fatal`](DomainError::is_fatal) selects a blocking error surface over
//! a transient notice, and [`can_retry`](DomainError::can_retry) decides
//! whether a "Retry" affordance is offered.

/// Maximum upload size advertised in [`ValidationError::FileTooLarge`].
pub const MAX_UPLOAD_SIZE_MB: u32 = 10;

/// Connectivity and HTTP-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("No internet connection. Please check your network settings.")]
    NoConnection,

    #[error("Request timed out. Please try again.")]
    Timeout,

    /// The server answered with a non-success status code.
    #[error("Server error (Code: {0}). Please try again later.")]
    ServerError(u16),

    #[error("Invalid response from server.")]
    InvalidResponse,

    #[error("Request failed: {0}")]
    RequestFailed(String),
}

impl NetworkError {
    fn id(&self) -> String {
        match self {
            Self::NoConnection => "no_connection".into(),
            Self::Timeout => "timeout".into(),
            Self::ServerError(code) => format!("server_{code}"),
            Self::InvalidResponse => "invalid_response".into(),
            Self::RequestFailed(detail) => format!("request_failed_{detail}"),
        }
    }

    fn is_fatal(&self) -> bool {
        match self {
            Self::NoConnection => true,
            Self::ServerError(code) => *code >= 500,
            _ => false,
        }
    }

    fn can_retry(&self) -> bool {
        match self {
            Self::NoConnection | Self::Timeout => true,
            Self::ServerError(code) => *code >= 500,
            _ => false,
        }
    }
}

/// Input problems detected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please select at least one image to continue.")]
    NoImagesSelected,

    #[error("You can select up to {0} images.")]
    TooManyImages(usize),

    #[error("Invalid image format. Please use JPEG or PNG images.")]
    InvalidFormat,

    #[error("File size exceeds {0}MB limit.")]
    FileTooLarge(u32),

    /// A new batch was offered while a job is uploading, running or
    /// being cancelled.
    #[error("Please wait until the current job has finished.")]
    JobInProgress,
}

impl ValidationError {
    fn id(&self) -> String {
        match self {
            Self::NoImagesSelected => "no_images".into(),
            Self::TooManyImages(max) => format!("too_many_{max}"),
            Self::InvalidFormat => "invalid_format".into(),
            Self::FileTooLarge(max) => format!("file_too_large_{max}"),
            Self::JobInProgress => "job_in_progress".into(),
        }
    }
}

/// Failures reported for a remote job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    #[error("Processing failed: {0}")]
    JobFailed(String),

    #[error("Processing was cancelled.")]
    JobCancelled,

    #[error("Processing took too long. Please try again.")]
    Timeout,

    #[error("Invalid processing job.")]
    InvalidJobId,
}

impl ProcessingError {
    fn id(&self) -> String {
        match self {
            Self::JobFailed(reason) => format!("job_failed_{reason}"),
            Self::JobCancelled => "job_cancelled".into(),
            Self::Timeout => "processing_timeout".into(),
            Self::InvalidJobId => "invalid_job_id".into(),
        }
    }

    fn is_retryable_and_fatal(&self) -> bool {
        matches!(self, Self::JobFailed(_) | Self::Timeout)
    }
}

/// Local persistence failures (saving results).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to save image. Please try again.")]
    SaveFailed,

    #[error("Failed to load image.")]
    LoadFailed,

    #[error("Not enough storage space available.")]
    InsufficientSpace,
}

impl StorageError {
    fn id(&self) -> &'static str {
        match self {
            Self::SaveFailed => "save_failed",
            Self::LoadFailed => "load_failed",
            Self::InsufficientSpace => "insufficient_space",
        }
    }
}

/// A classified failure, ready to be shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Unknown(String),
}

impl DomainError {
    /// Stable identifier, e.g. `network_server_503` or `validation_no_images`.
    pub fn id(&self) -> String {
        match self {
            Self::Network(e) => format!("network_{}", e.id()),
            Self::Validation(e) => format!("validation_{}", e.id()),
            Self::Processing(e) => format!("processing_{}", e.id()),
            Self::Storage(e) => format!("storage_{}", e.id()),
            Self::Unknown(message) => format!("unknown_{message}"),
        }
    }

    /// Fatal errors block the current flow until dismissed or retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Network(e) => e.is_fatal(),
            Self::Processing(e) => e.is_retryable_and_fatal(),
            Self::Validation(_) | Self::Storage(_) | Self::Unknown(_) => false,
        }
    }

    /// Whether repeating the failed operation unchanged may succeed.
    pub fn can_retry(&self) -> bool {
        match self {
            Self::Network(e) => e.can_retry(),
            Self::Processing(e) => e.is_retryable_and_fatal(),
            Self::Validation(_) | Self::Storage(_) | Self::Unknown(_) => false,
        }
    }

    /// How the error is presented.
    pub fn severity(&self) -> Severity {
        if self.is_fatal() {
            Severity::Blocking
        } else {
            Severity::Transient
        }
    }
}

/// Presentation class derived from [`DomainError::is_fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Full-screen error that blocks further interaction.
    Blocking,
    /// Dismissible notice.
    Transient,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
