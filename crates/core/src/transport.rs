//! The seam between the orchestration layer and the network.
//!
//! [`Transport`] is implemented by the HTTP client in `tona-client` and by
//! scripted fakes in tests. Implementations report failures as
//! [`TransportError`]; classification into user-facing errors happens in
//! [`crate::classify`].

use std::future::Future;

use crate::imaging::EncodedImage;
use crate::types::GroupSlot;
use crate::wire::{
    CancelResponse, ProcessingRequest, ProcessingResponse, ResultResponse, StatusResponse,
    UploadGroupResponse,
};

/// Transport-level failure, before classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server could not be reached at all.
    #[error("Network error: {0}")]
    NoConnection(String),

    /// The request did not complete in time.
    #[error("Request timed out")]
    Timeout,

    /// The base URL and endpoint did not form a valid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// 400, 401 or 404.
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Any 5xx status.
    #[error("Server error ({status}): {body}")]
    ServerError { status: u16, body: String },

    /// Any other non-2xx status, or `0` when no HTTP response was received.
    #[error("Invalid response with status code: {0}")]
    InvalidResponse(u16),

    #[error("Failed to decode response: {0}")]
    Decoding(String),

    #[error("Failed to encode request: {0}")]
    Encoding(String),

    #[error("No data received")]
    NoData,
}

impl TransportError {
    /// Map a non-success HTTP status to the matching variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 => Self::RequestFailed("Bad request".into()),
            401 => Self::RequestFailed("Unauthorized".into()),
            404 => Self::RequestFailed("Not found".into()),
            500..=599 => Self::ServerError { status, body },
            other => Self::InvalidResponse(other),
        }
    }
}

/// Operations the remote processing service offers.
///
/// Every method issues exactly one logical request. Implementations must not
/// retry on their own.
pub trait Transport: Send + Sync {
    /// Upload a batch in a single multipart request.
    fn upload_group(
        &self,
        slot: GroupSlot,
        images: &[EncodedImage],
    ) -> impl Future<Output = Result<UploadGroupResponse, TransportError>> + Send;

    /// Upload a large batch through the staged (spooled, background) path.
    fn upload_group_staged(
        &self,
        slot: GroupSlot,
        images: &[EncodedImage],
    ) -> impl Future<Output = Result<UploadGroupResponse, TransportError>> + Send;

    fn start_processing(
        &self,
        request: &ProcessingRequest,
    ) -> impl Future<Output = Result<ProcessingResponse, TransportError>> + Send;

    fn check_status(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<StatusResponse, TransportError>> + Send;

    fn get_result(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<ResultResponse, TransportError>> + Send;

    fn cancel_job(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<CancelResponse, TransportError>> + Send;

    /// Fetch the raw bytes behind a result URL.
    fn download(&self, url: &str)
        -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
