//! REST API client for the Tona processing service.
//!
//! Wraps the service's HTTP endpoints (group upload, job start, status,
//! result retrieval, cancellation) using [`reqwest`]. All endpoints live
//! under the `/api/v1` prefix of the configured base URL.

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Url;
use tokio_util::io::ReaderStream;
use tona_core::imaging::EncodedImage;
use tona_core::transport::{Transport, TransportError};
use tona_core::types::GroupSlot;
use tona_core::wire::{
    CancelResponse, ProcessingRequest, ProcessingResponse, ResultResponse, StatusResponse,
    UploadGroupResponse,
};

use crate::multipart::{self, IMAGES_FIELD, IMAGE_CONTENT_TYPE};
use crate::staged::SpoolFile;

/// Path prefix shared by every endpoint.
const API_PREFIX: &str = "/api/v1";

/// HTTP client for a single Tona service deployment.
#[derive(Clone)]
pub struct TonaApi {
    client: reqwest::Client,
    api_url: String,
}

impl TonaApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `https://api.tona.app`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for sharing timeouts and connection pools).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    /// Build the absolute URL of an endpoint below [`API_PREFIX`].
    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        let raw = format!("{}{API_PREFIX}{path}", self.api_url);
        Url::parse(&raw).map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// Resolve a result URL, which may be relative to the base URL.
    fn resolve(&self, url: &str) -> Result<Url, TransportError> {
        let base = Url::parse(&format!("{}/", self.api_url))
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", self.api_url)))?;
        let resolved = base
            .join(url)
            .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        match resolved.scheme() {
            "http" | "https" => Ok(resolved),
            other => Err(TransportError::InvalidUrl(format!(
                "{url}: unsupported scheme '{other}'"
            ))),
        }
    }

    fn upload_url(&self, slot: GroupSlot) -> Result<Url, TransportError> {
        self.endpoint(&format!("/upload/{}", slot.endpoint_segment()))
    }

    fn image_form(images: &[EncodedImage]) -> Result<reqwest::multipart::Form, TransportError> {
        let mut form = reqwest::multipart::Form::new();
        for image in images {
            let part = reqwest::multipart::Part::bytes(image.bytes.to_vec())
                .file_name(image.file_name.clone())
                .mime_str(IMAGE_CONTENT_TYPE)
                .map_err(|e| TransportError::Encoding(e.to_string()))?;
            form = form.part(IMAGES_FIELD, part);
        }
        Ok(form)
    }
}

impl Transport for TonaApi {
    /// Upload a batch as a single `multipart/form-data` request.
    ///
    /// Sends `POST /upload/{first|second}-group` with one `images` part per
    /// file.
    async fn upload_group(
        &self,
        slot: GroupSlot,
        images: &[EncodedImage],
    ) -> Result<UploadGroupResponse, TransportError> {
        let url = self.upload_url(slot)?;
        let form = Self::image_form(images)?;

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        parse_response(response).await
    }

    /// Upload a large batch through a spool file and a background task.
    ///
    /// The multipart body is written part by part to a temporary file. A
    /// spawned task streams the file as the request body with an explicit
    /// `Content-Length`; the spool file is removed when the task ends,
    /// whatever the outcome.
    async fn upload_group_staged(
        &self,
        slot: GroupSlot,
        images: &[EncodedImage],
    ) -> Result<UploadGroupResponse, TransportError> {
        let url = self.upload_url(slot)?;
        let boundary = multipart::new_boundary();
        let spool = SpoolFile::write(images, &boundary).await?;

        tracing::info!(
            slot = %slot,
            parts = images.len(),
            spool = %spool.path().display(),
            "Starting staged upload",
        );

        let client = self.client.clone();
        let task = tokio::spawn(async move {
            let (file, len) = spool.open().await?;
            let response = client
                .post(url)
                .header(CONTENT_TYPE, multipart::content_type(&boundary))
                .header(CONTENT_LENGTH, len)
                .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
                .send()
                .await
                .map_err(map_reqwest_error)?;
            drop(spool);
            parse_response::<UploadGroupResponse>(response).await
        });

        task.await.map_err(|e| {
            tracing::error!(error = %e, "Staged upload task did not complete");
            TransportError::InvalidResponse(0)
        })?
    }

    /// Start a processing job.
    ///
    /// Sends `POST /process/start` with both group ids and optional options.
    async fn start_processing(
        &self,
        request: &ProcessingRequest,
    ) -> Result<ProcessingResponse, TransportError> {
        let response = self
            .client
            .post(self.endpoint("/process/start")?)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        parse_response(response).await
    }

    /// Sends `GET /status/{job_id}`.
    async fn check_status(&self, job_id: &str) -> Result<StatusResponse, TransportError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/status/{job_id}"))?)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        parse_response(response).await
    }

    /// Sends `GET /result/{job_id}`.
    async fn get_result(&self, job_id: &str) -> Result<ResultResponse, TransportError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/result/{job_id}"))?)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        parse_response(response).await
    }

    /// Sends `POST /cancel/{job_id}`.
    async fn cancel_job(&self, job_id: &str) -> Result<CancelResponse, TransportError> {
        let response = self
            .client
            .post(self.endpoint(&format!("/cancel/{job_id}"))?)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        parse_response(response).await
    }

    /// Fetch the bytes behind a result URL (absolute, or relative to the
    /// base URL).
    async fn download(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .get(self.resolve(url)?)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let response = ensure_success(response).await?;
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        if bytes.is_empty() {
            return Err(TransportError::NoData);
        }
        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

/// Map a [`reqwest::Error`] that occurred before a status was available.
pub(crate) fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_decode() {
        TransportError::Decoding(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidUrl(error.to_string())
    } else {
        TransportError::NoConnection(error.to_string())
    }
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or the status-mapped [`TransportError`] on failure.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        tracing::warn!(status = status.as_u16(), body = %body, "Tona API returned an error status");
        return Err(TransportError::from_status(status.as_u16(), body));
    }
    Ok(response)
}

/// Parse a successful JSON response body into the expected type.
async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, TransportError> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await.map_err(map_reqwest_error)?;
    serde_json::from_slice(&bytes).map_err(|e| TransportError::Decoding(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
