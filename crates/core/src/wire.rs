//! Request and response bodies exchanged with the processing service.
//!
//! Field names follow the service's camelCase JSON. Optional fields are
//! omitted from requests when unset and default to `None` in responses.

use serde::{Deserialize, Serialize};

use crate::job::JobStatus;
use crate::types::{GroupId, JobId};

/// Response of `POST /upload/{first|second}-group`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadGroupResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

/// Optional tuning forwarded verbatim to the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Body of `POST /process/start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRequest {
    pub first_group_id: GroupId,
    pub second_group_id: GroupId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ProcessingOptions>,
}

/// Response of `POST /process/start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResponse {
    pub success: bool,
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `GET /status/{jobId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: JobStatus,
    /// Fraction complete in `0.0..=1.0`.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `GET /result/{jobId}`.
///
/// On success either `data` (base64-encoded image bytes) or at least one
/// result URL is populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultResponse {
    pub success: bool,
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub result_urls: Option<Vec<String>>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ResultResponse {
    /// All URLs to download, list entries first, without duplicates.
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.result_urls.clone().unwrap_or_default();
        if let Some(single) = &self.result_url {
            if !urls.contains(single) {
                urls.push(single.clone());
            }
        }
        urls
    }
}

/// Response of `POST /cancel/{jobId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
