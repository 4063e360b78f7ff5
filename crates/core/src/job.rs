//! Remote job record and the client-side orchestration state machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::types::JobId;

/// Status reported by the service for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, Failed and Cancelled accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Pending and Processing may loop on each other; terminal states are
    /// final.
    pub fn accepts_updates(self) -> bool {
        !self.is_terminal()
    }
}

/// A job as tracked by the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Fraction complete in `0.0..=1.0`, never decreasing.
    pub progress: f64,
    pub message: Option<String>,
}

impl Job {
    /// A freshly started job, pending with zero progress.
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            progress: 0.0,
            message: None,
        }
    }

    /// Fold one status report into the record.
    ///
    /// Returns `false` (leaving the record untouched) when the job is already
    /// terminal. Progress is clamped to `0.0..=1.0` and never moves backwards.
    pub fn apply_report(
        &mut self,
        status: JobStatus,
        progress: Option<f64>,
        message: Option<String>,
    ) -> bool {
        if !self.status.accepts_updates() {
            return false;
        }
        self.status = status;
        if let Some(p) = progress.filter(|p| p.is_finite()) {
            self.progress = self.progress.max(p.clamp(0.0, 1.0));
        }
        if status == JobStatus::Completed {
            self.progress = 1.0;
        }
        if message.is_some() {
            self.message = message;
        }
        true
    }
}

/// Client-side phase of the overall flow.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OrchestrationState {
    #[default]
    Idle,
    Uploading,
    Processing {
        progress: f64,
    },
    Completed,
    Failed {
        error: DomainError,
    },
    /// A cancel request is in flight; always resolves to `Idle`.
    Cancelled,
}

impl OrchestrationState {
    /// Short machine-readable name, used in events and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Processing { .. } => "processing",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// An upload or a job is in progress.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Uploading | Self::Processing { .. } | Self::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Cancelled)
    }

    /// Whether a new job may be started from this state.
    pub fn accepts_new_job(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed { .. } | Self::Completed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
