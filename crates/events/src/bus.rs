//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the notify half of the session's subscribe/notify
//! contract: every named mutation on the session publishes one
//! [`SessionEvent`]. The session owns the bus; callers subscribe through
//! the session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tona_core::error::{DomainError, Severity};
use tona_core::types::{GroupId, GroupSlot, JobId};

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// What changed in the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    /// The orchestration state moved (`idle`, `uploading`, `processing`, ...).
    StateChanged { state: &'static str },

    /// A group finished uploading and received its server id.
    GroupUploaded { slot: GroupSlot, group_id: GroupId },

    JobStarted { job_id: JobId },

    /// A status poll was applied to the job.
    JobProgress {
        job_id: JobId,
        progress: f64,
        message: Option<String>,
    },

    /// One more result download was accounted for.
    ResultsProgress {
        job_id: JobId,
        completed: usize,
        total: usize,
    },

    /// Result materialization finished.
    ResultsReady { job_id: JobId, count: usize },

    /// An error was appended to the history. When `can_retry` is set, the
    /// session's retry slot already holds the action for this error.
    ErrorRaised {
        error_id: String,
        message: String,
        severity: Severity,
        can_retry: bool,
    },

    /// The user invoked the retry slot.
    RetryInvoked { label: String },

    SessionReset,
}

impl SessionEventKind {
    /// Build an [`ErrorRaised`](Self::ErrorRaised) from a classified error.
    pub fn error_raised(error: &DomainError) -> Self {
        Self::ErrorRaised {
            error_id: error.id(),
            message: error.to_string(),
            severity: error.severity(),
            can_retry: error.can_retry(),
        }
    }
}

/// A session change stamped with the time it was published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEvent {
    #[serde(flatten)]
    pub kind: SessionEventKind,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Events a subscriber may fall behind by before it starts losing them.
const DEFAULT_CAPACITY: usize = 256;

/// Change notifications for one session.
///
/// The session publishes while it holds its write lock, so every subscriber
/// sees events in the order the mutations happened. Events are not replayed:
/// a subscriber only gets what is published after it subscribed, and one
/// that lags by more than the capacity receives `RecvError::Lagged` and
/// should re-read the session snapshot instead.
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Stamp `kind` and hand it to every current subscriber. Nobody
    /// listening is not an error.
    pub fn publish(&self, kind: SessionEventKind) {
        let _ = self.sender.send(SessionEvent::new(kind));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
