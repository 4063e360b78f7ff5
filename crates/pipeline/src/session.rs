//! The session: single source of truth for one user's workflow.
//!
//! [`SessionStore`] owns the uploaded groups, the current job, the
//! orchestration state, downloaded results, the error history and the retry
//! slot. Components hold an `Arc<SessionStore>` and change it only through
//! the named methods below; each mutation publishes a [`SessionEvent`] on the
//! store's [`EventBus`].
//!
//! Status-derived mutations are gated by a [`PollTicket`]. Only the holder of
//! the active ticket may change the job's status or progress, and revoking
//! the ticket happens under the same write lock, so once a revocation returns
//! no in-flight poll can land.
//!
//! [`SessionEvent`]: tona_events::SessionEvent

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tona_core::error::{DomainError, ProcessingError, Severity, ValidationError};
use tona_core::imaging::EncodedImage;
use tona_core::job::{Job, JobStatus, OrchestrationState};
use tona_core::types::{GroupId, GroupSlot, JobId, SharedImage, Timestamp};
use tona_core::wire::{ProcessingOptions, ProcessingRequest, StatusResponse};
use tona_events::{EventBus, SessionEvent, SessionEventKind};

use crate::notices::{ErrorSurface, Notice};
use crate::retry::RetryableAction;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A batch uploaded to one of the two group slots.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadGroup {
    pub slot: GroupSlot,
    pub images: Vec<EncodedImage>,
    pub group_id: Option<GroupId>,
}

/// Results materialized for a completed job.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub job_id: JobId,
    /// Successfully decoded images, in result order.
    pub images: Vec<SharedImage>,
    /// Download attempts accounted for, successful or not.
    pub completed: usize,
    /// Attempts that produced no image.
    pub failed: usize,
    pub total: usize,
    pub is_loading: bool,
}

impl ResultSet {
    fn loading(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            images: Vec::new(),
            completed: 0,
            failed: 0,
            total: 0,
            is_loading: true,
        }
    }

    /// `completed / total`, or 1.0 for an empty set that finished loading.
    pub fn download_progress(&self) -> f64 {
        if self.total == 0 {
            if self.is_loading {
                0.0
            } else {
                1.0
            }
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// One entry of the append-only error history.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub error: DomainError,
    pub at: Timestamp,
}

/// Permission to apply status reports for one polling run of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTicket {
    job_id: JobId,
    epoch: u64,
}

impl PollTicket {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

/// What the poller should do after a status report was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum PollVerdict {
    /// The job is still pending or processing.
    Continue,
    Completed,
    Failed(DomainError),
    /// The service reports the job as cancelled.
    Cancelled,
    /// The ticket is no longer active; the report was ignored.
    Revoked,
}

/// Outcome of asking to materialize results for a job.
#[derive(Debug, Clone)]
pub enum ResultsClaim {
    /// The caller now owns loading the results.
    Started,
    /// Results are already present or loading.
    Existing(ResultSet),
    /// The job is not the session's completed job.
    Stale,
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// A full copy of the session, as returned by [`SessionStore::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub first_group: Option<UploadGroup>,
    pub second_group: Option<UploadGroup>,
    /// Every group id the service has issued in this session, in order.
    pub uploaded_group_ids: Vec<GroupId>,
    pub job: Option<Job>,
    pub state: OrchestrationState,
    pub results: Option<ResultSet>,
    pub errors: Vec<ErrorRecord>,
    pub current_error: Option<DomainError>,
    pub surface: ErrorSurface,
    poll: Option<PollTicket>,
    epoch: u64,
}

impl SessionState {
    pub fn group(&self, slot: GroupSlot) -> Option<&UploadGroup> {
        match slot {
            GroupSlot::First => self.first_group.as_ref(),
            GroupSlot::Second => self.second_group.as_ref(),
        }
    }

    fn group_mut(&mut self, slot: GroupSlot) -> &mut Option<UploadGroup> {
        match slot {
            GroupSlot::First => &mut self.first_group,
            GroupSlot::Second => &mut self.second_group,
        }
    }

    fn group_id(&self, slot: GroupSlot) -> Option<&GroupId> {
        self.group(slot).and_then(|g| g.group_id.as_ref())
    }

    /// Both group ids are known and no upload or job is in flight.
    pub fn can_start_processing(&self) -> bool {
        self.group_id(GroupSlot::First).is_some()
            && self.group_id(GroupSlot::Second).is_some()
            && self.state.accepts_new_job()
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    pub fn download_progress(&self) -> f64 {
        self.results
            .as_ref()
            .map_or(0.0, ResultSet::download_progress)
    }

    fn is_active(&self, ticket: &PollTicket) -> bool {
        self.poll.as_ref() == Some(ticket)
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

pub struct SessionStore {
    state: RwLock<SessionState>,
    retry: Mutex<Option<Arc<dyn RetryableAction>>>,
    events: EventBus,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_events(EventBus::default())
    }

    pub fn with_events(events: EventBus) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            retry: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn state(&self) -> OrchestrationState {
        self.state.read().await.state.clone()
    }

    pub async fn job(&self) -> Option<Job> {
        self.state.read().await.job.clone()
    }

    pub async fn results(&self) -> Option<ResultSet> {
        self.state.read().await.results.clone()
    }

    pub async fn can_start_processing(&self) -> bool {
        self.state.read().await.can_start_processing()
    }

    /// Build the start request from the stored group ids, if a job may be
    /// started now.
    pub async fn start_request(&self, options: Option<ProcessingOptions>) -> Option<ProcessingRequest> {
        let s = self.state.read().await;
        if !s.can_start_processing() {
            return None;
        }
        Some(ProcessingRequest {
            first_group_id: s.group_id(GroupSlot::First)?.clone(),
            second_group_id: s.group_id(GroupSlot::Second)?.clone(),
            options,
        })
    }

    // ---- uploads ----

    /// Enter `Uploading` for `slot`.
    ///
    /// Refused with [`ValidationError::JobInProgress`] while an upload, a
    /// job or a cancellation is in flight, or while a poll ticket is
    /// active. The refusal is recorded and the state is left alone.
    pub async fn begin_upload(&self, slot: GroupSlot) -> Result<(), DomainError> {
        let mut s = self.state.write().await;
        if s.state.is_busy() || s.poll.is_some() {
            tracing::warn!(slot = %slot, state = s.state.name(), "Upload refused while a job is in flight");
            let error: DomainError = ValidationError::JobInProgress.into();
            self.record_error(&mut s, error.clone());
            return Err(error);
        }
        tracing::info!(slot = %slot, "Uploading group");
        self.transition(&mut s, OrchestrationState::Uploading);
        Ok(())
    }

    /// Store a successfully uploaded batch and return to `Idle`.
    pub async fn record_upload(&self, slot: GroupSlot, images: Vec<EncodedImage>, group_id: GroupId) {
        let mut s = self.state.write().await;
        *s.group_mut(slot) = Some(UploadGroup {
            slot,
            images,
            group_id: Some(group_id.clone()),
        });
        s.uploaded_group_ids.push(group_id.clone());
        tracing::info!(slot = %slot, group_id = %group_id, "Group uploaded");
        self.events.publish(SessionEventKind::GroupUploaded { slot, group_id });
        self.transition(&mut s, OrchestrationState::Idle);
    }

    // ---- errors ----

    /// Record an error without changing the orchestration state.
    pub async fn add_error(&self, error: DomainError) -> Severity {
        self.add_error_with_retry(error, None).await
    }

    /// Record an error, storing `retry` in the retry slot first when the
    /// error is retryable. Subscribers see the new action by the time the
    /// error event arrives.
    pub async fn add_error_with_retry(
        &self,
        error: DomainError,
        retry: Option<Arc<dyn RetryableAction>>,
    ) -> Severity {
        let mut s = self.state.write().await;
        self.arm_retry(&error, retry).await;
        self.record_error(&mut s, error)
    }

    /// Record an error and move to `Failed`.
    pub async fn fail(&self, error: DomainError) -> Severity {
        self.fail_with_retry(error, None).await
    }

    /// [`fail`](Self::fail) with the retry action for this failure.
    pub async fn fail_with_retry(
        &self,
        error: DomainError,
        retry: Option<Arc<dyn RetryableAction>>,
    ) -> Severity {
        let mut s = self.state.write().await;
        self.arm_retry(&error, retry).await;
        let severity = self.record_error(&mut s, error.clone());
        self.transition(&mut s, OrchestrationState::Failed { error });
        severity
    }

    pub async fn clear_current_error(&self) {
        self.state.write().await.current_error = None;
    }

    pub async fn dismiss_blocking(&self) -> Option<DomainError> {
        self.state.write().await.surface.clear_blocking()
    }

    pub async fn dismiss_notice(&self) -> Option<Notice> {
        self.state.write().await.surface.dismiss_notice()
    }

    // ---- job ----

    /// Replace any previous job and results with a fresh pending job and
    /// issue the ticket its poller must present.
    pub async fn begin_job(&self, job_id: &str) -> PollTicket {
        let mut s = self.state.write().await;
        s.job = Some(Job::new(job_id));
        s.results = None;
        let ticket = self.issue_ticket(&mut s, job_id);
        tracing::info!(job_id = %job_id, "Job started");
        self.events.publish(SessionEventKind::JobStarted {
            job_id: job_id.to_string(),
        });
        self.transition(&mut s, OrchestrationState::Processing { progress: 0.0 });
        ticket
    }

    /// Issue a new ticket for the current job after a polling failure.
    ///
    /// Returns `None` if `job_id` is not the current job or the job already
    /// reached a terminal status.
    pub async fn resume_job(&self, job_id: &str) -> Option<PollTicket> {
        let mut s = self.state.write().await;
        let progress = s
            .job
            .as_ref()
            .filter(|job| job.id == job_id && job.status.accepts_updates())?
            .progress;
        let ticket = self.issue_ticket(&mut s, job_id);
        tracing::info!(job_id = %job_id, "Resuming status polling");
        self.transition(&mut s, OrchestrationState::Processing { progress });
        Some(ticket)
    }

    /// Fold one status report into the job, if `ticket` is still active.
    ///
    /// A `failed` report stores `on_job_failed` in the retry slot along
    /// with the error.
    pub async fn apply_status(
        &self,
        ticket: &PollTicket,
        report: &StatusResponse,
        on_job_failed: Option<Arc<dyn RetryableAction>>,
    ) -> PollVerdict {
        let mut s = self.state.write().await;
        if !s.is_active(ticket) {
            return PollVerdict::Revoked;
        }

        let applied = match s.job.as_mut().filter(|job| job.id == ticket.job_id) {
            Some(job) => job
                .apply_report(report.status, report.progress, report.message.clone())
                .then(|| (job.progress, job.message.clone())),
            None => None,
        };
        let Some((progress, message)) = applied else {
            s.poll = None;
            return PollVerdict::Revoked;
        };

        tracing::debug!(
            job_id = %ticket.job_id,
            status = ?report.status,
            progress,
            "Status applied",
        );
        self.events.publish(SessionEventKind::JobProgress {
            job_id: ticket.job_id.clone(),
            progress,
            message,
        });

        match report.status {
            JobStatus::Pending | JobStatus::Processing => {
                self.transition(&mut s, OrchestrationState::Processing { progress });
                PollVerdict::Continue
            }
            JobStatus::Completed => {
                s.poll = None;
                tracing::info!(job_id = %ticket.job_id, "Job completed");
                self.transition(&mut s, OrchestrationState::Completed);
                PollVerdict::Completed
            }
            JobStatus::Failed => {
                s.poll = None;
                let reason = report
                    .message
                    .clone()
                    .unwrap_or_else(|| "Processing failed".to_string());
                let error: DomainError = ProcessingError::JobFailed(reason).into();
                self.arm_retry(&error, on_job_failed).await;
                self.record_error(&mut s, error.clone());
                self.transition(
                    &mut s,
                    OrchestrationState::Failed {
                        error: error.clone(),
                    },
                );
                PollVerdict::Failed(error)
            }
            JobStatus::Cancelled => {
                s.poll = None;
                s.job = None;
                tracing::info!(job_id = %ticket.job_id, "Job cancelled by the service");
                self.transition(&mut s, OrchestrationState::Idle);
                PollVerdict::Cancelled
            }
        }
    }

    /// End a polling run with an error, storing `retry` with it. Ignored
    /// (returns `false`) if the ticket was revoked in the meantime.
    pub async fn fail_poll(
        &self,
        ticket: &PollTicket,
        error: DomainError,
        retry: Option<Arc<dyn RetryableAction>>,
    ) -> bool {
        let mut s = self.state.write().await;
        if !s.is_active(ticket) {
            return false;
        }
        s.poll = None;
        self.arm_retry(&error, retry).await;
        self.record_error(&mut s, error.clone());
        self.transition(&mut s, OrchestrationState::Failed { error });
        true
    }

    /// Revoke `ticket` if it is still the active one.
    pub async fn revoke_polling(&self, ticket: &PollTicket) -> bool {
        let mut s = self.state.write().await;
        if s.is_active(ticket) {
            s.poll = None;
            tracing::debug!(job_id = %ticket.job_id, "Poll ticket revoked");
            true
        } else {
            false
        }
    }

    /// Enter `Cancelled` for the current job, revoking any poll ticket.
    ///
    /// Returns the job to cancel, or `None` when there is no job.
    pub async fn begin_cancel(&self) -> Option<JobId> {
        let mut s = self.state.write().await;
        let job_id = s.job.as_ref()?.id.clone();
        s.poll = None;
        tracing::info!(job_id = %job_id, "Cancelling job");
        self.transition(&mut s, OrchestrationState::Cancelled);
        Some(job_id)
    }

    /// Drop the job and return to `Idle`, recording `error` if the cancel
    /// request failed.
    pub async fn finish_cancel(&self, error: Option<DomainError>) {
        let mut s = self.state.write().await;
        if let Some(error) = error {
            self.record_error(&mut s, error);
        }
        if s.state == OrchestrationState::Cancelled {
            s.job = None;
            self.transition(&mut s, OrchestrationState::Idle);
        }
    }

    // ---- results ----

    /// Claim result loading for the completed job `job_id`.
    pub async fn begin_results(&self, job_id: &str) -> ResultsClaim {
        let mut s = self.state.write().await;
        let completed = s
            .job
            .as_ref()
            .is_some_and(|job| job.id == job_id && job.status == JobStatus::Completed);
        if !completed {
            return ResultsClaim::Stale;
        }
        if let Some(existing) = s.results.as_ref().filter(|r| r.job_id == job_id) {
            return ResultsClaim::Existing(existing.clone());
        }
        s.results = Some(ResultSet::loading(job_id));
        ResultsClaim::Started
    }

    /// Set how many downloads the result set expects.
    pub async fn set_results_total(&self, job_id: &str, total: usize) -> bool {
        let mut s = self.state.write().await;
        match Self::loading_results(&mut s, job_id) {
            Some(results) => {
                results.total = total;
                true
            }
            None => false,
        }
    }

    /// Account for one download attempt; `None` marks a failed attempt.
    pub async fn record_download(&self, job_id: &str, image: Option<SharedImage>) -> bool {
        let mut s = self.state.write().await;
        let Some(results) = Self::loading_results(&mut s, job_id) else {
            return false;
        };
        match image {
            Some(image) => results.images.push(image),
            None => results.failed += 1,
        }
        results.completed += 1;
        let (completed, total) = (results.completed, results.total);
        self.events.publish(SessionEventKind::ResultsProgress {
            job_id: job_id.to_string(),
            completed,
            total,
        });
        true
    }

    /// Mark loading finished and return the final set.
    pub async fn finish_results(&self, job_id: &str) -> Option<ResultSet> {
        let mut s = self.state.write().await;
        let results = Self::loading_results(&mut s, job_id)?;
        results.is_loading = false;
        let finished = results.clone();
        tracing::info!(
            job_id = %job_id,
            images = finished.images.len(),
            failed = finished.failed,
            "Results ready",
        );
        self.events.publish(SessionEventKind::ResultsReady {
            job_id: job_id.to_string(),
            count: finished.images.len(),
        });
        Some(finished)
    }

    /// Discard a loading result set so the fetch can be retried.
    pub async fn abort_results(&self, job_id: &str) {
        let mut s = self.state.write().await;
        if s.results.as_ref().is_some_and(|r| r.job_id == job_id) {
            s.results = None;
        }
    }

    // ---- retry ----

    /// Replace the retry slot's content.
    pub async fn set_retry_action(&self, action: Arc<dyn RetryableAction>) {
        tracing::debug!(label = action.label(), "Retry action stored");
        *self.retry.lock().await = Some(action);
    }

    pub async fn retry_label(&self) -> Option<String> {
        self.retry.lock().await.as_ref().map(|a| a.label().to_string())
    }

    /// Run the retry slot's content once.
    ///
    /// The slot is left in place; a failing retry overwrites it with a new
    /// action. Returns `false` when the slot is empty.
    pub async fn retry(&self) -> bool {
        let Some(action) = self.retry.lock().await.clone() else {
            return false;
        };
        self.state.write().await.surface.clear_blocking();
        tracing::info!(label = action.label(), "Retrying");
        self.events.publish(SessionEventKind::RetryInvoked {
            label: action.label().to_string(),
        });
        action.run().await;
        true
    }

    /// Return to a fresh session. The error history survives for
    /// diagnostics, and poll tickets issued before the reset stay invalid.
    pub async fn reset(&self) {
        let mut s = self.state.write().await;
        let epoch = s.epoch;
        let errors = std::mem::take(&mut s.errors);
        *s = SessionState {
            errors,
            epoch,
            ..SessionState::default()
        };
        *self.retry.lock().await = None;
        tracing::info!("Session reset");
        self.events.publish(SessionEventKind::SessionReset);
        self.events.publish(SessionEventKind::StateChanged {
            state: s.state.name(),
        });
    }

    // ---- private helpers ----

    /// Must be called with the state write lock held, before the error is
    /// recorded.
    async fn arm_retry(&self, error: &DomainError, retry: Option<Arc<dyn RetryableAction>>) {
        if let Some(action) = retry.filter(|_| error.can_retry()) {
            self.set_retry_action(action).await;
        }
    }

    fn transition(&self, s: &mut SessionState, next: OrchestrationState) {
        let changed = s.state.name() != next.name();
        s.state = next;
        if changed {
            tracing::debug!(state = s.state.name(), "Session state changed");
            self.events.publish(SessionEventKind::StateChanged {
                state: s.state.name(),
            });
        }
    }

    fn record_error(&self, s: &mut SessionState, error: DomainError) -> Severity {
        let severity = error.severity();
        tracing::warn!(
            error_id = %error.id(),
            error = %error,
            fatal = error.is_fatal(),
            can_retry = error.can_retry(),
            "Session error",
        );
        self.events.publish(SessionEventKind::error_raised(&error));
        s.surface.present(&error);
        s.errors.push(ErrorRecord {
            error: error.clone(),
            at: chrono::Utc::now(),
        });
        s.current_error = Some(error);
        severity
    }

    fn issue_ticket(&self, s: &mut SessionState, job_id: &str) -> PollTicket {
        s.epoch += 1;
        let ticket = PollTicket {
            job_id: job_id.to_string(),
            epoch: s.epoch,
        };
        s.poll = Some(ticket.clone());
        ticket
    }

    fn loading_results<'a>(s: &'a mut SessionState, job_id: &str) -> Option<&'a mut ResultSet> {
        s.results
            .as_mut()
            .filter(|r| r.job_id == job_id && r.is_loading)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tona_core::error::NetworkError;

    fn report(status: JobStatus, progress: Option<f64>) -> StatusResponse {
        StatusResponse {
            status,
            progress,
            message: None,
        }
    }

    async fn with_groups() -> SessionStore {
        let store = SessionStore::new();
        store.record_upload(GroupSlot::First, vec![], "G1".into()).await;
        store.record_upload(GroupSlot::Second, vec![], "G2".into()).await;
        store
    }

    #[tokio::test]
    async fn start_request_needs_both_groups() {
        let store = SessionStore::new();
        assert!(store.start_request(None).await.is_none());

        store.record_upload(GroupSlot::First, vec![], "G1".into()).await;
        assert!(!store.can_start_processing().await);

        store.record_upload(GroupSlot::Second, vec![], "G2".into()).await;
        let request = store.start_request(None).await.unwrap();
        assert_eq!(request.first_group_id, "G1");
        assert_eq!(request.second_group_id, "G2");
        assert_eq!(store.snapshot().await.uploaded_group_ids, vec!["G1", "G2"]);
    }

    #[tokio::test]
    async fn start_request_refused_while_processing() {
        let store = with_groups().await;
        store.begin_job("J1").await;
        assert!(store.start_request(None).await.is_none());
    }

    #[tokio::test]
    async fn status_updates_progress_and_completes() {
        let store = with_groups().await;
        let ticket = store.begin_job("J1").await;

        let verdict = store
            .apply_status(&ticket, &report(JobStatus::Processing, Some(0.4)), None)
            .await;
        assert_eq!(verdict, PollVerdict::Continue);
        assert_eq!(store.state().await, OrchestrationState::Processing { progress: 0.4 });

        let verdict = store.apply_status(&ticket, &report(JobStatus::Completed, None), None).await;
        assert_eq!(verdict, PollVerdict::Completed);
        assert_eq!(store.state().await, OrchestrationState::Completed);
        assert!(!store.snapshot().await.is_polling());
    }

    #[tokio::test]
    async fn failed_status_records_job_failed() {
        let store = with_groups().await;
        let ticket = store.begin_job("J1").await;

        let verdict = store.apply_status(&ticket, &report(JobStatus::Failed, None), None).await;
        let expected: DomainError = ProcessingError::JobFailed("Processing failed".into()).into();
        assert_eq!(verdict, PollVerdict::Failed(expected.clone()));
        assert_eq!(store.snapshot().await.current_error, Some(expected));
    }

    #[tokio::test]
    async fn revoked_ticket_cannot_mutate() {
        let store = with_groups().await;
        let ticket = store.begin_job("J1").await;
        assert!(store.revoke_polling(&ticket).await);

        let verdict = store.apply_status(&ticket, &report(JobStatus::Completed, None), None).await;
        assert_eq!(verdict, PollVerdict::Revoked);
        assert_matches!(store.state().await, OrchestrationState::Processing { .. });
        assert!(!store.fail_poll(&ticket, NetworkError::Timeout.into(), None).await);
    }

    #[tokio::test]
    async fn new_job_invalidates_old_ticket() {
        let store = with_groups().await;
        let old = store.begin_job("J1").await;
        let _new = store.begin_job("J2").await;
        assert_eq!(
            store.apply_status(&old, &report(JobStatus::Processing, Some(0.9)), None).await,
            PollVerdict::Revoked
        );
    }

    #[tokio::test]
    async fn cancel_without_job_is_noop() {
        let store = SessionStore::new();
        assert!(store.begin_cancel().await.is_none());
        assert_eq!(store.state().await, OrchestrationState::Idle);
    }

    #[tokio::test]
    async fn cancel_resolves_to_idle_even_on_error() {
        let store = with_groups().await;
        store.begin_job("J1").await;
        assert_eq!(store.begin_cancel().await.as_deref(), Some("J1"));
        assert_eq!(store.state().await, OrchestrationState::Cancelled);

        store.finish_cancel(Some(NetworkError::Timeout.into())).await;
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.state, OrchestrationState::Idle);
        assert!(snapshot.job.is_none());
        assert_eq!(snapshot.errors.len(), 1);
    }

    #[tokio::test]
    async fn fatal_errors_go_to_blocking_surface() {
        let store = SessionStore::new();
        assert_eq!(
            store.fail(NetworkError::ServerError(500).into()).await,
            Severity::Blocking
        );
        assert_eq!(store.add_error(NetworkError::Timeout.into()).await, Severity::Transient);

        let snapshot = store.snapshot().await;
        assert!(snapshot.surface.blocking().is_some());
        assert_eq!(snapshot.surface.notices().count(), 1);
        assert_eq!(snapshot.errors.len(), 2);
        assert_eq!(snapshot.current_error, Some(NetworkError::Timeout.into()));
    }

    #[tokio::test]
    async fn results_claim_is_reentrant() {
        let store = with_groups().await;
        let ticket = store.begin_job("J1").await;
        assert_matches!(store.begin_results("J1").await, ResultsClaim::Stale);

        store.apply_status(&ticket, &report(JobStatus::Completed, None), None).await;
        assert_matches!(store.begin_results("J1").await, ResultsClaim::Started);
        assert_matches!(store.begin_results("J1").await, ResultsClaim::Existing(r) if r.is_loading);
    }

    #[tokio::test]
    async fn download_progress_reaches_one() {
        let store = with_groups().await;
        let ticket = store.begin_job("J1").await;
        store.apply_status(&ticket, &report(JobStatus::Completed, None), None).await;
        store.begin_results("J1").await;
        store.set_results_total("J1", 2).await;

        store.record_download("J1", None).await;
        assert_eq!(store.snapshot().await.download_progress(), 0.5);
        store.record_download("J1", None).await;
        let finished = store.finish_results("J1").await.unwrap();
        assert_eq!(finished.download_progress(), 1.0);
        assert_eq!(finished.failed, 2);
        assert!(finished.images.is_empty());
    }

    #[test]
    fn empty_result_set_progress() {
        let mut set = ResultSet::loading("J1");
        assert_eq!(set.download_progress(), 0.0);
        set.is_loading = false;
        assert_eq!(set.download_progress(), 1.0);
    }

    #[tokio::test]
    async fn reset_keeps_history_and_keeps_tickets_invalid() {
        let store = with_groups().await;
        let ticket = store.begin_job("J1").await;
        store.add_error(NetworkError::Timeout.into()).await;
        store.fail(NetworkError::ServerError(502).into()).await;
        store.reset().await;

        let snapshot = store.snapshot().await;
        assert!(snapshot.first_group.is_none());
        assert!(snapshot.job.is_none());
        assert!(snapshot.current_error.is_none());
        assert!(snapshot.surface.is_empty());
        assert_eq!(snapshot.state, OrchestrationState::Idle);
        assert_eq!(snapshot.errors.len(), 2);
        assert_eq!(snapshot.errors[1].error, NetworkError::ServerError(502).into());
        assert_eq!(
            store.apply_status(&ticket, &report(JobStatus::Completed, None), None).await,
            PollVerdict::Revoked
        );
    }

    #[tokio::test]
    async fn mutations_publish_events() {
        let store = SessionStore::new();
        let mut rx = store.subscribe();
        store.begin_upload(GroupSlot::First).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.kind,
            SessionEventKind::StateChanged { state: "uploading" }
        );
    }

    #[tokio::test]
    async fn upload_refused_while_job_is_polled() {
        let store = with_groups().await;
        store.begin_job("J1").await;

        let err = store.begin_upload(GroupSlot::First).await.unwrap_err();
        assert_eq!(err, ValidationError::JobInProgress.into());

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.state, OrchestrationState::Processing { progress: 0.0 });
        assert!(snapshot.is_polling());
        assert_eq!(snapshot.job.map(|j| j.id).as_deref(), Some("J1"));
        assert_eq!(snapshot.current_error, Some(err));
    }

    #[tokio::test]
    async fn upload_allowed_again_once_job_completed() {
        let store = with_groups().await;
        let ticket = store.begin_job("J1").await;
        store.apply_status(&ticket, &report(JobStatus::Completed, None), None).await;

        store.begin_upload(GroupSlot::First).await.unwrap();
        assert_eq!(store.state().await, OrchestrationState::Uploading);
    }

    fn labelled(label: &'static str) -> Arc<dyn RetryableAction> {
        Arc::new(crate::retry::RetryFn::new(label, || futures::FutureExt::boxed(async {})))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retry_slot_is_filled_before_the_error_event() {
        let store = Arc::new(SessionStore::new());
        store
            .fail_with_retry(NetworkError::Timeout.into(), Some(labelled("upload first group")))
            .await;

        let mut rx = store.subscribe();
        let observer = tokio::spawn({
            let store = store.clone();
            async move {
                loop {
                    if let SessionEventKind::ErrorRaised { .. } = rx.recv().await.unwrap().kind {
                        return store.retry_label().await;
                    }
                }
            }
        });

        store
            .fail_with_retry(NetworkError::ServerError(500).into(), Some(labelled("resubmit job")))
            .await;
        assert_eq!(observer.await.unwrap().as_deref(), Some("resubmit job"));
    }

    #[tokio::test]
    async fn non_retryable_failure_does_not_arm_the_slot() {
        let store = SessionStore::new();
        store
            .fail_with_retry(
                NetworkError::RequestFailed("Bad request".into()).into(),
                Some(labelled("resubmit job")),
            )
            .await;
        assert!(store.retry_label().await.is_none());
    }

    #[tokio::test]
    async fn failed_report_arms_the_given_retry() {
        let store = with_groups().await;
        let ticket = store.begin_job("J1").await;
        store
            .apply_status(&ticket, &report(JobStatus::Failed, None), Some(labelled("resubmit job")))
            .await;
        assert_eq!(store.retry_label().await.as_deref(), Some("resubmit job"));
    }
}
