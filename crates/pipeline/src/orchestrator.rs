//! The job state machine.
//!
//! [`JobOrchestrator`] starts jobs from the session's two group ids, owns
//! the active [`StatusPoller`], fetches results once a job completes and
//! handles cancellation. Each poller is handed the retry actions for its
//! run up front. All state lives in the [`SessionStore`]; the orchestrator
//! only holds the poller handle and the last start request.

use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tona_core::classify::{classify, rejected};
use tona_core::error::{DomainError, ProcessingError, ValidationError};
use tona_core::transport::Transport;
use tona_core::types::JobId;
use tona_core::wire::{ProcessingOptions, ProcessingRequest};

use crate::config::PollConfig;
use crate::poller::{PollOutcome, StatusPoller};
use crate::results::ResultMaterializer;
use crate::retry::{PollRetries, RetryFn, RetryableAction};
use crate::session::{PollTicket, SessionStore};

pub struct JobOrchestrator<T: Transport + 'static> {
    transport: Arc<T>,
    session: Arc<SessionStore>,
    results: Arc<ResultMaterializer<T>>,
    config: PollConfig,
    poller: Mutex<Option<StatusPoller>>,
    /// Most recent start request, resubmitted when the job fails.
    last_request: Mutex<Option<ProcessingRequest>>,
    /// Parent of every poller's token; cancelled on shutdown.
    cancel: CancellationToken,
    this: Weak<Self>,
}

impl<T: Transport + 'static> JobOrchestrator<T> {
    pub fn new(
        transport: Arc<T>,
        session: Arc<SessionStore>,
        results: Arc<ResultMaterializer<T>>,
        config: PollConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            transport,
            session,
            results,
            config,
            poller: Mutex::new(None),
            last_request: Mutex::new(None),
            cancel: CancellationToken::new(),
            this: this.clone(),
        })
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Start a job from the session's two group ids.
    ///
    /// Fails with [`ValidationError::NoImagesSelected`], without any network
    /// call, unless both groups are uploaded and no upload or job is in
    /// flight.
    pub async fn start_processing(&self, options: Option<ProcessingOptions>) -> Result<JobId, DomainError> {
        let Some(request) = self.session.start_request(options).await else {
            let error: DomainError = ValidationError::NoImagesSelected.into();
            self.session.add_error(error.clone()).await;
            return Err(error);
        };
        self.submit(request).await
    }

    /// Send `request` and, on success, begin polling the new job.
    ///
    /// A retryable failure stores a resubmission of exactly this request in
    /// the retry slot.
    pub async fn submit(&self, request: ProcessingRequest) -> Result<JobId, DomainError> {
        self.stop_poller().await;
        *self.last_request.lock().await = Some(request.clone());

        let response = self.transport.start_processing(&request).await;
        let outcome = match response {
            Ok(r) if r.success => match r.job_id {
                Some(job_id) => Ok(job_id),
                None => Err(rejected(r.message, "Failed to start processing")),
            },
            Ok(r) => Err(rejected(r.message, "Failed to start processing")),
            Err(e) => {
                tracing::error!(
                    first_group_id = %request.first_group_id,
                    second_group_id = %request.second_group_id,
                    error = %e,
                    "Start request failed",
                );
                Err(classify(&e))
            }
        };

        match outcome {
            Ok(job_id) => {
                let ticket = self.session.begin_job(&job_id).await;
                self.spawn_poller(ticket).await;
                Ok(job_id)
            }
            Err(error) => {
                let retry = error.can_retry().then(|| self.resubmit_action(request));
                self.session.fail_with_retry(error.clone(), retry).await;
                Err(error)
            }
        }
    }

    /// Cancel the current job.
    ///
    /// Polling is revoked before the cancel request goes out, so no report
    /// still in flight can complete or fail the job afterwards. The session
    /// returns to `Idle` whatever the request's outcome; a failed request is
    /// recorded and returned. Without a job this does nothing.
    pub async fn cancel(&self) -> Result<(), DomainError> {
        self.stop_poller().await;
        let Some(job_id) = self.session.begin_cancel().await else {
            return Ok(());
        };

        let outcome = match self.transport.cancel_job(&job_id).await {
            Ok(r) if r.success => Ok(()),
            Ok(r) => Err(rejected(r.message, "Failed to cancel job")),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Cancel request failed");
                Err(classify(&e))
            }
        };

        self.session.finish_cancel(outcome.clone().err()).await;
        if outcome.is_ok() {
            tracing::info!(job_id = %job_id, "Job cancelled");
        }
        outcome
    }

    /// Restart polling for `job_id` after a polling failure.
    pub async fn resume_polling(&self, job_id: &str) -> Result<(), DomainError> {
        self.stop_poller().await;
        let Some(ticket) = self.session.resume_job(job_id).await else {
            return Err(ProcessingError::InvalidJobId.into());
        };
        self.spawn_poller(ticket).await;
        Ok(())
    }

    /// Stop the active poller, if any, and refuse to start new ones.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.stop_poller().await;
        tracing::info!("Job orchestrator shut down");
    }

    /// Stop polling and clear the session.
    pub async fn reset(&self) {
        self.stop_poller().await;
        self.session.reset().await;
    }

    // ---- private helpers ----

    async fn stop_poller(&self) {
        if let Some(poller) = self.poller.lock().await.take() {
            poller.stop().await;
        }
    }

    async fn spawn_poller(&self, ticket: PollTicket) {
        if self.cancel.is_cancelled() {
            tracing::warn!(job_id = %ticket.job_id(), "Orchestrator is shut down; not polling");
            self.session.revoke_polling(&ticket).await;
            return;
        }

        let job_id = ticket.job_id().to_string();
        let retries = PollRetries {
            job_failed: self
                .last_request
                .lock()
                .await
                .clone()
                .map(|request| self.resubmit_action(request)),
            poll_failed: Some(self.resume_action(job_id.clone())),
        };
        let (poller, outcome) = StatusPoller::spawn(
            self.transport.clone(),
            self.session.clone(),
            ticket,
            self.config.clone(),
            retries,
            self.cancel.child_token(),
        );
        *self.poller.lock().await = Some(poller);

        let this = self.this.clone();
        tokio::spawn(async move {
            let Ok(outcome) = outcome.await else {
                return;
            };
            if let Some(orchestrator) = this.upgrade() {
                orchestrator.on_poll_outcome(job_id, outcome).await;
            }
        });
    }

    /// Failures were recorded by the poller along with their retry action;
    /// only completion needs a follow-up.
    async fn on_poll_outcome(&self, job_id: JobId, outcome: PollOutcome) {
        if outcome != PollOutcome::Completed {
            return;
        }
        if let Err(error) = self.results.fetch(&job_id).await {
            tracing::warn!(job_id = %job_id, error = %error, "Result materialization failed");
        }
    }

    fn resubmit_action(&self, request: ProcessingRequest) -> Arc<dyn RetryableAction> {
        let this = self.this.clone();
        Arc::new(RetryFn::new("resubmit job", move || match this.upgrade() {
            Some(orchestrator) => orchestrator.retry_submit(request.clone()),
            None => async {}.boxed(),
        }))
    }

    fn resume_action(&self, job_id: JobId) -> Arc<dyn RetryableAction> {
        let this = self.this.clone();
        Arc::new(RetryFn::new("resume polling", move || match this.upgrade() {
            Some(orchestrator) => orchestrator.retry_resume(job_id.clone()),
            None => async {}.boxed(),
        }))
    }

    fn retry_submit(self: Arc<Self>, request: ProcessingRequest) -> BoxFuture<'static, ()> {
        async move {
            let _ = self.submit(request).await;
        }
        .boxed()
    }

    fn retry_resume(self: Arc<Self>, job_id: JobId) -> BoxFuture<'static, ()> {
        async move {
            let _ = self.resume_polling(&job_id).await;
        }
        .boxed()
    }
}
