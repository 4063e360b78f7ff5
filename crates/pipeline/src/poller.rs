//! Recurring status checks for a running job.
//!
//! A [`StatusPoller`] owns one spawned task that asks the service for the
//! job's status, applies each report through the session, and stops on the
//! first terminal status, transport failure, client ceiling, or
//! cancellation. Failures are recorded together with the run's
//! [`PollRetries`], so the retry slot is never behind the error. The task is bound to a [`CancellationToken`] and a
//! [`PollTicket`]; [`StatusPoller::stop`] cancels the one and revokes the
//! other, after which no report from this run can change the session.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tona_core::classify::classify;
use tona_core::error::{DomainError, ProcessingError};
use tona_core::transport::Transport;

use crate::config::PollConfig;
use crate::retry::PollRetries;
use crate::session::{PollTicket, PollVerdict, SessionStore};

/// How a polling run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed,
    /// The service reported the job as failed.
    Failed(DomainError),
    /// The service reported the job as cancelled.
    Cancelled,
    /// A status request failed.
    Errored(DomainError),
    /// The client-side ceiling elapsed before a terminal status.
    TimedOut,
    /// The poller was stopped or its ticket revoked.
    Revoked,
}

/// Handle to a running polling task.
pub struct StatusPoller {
    ticket: PollTicket,
    session: Arc<SessionStore>,
    cancel: CancellationToken,
}

impl StatusPoller {
    /// Spawn the polling loop for `ticket`'s job.
    ///
    /// The first check runs immediately; later checks wait
    /// [`PollConfig::interval`] after the previous one finished. The returned
    /// receiver yields the run's outcome once.
    pub fn spawn<T: Transport + 'static>(
        transport: Arc<T>,
        session: Arc<SessionStore>,
        ticket: PollTicket,
        config: PollConfig,
        retries: PollRetries,
        cancel: CancellationToken,
    ) -> (Self, oneshot::Receiver<PollOutcome>) {
        let (tx, rx) = oneshot::channel();
        tokio::spawn({
            let session = session.clone();
            let ticket = ticket.clone();
            let cancel = cancel.clone();
            async move {
                let outcome = poll_loop(&*transport, &session, &ticket, &config, &retries, &cancel).await;
                tracing::debug!(job_id = %ticket.job_id(), outcome = ?outcome, "Polling ended");
                let _ = tx.send(outcome);
            }
        });

        let poller = Self {
            ticket,
            session,
            cancel,
        };
        (poller, rx)
    }

    /// Stop polling. Once this returns, no status report from this run can
    /// reach the session, even one already in flight.
    pub async fn stop(self) {
        self.cancel.cancel();
        if self.session.revoke_polling(&self.ticket).await {
            tracing::info!(job_id = %self.ticket.job_id(), "Status polling stopped");
        }
    }
}

async fn poll_loop<T: Transport>(
    transport: &T,
    session: &SessionStore,
    ticket: &PollTicket,
    config: &PollConfig,
    retries: &PollRetries,
    cancel: &CancellationToken,
) -> PollOutcome {
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        if config
            .max_duration
            .is_some_and(|max| started.elapsed() >= max)
        {
            tracing::warn!(job_id = %ticket.job_id(), attempt, "Polling ceiling reached");
            let error = ProcessingError::Timeout.into();
            return if session.fail_poll(ticket, error, retries.poll_failed.clone()).await {
                PollOutcome::TimedOut
            } else {
                PollOutcome::Revoked
            };
        }

        attempt += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Revoked,
            result = transport.check_status(ticket.job_id()) => result,
        };

        match result {
            Ok(report) => match session.apply_status(ticket, &report, retries.job_failed.clone()).await {
                PollVerdict::Continue => {}
                PollVerdict::Completed => return PollOutcome::Completed,
                PollVerdict::Failed(error) => return PollOutcome::Failed(error),
                PollVerdict::Cancelled => return PollOutcome::Cancelled,
                PollVerdict::Revoked => return PollOutcome::Revoked,
            },
            Err(e) => {
                tracing::error!(job_id = %ticket.job_id(), attempt, error = %e, "Status request failed");
                let error = classify(&e);
                return if session.fail_poll(ticket, error.clone(), retries.poll_failed.clone()).await {
                    PollOutcome::Errored(error)
                } else {
                    PollOutcome::Revoked
                };
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Revoked,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}
