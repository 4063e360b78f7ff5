//! User-initiated retry of the last failed operation.
//!
//! Components that fail with a retryable error store a [`RetryableAction`]
//! in the session's retry slot. Nothing invokes it automatically; the slot
//! is only run when the user asks for a retry.

use std::sync::Arc;

use futures::future::BoxFuture;

/// A deferred, argument-free operation that can be repeated on demand.
///
/// Implementations hold everything needed to repeat the failed call (the
/// exact request, the encoded batch, ...) and reach their component through a
/// weak reference, so a stored action never keeps a component alive.
pub trait RetryableAction: Send + Sync {
    /// Short description used in logs and events, e.g. `resubmit job`.
    fn label(&self) -> &str;

    /// Repeat the operation. Failures are reported through the session like
    /// any other failure, which re-populates the slot when retryable.
    fn run(&self) -> BoxFuture<'static, ()>;
}

/// A [`RetryableAction`] built from a closure.
pub struct RetryFn {
    label: String,
    action: Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>,
}

impl RetryFn {
    pub fn new<F>(label: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            action: Arc::new(action),
        }
    }
}

impl RetryableAction for RetryFn {
    fn label(&self) -> &str {
        &self.label
    }

    fn run(&self) -> BoxFuture<'static, ()> {
        (self.action)()
    }
}

/// Retry actions a polling run hands to the session with each report, so a
/// failure and its retry are recorded together.
#[derive(Clone, Default)]
pub struct PollRetries {
    /// Stored when the service reports the job as failed.
    pub job_failed: Option<Arc<dyn RetryableAction>>,
    /// Stored when a status request fails or the polling ceiling elapses.
    pub poll_failed: Option<Arc<dyn RetryableAction>>,
}

impl std::fmt::Debug for RetryFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryFn").field("label", &self.label).finish()
    }
}
