//! Job lifecycle orchestration for the Tona processing service.
//!
//! Drives the remote workflow (upload both groups, start a job, poll its
//! status, fetch and download results) against any [`Transport`], keeping the
//! outcome of every step in a shared [`SessionStore`].
//!
//! [`Transport`]: tona_core::transport::Transport

pub mod config;
pub mod notices;
pub mod orchestrator;
pub mod poller;
pub mod results;
pub mod retry;
pub mod session;
pub mod upload;

pub use config::{PipelineConfig, PollConfig, UploadConfig};
pub use orchestrator::JobOrchestrator;
pub use poller::{PollOutcome, StatusPoller};
pub use results::ResultMaterializer;
pub use retry::{PollRetries, RetryFn, RetryableAction};
pub use session::{ResultSet, SessionState, SessionStore, UploadGroup};
pub use upload::UploadPipeline;
