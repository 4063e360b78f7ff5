//! Session change notifications.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`SessionEvent`]: the envelope published for every session mutation.

pub mod bus;

pub use bus::{EventBus, SessionEvent, SessionEventKind};
