//! Domain types shared by every Tona crate.
//!
//! Holds the error taxonomy and its classifier, the wire contract of the
//! remote processing service, the [`transport::Transport`] seam, the job
//! state machine and image encoding helpers. This crate has no internal
//! workspace dependencies.

pub mod classify;
pub mod error;
pub mod imaging;
pub mod job;
pub mod transport;
pub mod types;
pub mod wire;
