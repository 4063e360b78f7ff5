//! HTTP client for the Tona processing service.
//!
//! [`TonaApi`] implements [`tona_core::transport::Transport`] on top of
//! [`reqwest`]: multipart group uploads (direct or staged through a spool
//! file), job start, status polling, result retrieval, cancellation and
//! result downloads.

pub mod api;
pub mod multipart;
pub mod staged;

pub use api::TonaApi;
