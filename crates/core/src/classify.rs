//! Classification of transport failures into [`DomainError`]s.
//!
//! This is the only place raw [`TransportError`]s are interpreted. Callers
//! classify once, at the orchestration boundary, and only ever store or
//! surface the resulting [`DomainError`].

use crate::error::{DomainError, NetworkError};
use crate::transport::TransportError;

/// Convert a transport failure into the user-facing taxonomy.
pub fn classify(error: &TransportError) -> DomainError {
    match error {
        TransportError::NoConnection(_) => NetworkError::NoConnection.into(),
        TransportError::Timeout => NetworkError::Timeout.into(),
        TransportError::InvalidUrl(_) | TransportError::InvalidResponse(0) => {
            NetworkError::InvalidResponse.into()
        }
        TransportError::RequestFailed(detail) => NetworkError::RequestFailed(detail.clone()).into(),
        TransportError::ServerError { status, .. } => NetworkError::ServerError(*status).into(),
        TransportError::InvalidResponse(status) => NetworkError::ServerError(*status).into(),
        TransportError::Decoding(_) | TransportError::Encoding(_) | TransportError::NoData => {
            DomainError::Unknown(error.to_string())
        }
    }
}

/// A well-formed response that reported `success: false`.
///
/// Falls back to `default_message` when the service sent no message.
pub fn rejected(message: Option<String>, default_message: &str) -> DomainError {
    NetworkError::RequestFailed(message.unwrap_or_else(|| default_message.to_string())).into()
}

impl From<TransportError> for DomainError {
    fn from(error: TransportError) -> Self {
        classify(&error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
