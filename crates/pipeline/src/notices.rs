//! Where recorded errors are presented.
//!
//! Fatal errors occupy a single blocking slot until dismissed or retried.
//! Everything else becomes a dismissible notice, offering a retry when the
//! error allows one.

use std::collections::VecDeque;

use tona_core::error::DomainError;

/// Notices kept before the oldest is dropped.
const MAX_NOTICES: usize = 16;

/// A transient, dismissible error message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub error: DomainError,
    pub retry_offered: bool,
}

impl Notice {
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorSurface {
    blocking: Option<DomainError>,
    notices: VecDeque<Notice>,
}

impl ErrorSurface {
    /// Route an error to the blocking slot or the notice queue.
    pub fn present(&mut self, error: &DomainError) {
        if error.is_fatal() {
            self.blocking = Some(error.clone());
            return;
        }
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            error: error.clone(),
            retry_offered: error.can_retry(),
        });
    }

    pub fn blocking(&self) -> Option<&DomainError> {
        self.blocking.as_ref()
    }

    pub fn clear_blocking(&mut self) -> Option<DomainError> {
        self.blocking.take()
    }

    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    /// Remove and return the oldest notice.
    pub fn dismiss_notice(&mut self) -> Option<Notice> {
        self.notices.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.blocking.is_none() && self.notices.is_empty()
    }
}
