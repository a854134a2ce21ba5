//! Event log error types

use thiserror::Error;

use crate::retry::Retryable;

/// Errors from publishing to or consuming from the event log
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("consumer {0} is no longer a member of its group")]
    NotMember(u64),
}

impl EventLogError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EventLogError::Unavailable(_))
    }
}

impl Retryable for EventLogError {
    fn is_retryable(&self) -> bool {
        EventLogError::is_retryable(self)
    }
}
