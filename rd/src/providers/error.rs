//! Provider and roster error types

use std::time::Duration;

use thiserror::Error;

use crate::retry::Retryable;

/// Failures talking to a provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {0} is unavailable")]
    Unavailable(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("invalid provider configuration: {0}")]
    Config(String),
}

impl ProviderError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Unavailable(_) => true,
            ProviderError::Timeout(_) => true,
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Network(_) => true,
            ProviderError::InvalidResponse(_) => false,
            ProviderError::Config(_) => false,
        }
    }
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        ProviderError::is_retryable(self)
    }
}

/// Failures resolving the provider roster
#[derive(Debug, Error, PartialEq)]
pub enum RosterError {
    #[error("provider roster unavailable: {0}")]
    Unavailable(String),

    #[error("provider not found: {0}")]
    NotFound(String),
}

impl RosterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RosterError::Unavailable(_))
    }
}
