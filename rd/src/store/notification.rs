//! Messages carried on a request's status channel

use std::fmt;
use std::str::FromStr;

const ANSWERED_PREFIX: &str = "provider-answered:";
const FAILED_PREFIX: &str = "provider-failed:";
const COMPLETED: &str = "completed";

/// Progress of one request as seen by a waiting caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusNotification {
    /// A provider's proposals were recorded
    ProviderAnswered(String),
    /// A provider reported a failure; it stays pending
    ProviderFailed(String),
    /// Every expected provider answered
    Completed,
}

impl StatusNotification {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusNotification::Completed)
    }
}

impl fmt::Display for StatusNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusNotification::ProviderAnswered(id) => write!(f, "{ANSWERED_PREFIX}{id}"),
            StatusNotification::ProviderFailed(id) => write!(f, "{FAILED_PREFIX}{id}"),
            StatusNotification::Completed => f.write_str(COMPLETED),
        }
    }
}

impl FromStr for StatusNotification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == COMPLETED {
            return Ok(StatusNotification::Completed);
        }
        if let Some(id) = s.strip_prefix(ANSWERED_PREFIX)
            && !id.is_empty()
        {
            return Ok(StatusNotification::ProviderAnswered(id.to_string()));
        }
        if let Some(id) = s.strip_prefix(FAILED_PREFIX)
            && !id.is_empty()
        {
            return Ok(StatusNotification::ProviderFailed(id.to_string()));
        }
        Err(format!("unrecognized status notification: {s}"))
    }
}
