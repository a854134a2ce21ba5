//! Topics and message bodies flowing through the event log

use serde::{Deserialize, Serialize};

use crate::domain::{Proposal, SearchRequest};

/// Feeds the dispatcher
pub const SEARCH_REQUEST_CREATED: &str = "user-search.request-created";

pub const UPDATE_REQUESTED_PREFIX: &str = "routes.update-requested.";
pub const UPDATE_RECEIVED_PREFIX: &str = "routes.update-received.";
pub const UPDATE_FAILED_PREFIX: &str = "routes.update-failed.";

/// Requests addressed to one provider
pub fn update_requested_topic(provider_id: &str) -> String {
    format!("{UPDATE_REQUESTED_PREFIX}{provider_id}")
}

/// Proposals returned by one provider
pub fn update_received_topic(provider_id: &str) -> String {
    format!("{UPDATE_RECEIVED_PREFIX}{provider_id}")
}

/// Failures reported by one provider
pub fn update_failed_topic(provider_id: &str) -> String {
    format!("{UPDATE_FAILED_PREFIX}{provider_id}")
}

/// A caller asked for a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SearchRequestCreated {
    pub request_id: String,
    pub user_id: String,
    pub search: SearchRequest,
}

/// One provider is asked to search on behalf of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RoutesUpdateRequested {
    pub provider_id: String,
    pub request_id: String,
    pub user_id: String,
    pub search: SearchRequest,
}

/// A provider's answer to a request, possibly empty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RoutesUpdateReceived {
    pub provider_id: String,
    pub request_id: String,
    pub proposals: Vec<Proposal>,
}

/// A provider could not answer a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RoutesUpdateFailed {
    pub provider_id: String,
    pub request_id: String,
    pub reason: String,
}
