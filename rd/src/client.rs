//! Caller entry point: publish a search and wait for its merged answer

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{CachePredicate, QueryError};
use crate::domain::{SearchRequest, SearchResponse};
use crate::events::{EventLog, EventLogError, SEARCH_REQUEST_CREATED, SearchRequestCreated, publish_json};
use crate::retry::RetryPolicy;
use crate::store::{Correlations, StoreError};
use crate::waiter::CompletionWaiter;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("user id must not be empty")]
    MissingUser,

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("correlation store: {0}")]
    Store(#[from] StoreError),

    #[error("event log: {0}")]
    EventLog(#[from] EventLogError),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::MissingUser => false,
            ClientError::Query(e) => e.is_retryable(),
            ClientError::Store(e) => e.is_retryable(),
            ClientError::EventLog(e) => e.is_retryable(),
        }
    }
}

#[derive(Clone)]
pub struct SearchClient {
    log: Arc<dyn EventLog>,
    correlations: Correlations,
    waiter: CompletionWaiter,
    retry: RetryPolicy,
}

impl SearchClient {
    pub fn new(
        log: Arc<dyn EventLog>,
        correlations: Correlations,
        waiter: CompletionWaiter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            log,
            correlations,
            waiter,
            retry,
        }
    }

    /// Search under a fresh request id
    pub async fn search(&self, user_id: &str, request: SearchRequest) -> Result<SearchResponse, ClientError> {
        let request_id = Uuid::now_v7().to_string();
        self.search_with_id(&request_id, user_id, request).await
    }

    /// Search under a caller-chosen request id, unique per logical search
    pub async fn search_with_id(
        &self,
        request_id: &str,
        user_id: &str,
        request: SearchRequest,
    ) -> Result<SearchResponse, ClientError> {
        debug!(
            request_id,
            user_id,
            origin = %request.origin,
            destination = %request.destination,
            "SearchClient::search_with_id: called"
        );
        if user_id.trim().is_empty() {
            return Err(ClientError::MissingUser);
        }
        if request.only_cached() {
            CachePredicate::from_request(&request)?;
        }

        // subscribe before publishing so a fast completion is not missed
        let pending = self.waiter.watch(request_id).await?;

        let event = SearchRequestCreated {
            request_id: request_id.to_string(),
            user_id: user_id.to_string(),
            search: request,
        };
        self.retry
            .run("SearchClient::publish", || {
                publish_json(self.log.as_ref(), SEARCH_REQUEST_CREATED, request_id, &event)
            })
            .await?;
        info!(request_id, "Search published");

        Ok(pending.wait().await?)
    }

    /// True when `user_id` may search and the correlation store answers
    pub async fn is_available(&self, user_id: &str) -> bool {
        debug!(user_id, "SearchClient::is_available: called");
        !user_id.trim().is_empty() && self.correlations.is_available().await
    }
}
