//! Answers cache-only searches against the proposal index

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use super::index::{IndexError, ProposalIndex};
use crate::domain::{Proposal, SearchRequest};
use crate::retry::Retryable;

/// Errors from cache queries
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("malformed cache predicate: {0}")]
    Malformed(String),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl QueryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::Malformed(_) => false,
            QueryError::Index(e) => e.is_retryable(),
        }
    }
}

impl Retryable for QueryError {
    fn is_retryable(&self) -> bool {
        QueryError::is_retryable(self)
    }
}

/// Exact match on origin, destination and departure; optional bounds on the rest
#[derive(Debug, Clone, PartialEq)]
pub struct CachePredicate {
    pub origin: String,
    pub destination: String,
    pub origin_time: DateTime<Utc>,
    pub destination_time: Option<DateTime<Utc>>,
    pub max_price: Option<f64>,
    pub min_valid_until: Option<DateTime<Utc>>,
}

impl CachePredicate {
    /// Build the predicate for a search that asked for cached data only
    pub fn from_request(request: &SearchRequest) -> Result<Self, QueryError> {
        if !request.only_cached() {
            return Err(QueryError::Malformed("search does not ask for cached data only".to_string()));
        }
        if request.origin.trim().is_empty() || request.destination.trim().is_empty() {
            return Err(QueryError::Malformed("origin and destination are required".to_string()));
        }
        if let Some(max) = request.max_price()
            && (max.is_nan() || max < 0.0)
        {
            return Err(QueryError::Malformed(format!("max price out of range: {max}")));
        }
        Ok(Self {
            origin: request.origin.clone(),
            destination: request.destination.clone(),
            origin_time: request.origin_time,
            destination_time: request.destination_time(),
            max_price: request.max_price(),
            min_valid_until: request.min_valid_until(),
        })
    }

    /// Raise the validity lower bound to `now` when it is unset or earlier
    pub fn hiding_expired(mut self, now: DateTime<Utc>) -> Self {
        self.min_valid_until = Some(self.min_valid_until.map_or(now, |min| min.max(now)));
        self
    }
}

/// Runs cache predicates against the proposal index
#[derive(Debug, Clone)]
pub struct CacheQueryEngine {
    index: ProposalIndex,
    hide_expired: bool,
}

impl CacheQueryEngine {
    pub fn new(index: ProposalIndex, hide_expired: bool) -> Self {
        Self { index, hide_expired }
    }

    /// Matching proposals; empty when nothing matches
    pub async fn find(&self, request: &SearchRequest) -> Result<Vec<Proposal>, QueryError> {
        debug!(origin = %request.origin, destination = %request.destination, "CacheQueryEngine::find: called");
        let mut predicate = CachePredicate::from_request(request)?;
        if self.hide_expired {
            predicate = predicate.hiding_expired(Utc::now());
        }
        let proposals = self.index.find(predicate).await?;
        debug!(count = proposals.len(), "CacheQueryEngine::find: done");
        Ok(proposals)
    }
}
