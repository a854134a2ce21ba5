//! Turns a search into a provider fan-out or a direct cache answer

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheQueryEngine, QueryError};
use crate::domain::SearchRequest;
use crate::events::{
    Delivery, EventHandler, EventLog, HandleError, RoutesUpdateRequested, SEARCH_REQUEST_CREATED, SearchRequestCreated,
    TopicSelector, publish_json, update_requested_topic,
};
use crate::providers::{ProviderRoster, RosterError};
use crate::retry::RetryPolicy;
use crate::store::{Correlations, StatusNotification, StoreError};

/// Consumer group of the dispatcher
pub const DISPATCHER_GROUP: &str = "dispatcher";

/// Name reported in `provider-answered:` when the cache answered
pub const CACHE_SOURCE: &str = "cache";

/// Errors from dispatching a search
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("provider roster: {0}")]
    Roster(#[from] RosterError),

    #[error("correlation store: {0}")]
    Store(#[from] StoreError),

    #[error("cache query: {0}")]
    Query(#[from] QueryError),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Roster(e) => e.is_retryable(),
            DispatchError::Store(e) => e.is_retryable(),
            DispatchError::Query(e) => e.is_retryable(),
        }
    }
}

/// What dispatching one search did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Request events went out; `published` of `providers` made it to the log
    FannedOut { providers: Vec<String>, published: usize },
    /// Answered from the cache and completed in one step
    Cached { count: usize },
}

pub struct Dispatcher {
    roster: Arc<dyn ProviderRoster>,
    log: Arc<dyn EventLog>,
    correlations: Correlations,
    cache: CacheQueryEngine,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        roster: Arc<dyn ProviderRoster>,
        log: Arc<dyn EventLog>,
        correlations: Correlations,
        cache: CacheQueryEngine,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            roster,
            log,
            correlations,
            cache,
            retry,
        }
    }

    pub fn selector() -> TopicSelector {
        TopicSelector::exact(SEARCH_REQUEST_CREATED)
    }

    pub async fn dispatch(
        &self,
        request_id: &str,
        user_id: &str,
        search: &SearchRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        debug!(request_id, user_id, only_cached = search.only_cached(), "Dispatcher::dispatch: called");
        if search.only_cached() {
            self.answer_from_cache(request_id, search).await
        } else {
            self.fan_out(request_id, user_id, search).await
        }
    }

    async fn fan_out(
        &self,
        request_id: &str,
        user_id: &str,
        search: &SearchRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let providers = self.roster.provider_ids().await?;
        if providers.is_empty() {
            info!(request_id, "No providers in roster, completing immediately");
            self.complete(request_id).await?;
            return Ok(DispatchOutcome::FannedOut {
                providers,
                published: 0,
            });
        }

        // pending set must exist before any provider can answer
        self.retry
            .run("Dispatcher::register_pending", || {
                self.correlations.register_pending(request_id, &providers)
            })
            .await?;

        let publishes = providers.iter().map(|provider_id| async move {
            let event = RoutesUpdateRequested {
                provider_id: provider_id.clone(),
                request_id: request_id.to_string(),
                user_id: user_id.to_string(),
                search: search.clone(),
            };
            let topic = update_requested_topic(provider_id);
            let result = self
                .retry
                .run("Dispatcher::publish", || {
                    publish_json(self.log.as_ref(), &topic, request_id, &event)
                })
                .await;
            (provider_id, result)
        });

        let mut published = 0;
        for (provider_id, result) in join_all(publishes).await {
            match result {
                Ok(_) => published += 1,
                Err(e) => {
                    warn!(
                        request_id,
                        provider = %provider_id,
                        error = %e,
                        "Request event not published, provider stays pending"
                    );
                }
            }
        }

        info!(request_id, providers = providers.len(), published, "Search fanned out");
        Ok(DispatchOutcome::FannedOut { providers, published })
    }

    async fn answer_from_cache(
        &self,
        request_id: &str,
        search: &SearchRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let proposals = self
            .retry
            .run("Dispatcher::cache_find", || self.cache.find(search))
            .await?;
        let count = proposals.len();

        self.retry
            .run("Dispatcher::append_cached", || {
                self.correlations.append_once(request_id, CACHE_SOURCE, &proposals)
            })
            .await?;
        self.correlations
            .notify(request_id, &StatusNotification::ProviderAnswered(CACHE_SOURCE.to_string()))
            .await?;
        self.complete(request_id).await?;

        info!(request_id, count, "Search answered from cache");
        Ok(DispatchOutcome::Cached { count })
    }

    async fn complete(&self, request_id: &str) -> Result<(), StoreError> {
        if self.correlations.claim_completion(request_id).await? {
            self.correlations
                .notify(request_id, &StatusNotification::Completed)
                .await?;
        } else {
            debug!(request_id, "Dispatcher::complete: already completed");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for Dispatcher {
    fn name(&self) -> &str {
        DISPATCHER_GROUP
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandleError> {
        let created: SearchRequestCreated = delivery
            .decode()
            .map_err(|e| HandleError::Malformed(e.to_string()))?;
        match self.dispatch(&created.request_id, &created.user_id, &created.search).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_retryable() => Err(HandleError::Transient(e.to_string())),
            Err(e) => Err(HandleError::Rejected(e.to_string())),
        }
    }
}
