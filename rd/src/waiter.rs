//! Caller-side wait for a search to complete or run out of time

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{Completion, ResponseStats, SearchResponse};
use crate::retry::RetryPolicy;
use crate::store::{Correlations, StatusNotification, StoreResult, Subscription};

/// Produces [`PendingSearch`]es bounded by a fixed deadline
#[derive(Clone)]
pub struct CompletionWaiter {
    correlations: Correlations,
    deadline: Duration,
    retry: RetryPolicy,
}

impl CompletionWaiter {
    pub fn new(correlations: Correlations, deadline: Duration, retry: RetryPolicy) -> Self {
        Self {
            correlations,
            deadline,
            retry,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Subscribe to `request_id`'s status channel; the deadline starts now
    ///
    /// Call this before the search is published so no notification is missed.
    pub async fn watch(&self, request_id: &str) -> StoreResult<PendingSearch> {
        debug!(
            request_id,
            deadline_ms = self.deadline.as_millis() as u64,
            "CompletionWaiter::watch: called"
        );
        let subscription = self.correlations.subscribe(request_id).await?;
        Ok(PendingSearch {
            request_id: request_id.to_string(),
            subscription,
            correlations: self.correlations.clone(),
            deadline_at: Instant::now() + self.deadline,
            retry: self.retry.clone(),
        })
    }

    /// Watch and wait in one step, for searches published elsewhere
    pub async fn wait(&self, request_id: &str) -> StoreResult<SearchResponse> {
        self.watch(request_id).await?.wait().await
    }
}

/// A subscribed search waiting for `completed` or its deadline
///
/// Dropping it (for instance when the caller is cancelled) unsubscribes.
pub struct PendingSearch {
    request_id: String,
    subscription: Subscription,
    correlations: Correlations,
    deadline_at: Instant,
    retry: RetryPolicy,
}

impl PendingSearch {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Race the deadline against completion, then read whatever was collected
    pub async fn wait(self) -> StoreResult<SearchResponse> {
        let PendingSearch {
            request_id,
            mut subscription,
            correlations,
            deadline_at,
            retry,
        } = self;
        debug!(request_id = %request_id, "PendingSearch::wait: called");

        let mut answered: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let sleep = tokio::time::sleep_until(deadline_at);
        tokio::pin!(sleep);

        let completion = loop {
            tokio::select! {
                _ = &mut sleep => break Completion::TimedOut,
                message = subscription.recv() => {
                    let Some(message) = message else {
                        warn!(request_id = %request_id, "PendingSearch::wait: status channel closed");
                        (&mut sleep).await;
                        break Completion::TimedOut;
                    };
                    match message.parse::<StatusNotification>() {
                        Ok(StatusNotification::Completed) => break Completion::Completed,
                        Ok(StatusNotification::ProviderAnswered(id)) => {
                            if !answered.contains(&id) {
                                answered.push(id);
                            }
                        }
                        Ok(StatusNotification::ProviderFailed(id)) => {
                            if !failed.contains(&id) {
                                failed.push(id);
                            }
                        }
                        Err(e) => warn!(request_id = %request_id, error = %e, "PendingSearch::wait: ignoring message"),
                    }
                }
            }
        };
        subscription.unsubscribe();

        let proposals = retry
            .run("PendingSearch::read_proposals", || correlations.read_proposals(&request_id))
            .await?;
        let stats = ResponseStats::from_proposals(&proposals);
        info!(
            request_id = %request_id,
            ?completion,
            proposals = proposals.len(),
            answered = answered.len(),
            failed = failed.len(),
            "Search finished"
        );

        Ok(SearchResponse {
            request_id,
            proposals,
            stats,
            completion,
            answered,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ResponseCollector;
    use crate::domain::{Location, Proposal, RouteSegment};
    use crate::events::{RoutesUpdateFailed, RoutesUpdateReceived};
    use crate::store::{CorrelationConfig, InMemoryStore, keys};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryStore>, Correlations, CompletionWaiter) {
        let store = Arc::new(InMemoryStore::new());
        let c = Correlations::new(store.clone(), store.clone(), CorrelationConfig::default());
        let waiter = CompletionWaiter::new(c.clone(), Duration::from_secs(5), RetryPolicy::default());
        (store, c, waiter)
    }

    fn received(provider: &str, prices: &[f64]) -> RoutesUpdateReceived {
        let now = Utc::now();
        let proposals = prices
            .iter()
            .map(|price| {
                Proposal::new(
                    None,
                    vec![RouteSegment::new(
                        Location::new("A", now),
                        Location::new("B", now + ChronoDuration::minutes(90)),
                    )],
                    vec![*price],
                    now + ChronoDuration::days(1),
                )
                .unwrap()
            })
            .collect();
        RoutesUpdateReceived {
            provider_id: provider.into(),
            request_id: "42".into(),
            proposals,
        }
    }

    async fn register(c: &Correlations) {
        c.register_pending("42", &["p1".to_string(), "p2".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_before_deadline() {
        let (store, c, waiter) = setup();
        register(&c).await;
        let pending = waiter.watch("42").await.unwrap();
        let start = Instant::now();

        let collector = ResponseCollector::new(c.clone(), RetryPolicy::default(), 0);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            collector.record(&received("p1", &[100.0]), false).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            collector.record(&received("p2", &[80.0, 120.0]), false).await.unwrap();
        });

        let response = pending.wait().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(response.is_complete());
        assert_eq!(response.proposals.len(), 3);
        assert_eq!(response.answered, vec!["p1".to_string(), "p2".to_string()]);
        assert_eq!(response.stats.min_price, 80.0);
        assert_eq!(response.stats.max_price, 120.0);
        assert_eq!(response.stats.min_minutes, 90);
        assert_eq!(store.subscriber_count(&keys::status_channel("42")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_partial_results() {
        let (store, c, waiter) = setup();
        register(&c).await;
        let pending = waiter.watch("42").await.unwrap();
        let start = Instant::now();

        let collector = ResponseCollector::new(c.clone(), RetryPolicy::default(), 0);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            collector.record(&received("p1", &[100.0]), false).await.unwrap();
        });

        let response = pending.wait().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(response.completion, Completion::TimedOut);
        assert_eq!(response.proposals.len(), 1);
        assert_eq!(c.pending_providers("42").await.unwrap(), vec!["p2".to_string()]);
        assert_eq!(store.subscriber_count(&keys::status_channel("42")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_responders_is_empty_not_error() {
        let (_, c, waiter) = setup();
        register(&c).await;
        let response = waiter.wait("42").await.unwrap();
        assert_eq!(response.completion, Completion::TimedOut);
        assert!(response.proposals.is_empty());
        assert_eq!(response.stats, ResponseStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_providers_reported() {
        let (_, c, waiter) = setup();
        register(&c).await;
        let pending = waiter.watch("42").await.unwrap();
        let collector = ResponseCollector::new(c.clone(), RetryPolicy::default(), 0);
        collector
            .note_failure(&RoutesUpdateFailed {
                provider_id: "p2".into(),
                request_id: "42".into(),
                reason: "down".into(),
            })
            .await
            .unwrap();
        let response = pending.wait().await.unwrap();
        assert_eq!(response.failed, vec!["p2".to_string()]);
        assert!(response.answered.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_unsubscribes() {
        let (store, _, waiter) = setup();
        let pending = waiter.watch("42").await.unwrap();
        assert_eq!(store.subscriber_count(&keys::status_channel("42")), 1);
        let cancelled = tokio::time::timeout(Duration::from_secs(1), pending.wait()).await;
        assert!(cancelled.is_err());
        assert_eq!(store.subscriber_count(&keys::status_channel("42")), 0);
    }
}
