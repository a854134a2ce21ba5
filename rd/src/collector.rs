//! Records provider responses against their request and detects completion
//!
//! Many collectors share the `response-collector` group. Each response event
//! takes its provider off the request's pending set; only the collector whose
//! removal actually changed the set appends the proposals, so redelivered and
//! duplicated events are absorbed. Appends go through a per-provider marker,
//! so one provider contributes to a request at most once whatever mix of
//! events reaches the collectors. The collector that sees the set empty after
//! its own removal claims the completion marker and announces `completed`.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{
    Delivery, EventHandler, HandleError, RoutesUpdateFailed, RoutesUpdateReceived, TopicSelector, UPDATE_FAILED_PREFIX,
    UPDATE_RECEIVED_PREFIX,
};
use crate::retry::RetryPolicy;
use crate::store::{Correlations, SetRemoval, StatusNotification, StoreError};

/// Consumer group shared by all collector instances
pub const COLLECTOR_GROUP: &str = "response-collector";

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("correlation store: {0}")]
    Store(#[from] StoreError),
}

impl CollectError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CollectError::Store(e) => e.is_retryable(),
        }
    }
}

/// What recording one event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Proposals appended; `completed` when this event finished the request
    Recorded { appended: usize, completed: bool },
    /// Provider already answered this request
    Duplicate,
    /// No pending set; appended anyway if the provider had not contributed yet
    Orphaned { appended: usize },
    /// Provider reported a failure and stays pending
    FailureNoted,
}

pub struct ResponseCollector {
    correlations: Correlations,
    retry: RetryPolicy,
    name: String,
}

impl ResponseCollector {
    pub fn new(correlations: Correlations, retry: RetryPolicy, instance: usize) -> Self {
        Self {
            correlations,
            retry,
            name: format!("response-collector-{instance}"),
        }
    }

    pub fn selector() -> TopicSelector {
        TopicSelector::prefixes([UPDATE_RECEIVED_PREFIX, UPDATE_FAILED_PREFIX])
    }

    /// Record one provider's answer
    ///
    /// `redelivered` marks an event the log handed out before; its earlier
    /// attempt may have removed the provider and then failed before
    /// appending. Such an event still appends if the provider has not
    /// contributed to the request yet, and re-checks completion.
    pub async fn record(
        &self,
        event: &RoutesUpdateReceived,
        redelivered: bool,
    ) -> Result<CollectOutcome, CollectError> {
        let request_id = event.request_id.as_str();
        let provider_id = event.provider_id.as_str();
        debug!(
            request_id,
            provider_id,
            count = event.proposals.len(),
            redelivered,
            "ResponseCollector::record: called"
        );

        let removal = self
            .retry
            .run("ResponseCollector::mark_answered", || {
                self.correlations.mark_answered(request_id, provider_id)
            })
            .await?;

        match removal {
            SetRemoval::Removed => {
                let appended = self.append_once(event).await?.unwrap_or(0);
                self.notify(request_id, StatusNotification::ProviderAnswered(provider_id.to_string()))
                    .await?;
                let completed = self.complete_if_done(request_id).await?;
                info!(request_id, provider_id, appended, completed, "Response recorded");
                Ok(CollectOutcome::Recorded { appended, completed })
            }
            SetRemoval::NotMember if redelivered => match self.append_once(event).await? {
                Some(appended) => {
                    self.notify(request_id, StatusNotification::ProviderAnswered(provider_id.to_string()))
                        .await?;
                    let completed = self.complete_if_done(request_id).await?;
                    info!(request_id, provider_id, appended, completed, "Redelivered response recovered");
                    Ok(CollectOutcome::Recorded { appended, completed })
                }
                None => {
                    // an earlier attempt may have appended and then failed before completing
                    let completed = self.complete_if_done(request_id).await?;
                    if !completed {
                        debug!(request_id, provider_id, "ResponseCollector::record: provider already recorded");
                        return Ok(CollectOutcome::Duplicate);
                    }
                    info!(request_id, provider_id, "Redelivered response completed the search");
                    Ok(CollectOutcome::Recorded {
                        appended: 0,
                        completed: true,
                    })
                }
            },
            SetRemoval::NotMember => {
                debug!(request_id, provider_id, "Duplicate response skipped");
                Ok(CollectOutcome::Duplicate)
            }
            SetRemoval::MissingKey => {
                warn!(request_id, provider_id, "No pending set for response, appending without completion");
                let appended = self.append_once(event).await?.unwrap_or(0);
                Ok(CollectOutcome::Orphaned { appended })
            }
        }
    }

    /// Tell the waiting caller a provider failed; it stays pending until its TTL
    pub async fn note_failure(&self, event: &RoutesUpdateFailed) -> Result<CollectOutcome, CollectError> {
        debug!(
            request_id = %event.request_id,
            provider_id = %event.provider_id,
            "ResponseCollector::note_failure: called"
        );
        warn!(
            request_id = %event.request_id,
            provider_id = %event.provider_id,
            reason = %event.reason,
            "Provider failed"
        );
        self.notify(
            &event.request_id,
            StatusNotification::ProviderFailed(event.provider_id.clone()),
        )
        .await?;
        Ok(CollectOutcome::FailureNoted)
    }

    /// Append the event's proposals unless its provider already contributed
    async fn append_once(&self, event: &RoutesUpdateReceived) -> Result<Option<usize>, CollectError> {
        let appended = self
            .retry
            .run("ResponseCollector::append_once", || {
                self.correlations
                    .append_once(&event.request_id, &event.provider_id, &event.proposals)
            })
            .await?;
        Ok(appended)
    }

    /// Publish `completed` if the pending set is empty and nobody claimed it yet
    async fn complete_if_done(&self, request_id: &str) -> Result<bool, CollectError> {
        let remaining = self
            .retry
            .run("ResponseCollector::pending_count", || self.correlations.pending_count(request_id))
            .await?;
        if remaining > 0 {
            debug!(request_id, remaining, "ResponseCollector: still waiting");
            return Ok(false);
        }
        let claimed = self
            .retry
            .run("ResponseCollector::claim_completion", || {
                self.correlations.claim_completion(request_id)
            })
            .await?;
        if !claimed {
            debug!(request_id, "ResponseCollector: completion already announced");
            return Ok(false);
        }
        self.notify(request_id, StatusNotification::Completed).await?;
        info!(request_id, "Search completed");
        Ok(true)
    }

    async fn notify(&self, request_id: &str, notification: StatusNotification) -> Result<(), CollectError> {
        let receivers = self
            .retry
            .run("ResponseCollector::notify", || self.correlations.notify(request_id, &notification))
            .await?;
        debug!(request_id, %notification, receivers, "ResponseCollector::notify: published");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ResponseCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandleError> {
        let result = if delivery.topic.starts_with(UPDATE_FAILED_PREFIX) {
            let event: RoutesUpdateFailed = delivery
                .decode()
                .map_err(|e| HandleError::Malformed(e.to_string()))?;
            self.note_failure(&event).await
        } else {
            let event: RoutesUpdateReceived = delivery
                .decode()
                .map_err(|e| HandleError::Malformed(e.to_string()))?;
            self.record(&event, delivery.attempt > 1).await
        };
        result
            .map(|_| ())
            .map_err(|e| HandleError::Transient(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, Proposal, RouteSegment};
    use crate::store::{CorrelationConfig, InMemoryStore};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryStore>, Correlations) {
        let store = Arc::new(InMemoryStore::new());
        let c = Correlations::new(store.clone(), store.clone(), CorrelationConfig::default());
        (store, c)
    }

    fn collector(c: &Correlations, instance: usize) -> ResponseCollector {
        ResponseCollector::new(c.clone(), RetryPolicy::default(), instance)
    }

    fn received(provider: &str, count: usize) -> RoutesUpdateReceived {
        let now = Utc::now();
        let proposals = (0..count)
            .map(|i| {
                Proposal::new(
                    None,
                    vec![RouteSegment::new(
                        Location::new("A", now),
                        Location::new("B", now + ChronoDuration::hours(1 + i as i64)),
                    )],
                    vec![100.0 + i as f64],
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

    async fn pending(c: &Correlations, ids: &[&str]) {
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        c.register_pending("42", &ids).await.unwrap();
    }

    #[tokio::test]
    async fn test_completes_after_last_provider() {
        let (_, c) = setup();
        pending(&c, &["p1", "p2"]).await;
        let mut sub = c.subscribe("42").await.unwrap();
        let col = collector(&c, 0);

        assert_eq!(
            col.record(&received("p1", 1), false).await.unwrap(),
            CollectOutcome::Recorded {
                appended: 1,
                completed: false
            }
        );
        assert_eq!(
            col.record(&received("p2", 2), false).await.unwrap(),
            CollectOutcome::Recorded {
                appended: 2,
                completed: true
            }
        );
        assert_eq!(sub.recv().await.as_deref(), Some("provider-answered:p1"));
        assert_eq!(sub.recv().await.as_deref(), Some("provider-answered:p2"));
        assert_eq!(sub.recv().await.as_deref(), Some("completed"));
        assert_eq!(c.read_proposals("42").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_is_skipped() {
        let (_, c) = setup();
        pending(&c, &["p1", "p2"]).await;
        let col = collector(&c, 0);
        let event = received("p1", 2);
        col.record(&event, false).await.unwrap();
        assert_eq!(col.record(&event, false).await.unwrap(), CollectOutcome::Duplicate);
        assert_eq!(c.read_proposals("42").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_redelivery_recovers_after_partial_attempt() {
        let (_, c) = setup();
        pending(&c, &["p1"]).await;
        let mut sub = c.subscribe("42").await.unwrap();
        // first attempt removed the provider, then died before appending
        c.mark_answered("42", "p1").await.unwrap();

        let col = collector(&c, 0);
        let event = received("p1", 2);
        assert_eq!(
            col.record(&event, true).await.unwrap(),
            CollectOutcome::Recorded {
                appended: 2,
                completed: true
            }
        );
        assert_eq!(col.record(&event, true).await.unwrap(), CollectOutcome::Duplicate);
        assert_eq!(c.read_proposals("42").await.unwrap().len(), 2);
        assert_eq!(sub.recv().await.as_deref(), Some("provider-answered:p1"));
        assert_eq!(sub.recv().await.as_deref(), Some("completed"));
    }

    #[tokio::test]
    async fn test_second_answer_from_same_provider_is_never_appended() {
        let (_, c) = setup();
        pending(&c, &["p1", "p2"]).await;
        let col = collector(&c, 0);
        col.record(&received("p1", 1), false).await.unwrap();

        // the provider searched again and answered with fresh proposal ids
        let again = received("p1", 1);
        assert_eq!(col.record(&again, false).await.unwrap(), CollectOutcome::Duplicate);
        assert_eq!(col.record(&again, true).await.unwrap(), CollectOutcome::Duplicate);
        assert_eq!(c.read_proposals("42").await.unwrap().len(), 1);
        assert_eq!(c.pending_providers("42").await.unwrap(), vec!["p2".to_string()]);
    }

    #[tokio::test]
    async fn test_redelivery_after_append_only_completes() {
        let (_, c) = setup();
        pending(&c, &["p1"]).await;
        let event = received("p1", 2);
        // first attempt removed and appended, then died before completing
        c.mark_answered("42", "p1").await.unwrap();
        c.append_once("42", "p1", &event.proposals).await.unwrap();

        let col = collector(&c, 0);
        assert_eq!(
            col.record(&event, true).await.unwrap(),
            CollectOutcome::Recorded {
                appended: 0,
                completed: true
            }
        );
        assert_eq!(c.read_proposals("42").await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_redelivery_racing_first_attempt_appends_once() {
        for _ in 0..50 {
            let (_, c) = setup();
            pending(&c, &["p1", "p2"]).await;
            let a = collector(&c, 0);
            let b = collector(&c, 1);
            let event = received("p1", 2);
            let (ra, rb) = tokio::join!(a.record(&event, false), b.record(&event, true));
            ra.unwrap();
            rb.unwrap();
            assert_eq!(c.read_proposals("42").await.unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_orphan_appends_without_completion() {
        let (_, c) = setup();
        let col = collector(&c, 0);
        let event = received("p1", 2);
        assert_eq!(
            col.record(&event, false).await.unwrap(),
            CollectOutcome::Orphaned { appended: 2 }
        );
        assert_eq!(
            col.record(&event, false).await.unwrap(),
            CollectOutcome::Orphaned { appended: 0 }
        );
        assert_eq!(c.read_proposals("42").await.unwrap().len(), 2);
        // nobody claimed completion
        assert!(c.claim_completion("42").await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_leaves_provider_pending() {
        let (_, c) = setup();
        pending(&c, &["p1"]).await;
        let mut sub = c.subscribe("42").await.unwrap();
        let col = collector(&c, 0);
        let failed = RoutesUpdateFailed {
            provider_id: "p1".into(),
            request_id: "42".into(),
            reason: "timeout".into(),
        };
        assert_eq!(col.note_failure(&failed).await.unwrap(), CollectOutcome::FailureNoted);
        assert_eq!(sub.recv().await.as_deref(), Some("provider-failed:p1"));
        assert_eq!(c.pending_providers("42").await.unwrap(), vec!["p1".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_collectors_complete_once() {
        for _ in 0..20 {
            let (_, c) = setup();
            pending(&c, &["p1", "p2"]).await;
            let a = collector(&c, 0);
            let b = collector(&c, 1);
            let ea = received("p1", 1);
            let eb = received("p2", 1);
            let (ra, rb) = tokio::join!(a.record(&ea, false), b.record(&eb, false));
            let completions = [ra.unwrap(), rb.unwrap()]
                .iter()
                .filter(|o| matches!(o, CollectOutcome::Recorded { completed: true, .. }))
                .count();
            assert_eq!(completions, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_is_transient() {
        let (store, c) = setup();
        pending(&c, &["p1"]).await;
        store.set_available(false);
        let col = collector(&c, 0);
        let delivery = Delivery {
            topic: "routes.update-received.p1".into(),
            partition: 0,
            offset: 0,
            key: "42".into(),
            payload: serde_json::to_string(&received("p1", 1)).unwrap(),
            attempt: 1,
        };
        assert!(matches!(col.handle(&delivery).await, Err(HandleError::Transient(_))));

        store.set_available(true);
        col.handle(&Delivery { attempt: 2, ..delivery }).await.unwrap();
        assert_eq!(c.read_proposals("42").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_routes_failed_topic() {
        let (_, c) = setup();
        let mut sub = c.subscribe("42").await.unwrap();
        let col = collector(&c, 0);
        let delivery = Delivery {
            topic: "routes.update-failed.p1".into(),
            partition: 0,
            offset: 0,
            key: "42".into(),
            payload: r#"{"provider-id":"p1","request-id":"42","reason":"down"}"#.into(),
            attempt: 1,
        };
        col.handle(&delivery).await.unwrap();
        assert_eq!(sub.recv().await.as_deref(), Some("provider-failed:p1"));
    }
}
