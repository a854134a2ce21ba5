//! Per-request correlation record on top of the raw store capabilities

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::StoreResult;
use super::keys;
use super::notification::StatusNotification;
use super::traits::{CorrelationStore, NotificationBus, SetRemoval, Subscription};
use crate::domain::Proposal;

fn default_pending_ttl_secs() -> u64 {
    300
}

fn default_responses_ttl_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Lifetimes of the per-request keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    #[serde(rename = "pending-ttl-secs", default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,

    #[serde(rename = "responses-ttl-secs", default = "default_responses_ttl_secs")]
    pub responses_ttl_secs: u64,

    /// How often keys nobody touches again are purged once expired
    #[serde(rename = "sweep-interval-secs", default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: default_pending_ttl_secs(),
            responses_ttl_secs: default_responses_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CorrelationConfig {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn responses_ttl(&self) -> Duration {
        Duration::from_secs(self.responses_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Pending-provider set, response collection and status channel of each request
#[derive(Clone)]
pub struct Correlations {
    store: Arc<dyn CorrelationStore>,
    bus: Arc<dyn NotificationBus>,
    config: CorrelationConfig,
}

impl Correlations {
    pub fn new(store: Arc<dyn CorrelationStore>, bus: Arc<dyn NotificationBus>, config: CorrelationConfig) -> Self {
        Self { store, bus, config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Record which providers request `request_id` is waiting on
    pub async fn register_pending(&self, request_id: &str, providers: &[String]) -> StoreResult<()> {
        debug!(request_id, ?providers, "Correlations::register_pending: called");
        if providers.is_empty() {
            return Ok(());
        }
        self.store
            .set_add(&keys::pending_providers(request_id), providers, self.config.pending_ttl())
            .await?;
        Ok(())
    }

    /// Take `provider_id` off the pending set; only one caller ever sees `Removed`
    pub async fn mark_answered(&self, request_id: &str, provider_id: &str) -> StoreResult<SetRemoval> {
        debug!(request_id, provider_id, "Correlations::mark_answered: called");
        self.store
            .set_remove(&keys::pending_providers(request_id), provider_id)
            .await
    }

    pub async fn pending_count(&self, request_id: &str) -> StoreResult<usize> {
        self.store.set_len(&keys::pending_providers(request_id)).await
    }

    pub async fn pending_providers(&self, request_id: &str) -> StoreResult<Vec<String>> {
        self.store.set_members(&keys::pending_providers(request_id)).await
    }

    /// Append `source`'s proposals unless `source` already contributed to this request
    ///
    /// The check and the append are one store operation, so concurrent or
    /// repeated answers from one source land at most once. None means the
    /// source had already contributed and nothing was appended.
    pub async fn append_once(
        &self,
        request_id: &str,
        source: &str,
        proposals: &[Proposal],
    ) -> StoreResult<Option<usize>> {
        debug!(request_id, source, count = proposals.len(), "Correlations::append_once: called");
        let key = keys::routes(request_id);
        let values = proposals
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        let pushed = self
            .store
            .list_push_once(
                &key,
                &values,
                &keys::appended_marker(request_id, source),
                self.config.responses_ttl(),
            )
            .await?;
        if pushed.is_none() {
            debug!(request_id, source, "Correlations::append_once: source already appended");
            return Ok(None);
        }
        self.store.expire(&key, self.config.responses_ttl()).await?;
        Ok(Some(values.len()))
    }

    /// Everything collected so far; entries that fail to decode are skipped
    pub async fn read_proposals(&self, request_id: &str) -> StoreResult<Vec<Proposal>> {
        debug!(request_id, "Correlations::read_proposals: called");
        let raw = self.store.list_range(&keys::routes(request_id)).await?;
        let proposals = raw
            .iter()
            .filter_map(|entry| match serde_json::from_str::<Proposal>(entry) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(request_id, error = %e, "Correlations::read_proposals: skipping malformed entry");
                    None
                }
            })
            .collect();
        Ok(proposals)
    }

    /// True for exactly one caller per request; that caller publishes completion
    pub async fn claim_completion(&self, request_id: &str) -> StoreResult<bool> {
        debug!(request_id, "Correlations::claim_completion: called");
        self.store
            .claim(&keys::completed_marker(request_id), self.config.responses_ttl())
            .await
    }

    pub async fn notify(&self, request_id: &str, notification: &StatusNotification) -> StoreResult<usize> {
        debug!(request_id, %notification, "Correlations::notify: called");
        self.bus
            .publish(&keys::status_channel(request_id), &notification.to_string())
            .await
    }

    pub async fn subscribe(&self, request_id: &str) -> StoreResult<Subscription> {
        debug!(request_id, "Correlations::subscribe: called");
        self.bus.subscribe(&keys::status_channel(request_id)).await
    }

    pub async fn is_available(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}
