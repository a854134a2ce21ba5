//! Serves per-provider search requests from the event log

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ProviderGateway;
use super::filter::filter_proposals;
use crate::config::ProviderConfig;
use crate::events::{
    Delivery, EventHandler, EventLog, EventLogError, HandleError, RoutesUpdateFailed, RoutesUpdateReceived,
    RoutesUpdateRequested, TopicSelector, publish_json, update_failed_topic, update_received_topic,
    update_requested_topic,
};

/// Consumer group shared by all workers of all providers
pub const PROVIDERS_GROUP: &str = "providers";

/// What a worker published for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Proposals published, count after filtering
    Answered(usize),
    /// Failure event published with this reason
    Failed(String),
}

/// Turns `routes.update-requested.<id>` events into received or failed events
pub struct ProviderWorker {
    gateway: Arc<dyn ProviderGateway>,
    log: Arc<dyn EventLog>,
    probe_interval: Duration,
    probe_timeout: Duration,
    name: String,
}

impl ProviderWorker {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        log: Arc<dyn EventLog>,
        probe_interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let name = format!("provider-worker:{}", gateway.provider_id());
        Self {
            gateway,
            log,
            probe_interval,
            probe_timeout,
            name,
        }
    }

    pub fn from_config(gateway: Arc<dyn ProviderGateway>, log: Arc<dyn EventLog>, config: &ProviderConfig) -> Self {
        Self::new(
            gateway,
            log,
            Duration::from_millis(config.probe_interval_ms),
            Duration::from_millis(config.probe_timeout_ms),
        )
    }

    pub fn provider_id(&self) -> &str {
        self.gateway.provider_id()
    }

    /// Topics this worker consumes
    pub fn selector(&self) -> TopicSelector {
        TopicSelector::exact(update_requested_topic(self.provider_id()))
    }

    /// Poll the probe until the provider is available or the timeout passes
    async fn wait_until_available(&self) -> bool {
        let deadline = Instant::now() + self.probe_timeout;
        loop {
            if self.gateway.probe().await {
                return true;
            }
            if Instant::now() + self.probe_interval > deadline {
                return false;
            }
            debug!(provider = self.provider_id(), "ProviderWorker: provider unavailable, waiting");
            tokio::time::sleep(self.probe_interval).await;
        }
    }

    /// Search on behalf of one request and publish the answer or the failure
    pub async fn process(&self, request: &RoutesUpdateRequested) -> Result<WorkOutcome, EventLogError> {
        debug!(provider = self.provider_id(), request_id = %request.request_id, "ProviderWorker::process: called");
        let provider_id = self.provider_id();

        let result = if self.wait_until_available().await {
            self.gateway.search(&request.user_id, &request.search).await.map_err(|e| e.to_string())
        } else {
            Err(format!("provider {provider_id} unavailable after {:?}", self.probe_timeout))
        };

        match result {
            Ok(proposals) => {
                let proposals = filter_proposals(proposals, &request.search);
                let count = proposals.len();
                let event = RoutesUpdateReceived {
                    provider_id: provider_id.to_string(),
                    request_id: request.request_id.clone(),
                    proposals,
                };
                publish_json(
                    self.log.as_ref(),
                    &update_received_topic(provider_id),
                    &request.request_id,
                    &event,
                )
                .await?;
                info!(provider = provider_id, request_id = %request.request_id, count, "Provider answered");
                Ok(WorkOutcome::Answered(count))
            }
            Err(reason) => {
                warn!(provider = provider_id, request_id = %request.request_id, %reason, "Provider failed");
                let event = RoutesUpdateFailed {
                    provider_id: provider_id.to_string(),
                    request_id: request.request_id.clone(),
                    reason: reason.clone(),
                };
                publish_json(
                    self.log.as_ref(),
                    &update_failed_topic(provider_id),
                    &request.request_id,
                    &event,
                )
                .await?;
                Ok(WorkOutcome::Failed(reason))
            }
        }
    }
}

#[async_trait]
impl EventHandler for ProviderWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandleError> {
        let request: RoutesUpdateRequested = delivery
            .decode()
            .map_err(|e| HandleError::Malformed(e.to_string()))?;
        if request.provider_id != self.provider_id() {
            return Err(HandleError::Rejected(format!(
                "request for {} delivered to {}",
                request.provider_id,
                self.provider_id()
            )));
        }
        self.process(&request)
            .await
            .map(|_| ())
            .map_err(|e| HandleError::Transient(e.to_string()))
    }
}
