//! Folds every provider response into the long-lived proposal cache

use async_trait::async_trait;
use tracing::{debug, info};

use crate::cache::{IndexError, ProposalIndex};
use crate::events::{Delivery, EventHandler, HandleError, RoutesUpdateReceived, TopicSelector, UPDATE_RECEIVED_PREFIX};

/// Consumer group of the model builders, independent of the collectors
pub const MODEL_GROUP: &str = "model-builder";

/// Indexes proposals from `routes.update-received.*` events
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    index: ProposalIndex,
    name: String,
}

impl ModelBuilder {
    pub fn new(index: ProposalIndex, instance: usize) -> Self {
        Self {
            index,
            name: format!("model-builder-{instance}"),
        }
    }

    pub fn selector() -> TopicSelector {
        TopicSelector::prefixes([UPDATE_RECEIVED_PREFIX])
    }

    /// Index every proposal of one response, tagged with its provider
    pub async fn fold(&self, event: RoutesUpdateReceived) -> Result<usize, IndexError> {
        debug!(
            provider = %event.provider_id,
            request_id = %event.request_id,
            count = event.proposals.len(),
            "ModelBuilder::fold: called"
        );
        if event.proposals.is_empty() {
            return Ok(0);
        }
        let indexed = self.index.upsert(&event.provider_id, event.proposals).await?;
        info!(provider = %event.provider_id, request_id = %event.request_id, indexed, "Proposals cached");
        Ok(indexed)
    }
}

#[async_trait]
impl EventHandler for ModelBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandleError> {
        let event: RoutesUpdateReceived = delivery
            .decode()
            .map_err(|e| HandleError::Malformed(e.to_string()))?;
        self.fold(event).await.map(|_| ()).map_err(handle_error)
    }
}

/// Proposals that cannot be encoded never will be; everything else may clear up
fn handle_error(e: IndexError) -> HandleError {
    match e {
        IndexError::Codec(_) => HandleError::Malformed(e.to_string()),
        IndexError::Sqlite(_) | IndexError::ChannelError => HandleError::Transient(e.to_string()),
    }
}
