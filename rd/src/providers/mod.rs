//! Provider side of the fan-out
//!
//! Gateways reach external providers, the roster says which providers a
//! search fans out to, and workers serve per-provider request events.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

mod error;
pub mod filter;
mod fixture;
pub mod gateway;
mod http;
mod roster;
mod worker;

pub use error::{ProviderError, RosterError};
pub use filter::filter_proposals;
pub use fixture::FixtureGateway;
pub use gateway::ProviderGateway;
pub use http::HttpGateway;
pub use roster::{ProviderRoster, RegistryRoster, StaticRoster};
pub use worker::{PROVIDERS_GROUP, ProviderWorker, WorkOutcome};

use crate::config::{ProviderConfig, ProviderKind};
use crate::retry::RetryPolicy;

/// Create a provider gateway based on the kind specified in config
pub fn create_gateway(config: &ProviderConfig, retry: &RetryPolicy) -> Result<Arc<dyn ProviderGateway>, ProviderError> {
    debug!(provider = %config.id, kind = ?config.kind, "create_gateway: called");
    match config.kind {
        ProviderKind::Fixture => {
            debug!("create_gateway: creating fixture gateway");
            Ok(Arc::new(FixtureGateway::new(
                &config.id,
                config.max_proposals,
                Duration::from_millis(config.latency_ms),
            )))
        }
        ProviderKind::Http => {
            debug!("create_gateway: creating http gateway");
            Ok(Arc::new(HttpGateway::from_config(config, retry.clone())?))
        }
    }
}
