//! Which providers a search fans out to

use std::collections::BTreeSet;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, info};

use super::RosterError;

/// Source of the current provider roster
#[async_trait]
pub trait ProviderRoster: Send + Sync {
    /// Ids of every provider a new search should reach
    async fn provider_ids(&self) -> Result<Vec<String>, RosterError>;

    /// Resolve one provider by id
    async fn get_provider(&self, id: &str) -> Result<String, RosterError> {
        debug!(id, "ProviderRoster::get_provider: called");
        self.provider_ids()
            .await?
            .into_iter()
            .find(|p| p == id)
            .ok_or_else(|| RosterError::NotFound(id.to_string()))
    }
}

/// Fixed list, typically from configuration
#[derive(Debug, Clone)]
pub struct StaticRoster {
    ids: Vec<String>,
}

impl StaticRoster {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ProviderRoster for StaticRoster {
    async fn provider_ids(&self) -> Result<Vec<String>, RosterError> {
        Ok(self.ids.clone())
    }
}

/// Providers join and leave at runtime
#[derive(Debug, Default)]
pub struct RegistryRoster {
    ids: RwLock<BTreeSet<String>>,
}

impl RegistryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: &str) -> Result<bool, RosterError> {
        let mut ids = self
            .ids
            .write()
            .map_err(|_| RosterError::Unavailable("registry lock poisoned".to_string()))?;
        let added = ids.insert(id.to_string());
        if added {
            info!(provider = id, "Provider registered");
        }
        Ok(added)
    }

    pub fn deregister(&self, id: &str) -> Result<bool, RosterError> {
        let mut ids = self
            .ids
            .write()
            .map_err(|_| RosterError::Unavailable("registry lock poisoned".to_string()))?;
        let removed = ids.remove(id);
        if removed {
            info!(provider = id, "Provider deregistered");
        }
        Ok(removed)
    }
}

#[async_trait]
impl ProviderRoster for RegistryRoster {
    async fn provider_ids(&self) -> Result<Vec<String>, RosterError> {
        let ids = self
            .ids
            .read()
            .map_err(|_| RosterError::Unavailable("registry lock poisoned".to_string()))?;
        Ok(ids.iter().cloned().collect())
    }
}
