//! Capability traits over the shared key-value store and its pub/sub

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::error::StoreResult;

/// Result of removing one member from a set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetRemoval {
    /// The member was present and this call removed it
    Removed,
    /// The set exists but the member was already gone
    NotMember,
    /// No live set under the key (never created or expired)
    MissingKey,
}

/// Atomic set, list and expiring-key operations on shared state
///
/// Every operation is atomic on its key. Only `list_push_once` spans two keys.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Add members to a set, (re)setting its TTL; returns how many were new
    async fn set_add(&self, key: &str, members: &[String], ttl: Duration) -> StoreResult<usize>;

    /// Remove one member, reporting whether this call changed the set
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<SetRemoval>;

    /// Number of members; zero when the key is missing
    async fn set_len(&self, key: &str) -> StoreResult<usize>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Append to a list; returns the new length
    async fn list_push(&self, key: &str, values: &[String]) -> StoreResult<usize>;

    /// Append to a list unless `marker` exists, creating `marker` in the same step
    ///
    /// Returns the new length, or None when the marker was already there and
    /// nothing was appended.
    async fn list_push_once(
        &self,
        key: &str,
        values: &[String],
        marker: &str,
        marker_ttl: Duration,
    ) -> StoreResult<Option<usize>>;

    /// Whole list in insertion order; empty when the key is missing
    async fn list_range(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Set a key's TTL; false when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Create a marker key if absent; true only for the caller that created it
    async fn claim(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Cheap round trip to check the store is reachable
    async fn ping(&self) -> StoreResult<()>;
}

/// Fire-and-forget publish/subscribe keyed by channel name
#[async_trait]
pub trait NotificationBus: Send + Sync {
    /// Publish to current subscribers; returns how many received it
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize>;

    /// Start receiving messages published from now on
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;
}

/// A live channel subscription
///
/// Unsubscribes when dropped, so every exit path of a waiting task releases it.
pub struct Subscription {
    channel: String,
    rx: Option<broadcast::Receiver<String>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        channel: impl Into<String>,
        rx: broadcast::Receiver<String>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            rx: Some(rx),
            release: Some(Box::new(release)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, or None once the channel is closed or unsubscribed
    pub async fn recv(&mut self) -> Option<String> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscription::recv: lagged, messages skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stop receiving and release the channel
    pub fn unsubscribe(mut self) {
        debug!(channel = %self.channel, "Subscription::unsubscribe: called");
        self.release_now();
    }

    fn release_now(&mut self) {
        // receiver must be gone before release checks the channel's receiver count
        drop(self.rx.take());
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("active", &self.rx.is_some())
            .finish()
    }
}
