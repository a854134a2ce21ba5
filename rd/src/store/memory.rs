//! In-process store with expiring keys and per-channel broadcast

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use super::error::{StoreError, StoreResult};
use super::traits::{CorrelationStore, NotificationBus, SetRemoval, Subscription};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
enum Value {
    Set(BTreeSet<String>),
    List(Vec<String>),
    Marker,
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Set(_) => "set",
            Value::List(_) => "list",
            Value::Marker => "marker",
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Channels = Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>;

/// Key-value store plus pub/sub living in this process
///
/// A key past its deadline is dropped the next time it is touched, or by
/// [`InMemoryStore::purge_expired`] for keys nobody touches again. A set
/// emptied by removal keeps its key until its TTL lapses.
#[derive(Debug)]
pub struct InMemoryStore {
    data: Mutex<HashMap<String, Entry>>,
    channels: Channels,
    available: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        debug!("InMemoryStore::new: called");
        Self {
            data: Mutex::new(HashMap::new()),
            channels: Arc::new(Mutex::new(HashMap::new())),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every operation fails with `Unavailable` until restored
    pub fn set_available(&self, available: bool) {
        debug!(available, "InMemoryStore::set_available: called");
        self.available.store(available, Ordering::SeqCst);
    }

    /// Live subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(channel).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    /// Remaining time to live, if the key exists and has one
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut data = self.data.lock().ok()?;
        let now = Instant::now();
        let entry = live(&mut data, key, now)?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Keys currently held, expired or not
    pub fn key_count(&self) -> usize {
        self.data.lock().map(|data| data.len()).unwrap_or(0)
    }

    /// Drop every key whose TTL has lapsed; returns how many went
    pub fn purge_expired(&self) -> usize {
        let Ok(mut data) = self.data.lock() else {
            return 0;
        };
        let now = Instant::now();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired(now));
        let purged = before - data.len();
        if purged > 0 {
            debug!(purged, remaining = data.len(), "InMemoryStore::purge_expired: dropped expired keys");
        }
        purged
    }

    fn data(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        self.data
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn channels(&self) -> StoreResult<MutexGuard<'_, HashMap<String, broadcast::Sender<String>>>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        self.channels
            .lock()
            .map_err(|_| StoreError::Unavailable("channel lock poisoned".to_string()))
    }
}

/// Purge expired keys every `period` until `shutdown` flips; returns the total purged
pub async fn sweep_expired(store: Arc<InMemoryStore>, period: Duration, mut shutdown: watch::Receiver<bool>) -> usize {
    info!(?period, "Store sweeper started");
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut purged = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = interval.tick() => {
                purged += store.purge_expired();
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    debug!("sweep_expired: shutdown sender dropped");
                    break;
                }
            }
        }
    }
    info!(purged, "Store sweeper stopped");
    purged
}

fn evict_expired(data: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if data.get(key).is_some_and(|e| e.is_expired(now)) {
        debug!(key, "evict_expired: evicting expired key");
        data.remove(key);
    }
}

/// The entry under `key` if present and not expired
fn live<'a>(data: &'a mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a mut Entry> {
    evict_expired(data, key, now);
    data.get_mut(key)
}

fn wrong_type(key: &str, expected: &'static str, entry: &Entry) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        actual: entry.value.kind(),
    }
}

#[async_trait]
impl CorrelationStore for InMemoryStore {
    async fn set_add(&self, key: &str, members: &[String], ttl: Duration) -> StoreResult<usize> {
        debug!(key, count = members.len(), ?ttl, "InMemoryStore::set_add: called");
        let mut data = self.data()?;
        let now = Instant::now();
        evict_expired(&mut data, key, now);
        let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        });
        let Value::Set(set) = &mut entry.value else {
            return Err(wrong_type(key, "set", entry));
        };
        let added = members.iter().filter(|m| set.insert((*m).clone())).count();
        entry.expires_at = Some(now + ttl);
        Ok(added)
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<SetRemoval> {
        debug!(key, member, "InMemoryStore::set_remove: called");
        let mut data = self.data()?;
        let Some(entry) = live(&mut data, key, Instant::now()) else {
            return Ok(SetRemoval::MissingKey);
        };
        let Value::Set(set) = &mut entry.value else {
            return Err(wrong_type(key, "set", entry));
        };
        if set.remove(member) {
            Ok(SetRemoval::Removed)
        } else {
            Ok(SetRemoval::NotMember)
        }
    }

    async fn set_len(&self, key: &str) -> StoreResult<usize> {
        debug!(key, "InMemoryStore::set_len: called");
        let mut data = self.data()?;
        match live(&mut data, key, Instant::now()) {
            None => Ok(0),
            Some(Entry {
                value: Value::Set(set), ..
            }) => Ok(set.len()),
            Some(entry) => Err(wrong_type(key, "set", entry)),
        }
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        debug!(key, "InMemoryStore::set_members: called");
        let mut data = self.data()?;
        match live(&mut data, key, Instant::now()) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(set), ..
            }) => Ok(set.iter().cloned().collect()),
            Some(entry) => Err(wrong_type(key, "set", entry)),
        }
    }

    async fn list_push(&self, key: &str, values: &[String]) -> StoreResult<usize> {
        debug!(key, count = values.len(), "InMemoryStore::list_push: called");
        let mut data = self.data()?;
        evict_expired(&mut data, key, Instant::now());
        let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(Vec::new()),
            expires_at: None,
        });
        let Value::List(list) = &mut entry.value else {
            return Err(wrong_type(key, "list", entry));
        };
        list.extend(values.iter().cloned());
        Ok(list.len())
    }

    async fn list_push_once(
        &self,
        key: &str,
        values: &[String],
        marker: &str,
        marker_ttl: Duration,
    ) -> StoreResult<Option<usize>> {
        debug!(key, marker, count = values.len(), "InMemoryStore::list_push_once: called");
        let mut data = self.data()?;
        let now = Instant::now();
        if live(&mut data, marker, now).is_some() {
            return Ok(None);
        }
        evict_expired(&mut data, key, now);
        if let Some(entry) = data.get(key)
            && !matches!(entry.value, Value::List(_))
        {
            return Err(wrong_type(key, "list", entry));
        }
        data.insert(
            marker.to_string(),
            Entry {
                value: Value::Marker,
                expires_at: Some(now + marker_ttl),
            },
        );
        let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(Vec::new()),
            expires_at: None,
        });
        let Value::List(list) = &mut entry.value else {
            return Err(wrong_type(key, "list", entry));
        };
        list.extend(values.iter().cloned());
        Ok(Some(list.len()))
    }

    async fn list_range(&self, key: &str) -> StoreResult<Vec<String>> {
        debug!(key, "InMemoryStore::list_range: called");
        let mut data = self.data()?;
        match live(&mut data, key, Instant::now()) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list), ..
            }) => Ok(list.clone()),
            Some(entry) => Err(wrong_type(key, "list", entry)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        debug!(key, ?ttl, "InMemoryStore::expire: called");
        let mut data = self.data()?;
        let now = Instant::now();
        match live(&mut data, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn claim(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        debug!(key, ?ttl, "InMemoryStore::claim: called");
        let mut data = self.data()?;
        let now = Instant::now();
        if live(&mut data, key, now).is_some() {
            return Ok(false);
        }
        data.insert(
            key.to_string(),
            Entry {
                value: Value::Marker,
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.data().map(|_| ())
    }
}

#[async_trait]
impl NotificationBus for InMemoryStore {
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize> {
        debug!(channel, message, "InMemoryStore::publish: called");
        let channels = self.channels()?;
        let delivered = channels
            .get(channel)
            .and_then(|tx| tx.send(message.to_string()).ok())
            .unwrap_or(0);
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        debug!(channel, "InMemoryStore::subscribe: called");
        let mut channels = self.channels()?;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        let rx = tx.subscribe();

        let registry: Weak<Mutex<HashMap<String, broadcast::Sender<String>>>> = Arc::downgrade(&self.channels);
        let name = channel.to_string();
        Ok(Subscription::new(channel, rx, move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if let Ok(mut channels) = registry.lock()
                && channels.get(&name).is_some_and(|tx| tx.receiver_count() == 0)
            {
                debug!(channel = %name, "InMemoryStore: last subscriber left, dropping channel");
                channels.remove(&name);
            }
        }))
    }
}
