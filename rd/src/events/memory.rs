//! In-process event log with partitions and consumer groups

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::error::EventLogError;
use super::log::{Delivery, EventConsumer, EventLog, TopicSelector};

fn default_partitions() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_redeliveries() -> u32 {
    3
}

/// Event log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Partitions created for each new topic
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    /// How long an idle consumer sleeps before re-checking its partitions
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Redeliveries of an undecodable event before it is dropped
    #[serde(rename = "max-redeliveries", default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            poll_interval_ms: default_poll_interval_ms(),
            max_redeliveries: default_max_redeliveries(),
        }
    }
}

type PartitionId = (String, usize);

#[derive(Debug)]
struct Record {
    key: String,
    payload: String,
}

#[derive(Debug)]
struct Member {
    id: u64,
    selector: TopicSelector,
}

#[derive(Debug, Default)]
struct GroupState {
    members: Vec<Member>,
    committed: HashMap<PartitionId, u64>,
    position: HashMap<PartitionId, u64>,
    attempts: HashMap<(PartitionId, u64), u32>,
}

impl GroupState {
    /// Member owning `partition` of `topic`, spreading partitions across matching members
    fn owner(&self, topic: &str, partition: usize) -> Option<u64> {
        let matching: Vec<u64> = self
            .members
            .iter()
            .filter(|m| m.selector.matches(topic))
            .map(|m| m.id)
            .collect();
        if matching.is_empty() {
            return None;
        }
        Some(matching[partition % matching.len()])
    }

    /// Every member restarts from the last committed offsets
    fn rebalance(&mut self) {
        self.position.clear();
    }
}

#[derive(Debug, Default)]
struct LogState {
    topics: BTreeMap<String, Vec<Vec<Record>>>,
    groups: HashMap<String, GroupState>,
    next_member: u64,
}

impl LogState {
    fn fetch(&mut self, group: &str, member: u64, cursor: &mut usize) -> Result<Option<Delivery>, EventLogError> {
        let Some(state) = self.groups.get_mut(group) else {
            return Err(EventLogError::NotMember(member));
        };
        if !state.members.iter().any(|m| m.id == member) {
            return Err(EventLogError::NotMember(member));
        }

        let assigned: Vec<PartitionId> = self
            .topics
            .iter()
            .flat_map(|(topic, partitions)| (0..partitions.len()).map(move |p| (topic.clone(), p)))
            .filter(|(topic, p)| state.owner(topic, *p) == Some(member))
            .collect();
        if assigned.is_empty() {
            return Ok(None);
        }

        for i in 0..assigned.len() {
            let idx = (*cursor + i) % assigned.len();
            let pid = &assigned[idx];
            let records = &self.topics[&pid.0][pid.1];
            let committed = state.committed.get(pid).copied().unwrap_or(0);
            let position = state.position.get(pid).copied().unwrap_or(committed);
            let Some(record) = records.get(position as usize) else {
                continue;
            };

            state.position.insert(pid.clone(), position + 1);
            let attempt = state.attempts.entry((pid.clone(), position)).or_insert(0);
            *attempt += 1;
            *cursor = idx + 1;

            return Ok(Some(Delivery {
                topic: pid.0.clone(),
                partition: pid.1,
                offset: position,
                key: record.key.clone(),
                payload: record.payload.clone(),
                attempt: *attempt,
            }));
        }
        Ok(None)
    }
}

/// Stable partition for a message key
fn partition_for(key: &str, partitions: usize) -> usize {
    // FNV-1a
    let hash = key
        .bytes()
        .fold(0xcbf29ce484222325u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x100000001b3));
    (hash % partitions.max(1) as u64) as usize
}

/// Event log living in this process
///
/// New groups start from the earliest offset. Joining or leaving a group
/// rewinds every partition of that group to its committed offset, so events
/// handed to a departed member are delivered again.
#[derive(Debug, Clone)]
pub struct InMemoryEventLog {
    state: Arc<Mutex<LogState>>,
    notify: Arc<Notify>,
    available: Arc<AtomicBool>,
    config: EventLogConfig,
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new(EventLogConfig::default())
    }
}

impl InMemoryEventLog {
    pub fn new(config: EventLogConfig) -> Self {
        debug!(?config, "InMemoryEventLog::new: called");
        Self {
            state: Arc::new(Mutex::new(LogState::default())),
            notify: Arc::new(Notify::new()),
            available: Arc::new(AtomicBool::new(true)),
            config,
        }
    }

    /// Simulate a broker outage for publishers and consumers
    pub fn set_available(&self, available: bool) {
        debug!(available, "InMemoryEventLog::set_available: called");
        self.available.store(available, Ordering::SeqCst);
        if available {
            self.notify.notify_waiters();
        }
    }

    /// Payloads published to `topic`, partition by partition
    pub fn published(&self, topic: &str) -> Vec<String> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().map(|r| r.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Events on `topic` that `group` has acknowledged
    pub fn committed(&self, group: &str, topic: &str) -> u64 {
        let Ok(state) = self.state.lock() else {
            return 0;
        };
        state
            .groups
            .get(group)
            .map(|g| {
                g.committed
                    .iter()
                    .filter(|((t, _), _)| t == topic)
                    .map(|(_, offset)| *offset)
                    .sum()
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogState>, EventLogError> {
        lock_state(&self.state, &self.available)
    }
}

fn lock_state<'a>(
    state: &'a Mutex<LogState>,
    available: &AtomicBool,
) -> Result<MutexGuard<'a, LogState>, EventLogError> {
    if !available.load(Ordering::SeqCst) {
        return Err(EventLogError::Unavailable("event log is offline".to_string()));
    }
    state
        .lock()
        .map_err(|_| EventLogError::Unavailable("event log lock poisoned".to_string()))
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn publish(&self, topic: &str, key: &str, payload: String) -> Result<u64, EventLogError> {
        debug!(topic, key, "InMemoryEventLog::publish: called");
        let offset = {
            let mut state = self.lock()?;
            let partitions = self.config.partitions.max(1);
            let topic_partitions = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| (0..partitions).map(|_| Vec::new()).collect());
            let partition = partition_for(key, topic_partitions.len());
            let records = &mut topic_partitions[partition];
            records.push(Record {
                key: key.to_string(),
                payload,
            });
            (records.len() - 1) as u64
        };
        self.notify.notify_waiters();
        Ok(offset)
    }

    async fn subscribe(&self, group: &str, selector: TopicSelector) -> Result<Box<dyn EventConsumer>, EventLogError> {
        debug!(group, ?selector, "InMemoryEventLog::subscribe: called");
        let member = {
            let mut state = self.lock()?;
            let id = state.next_member;
            state.next_member += 1;
            let group_state = state.groups.entry(group.to_string()).or_default();
            group_state.members.push(Member {
                id,
                selector: selector.clone(),
            });
            group_state.rebalance();
            id
        };
        info!(group, member, ?selector, "Consumer joined group");

        Ok(Box::new(InMemoryConsumer {
            state: self.state.clone(),
            notify: self.notify.clone(),
            available: self.available.clone(),
            group: group.to_string(),
            member,
            cursor: 0,
            poll_interval: Duration::from_millis(self.config.poll_interval_ms.max(1)),
        }))
    }
}

/// Group member handed out by [`InMemoryEventLog::subscribe`]
struct InMemoryConsumer {
    state: Arc<Mutex<LogState>>,
    notify: Arc<Notify>,
    available: Arc<AtomicBool>,
    group: String,
    member: u64,
    cursor: usize,
    poll_interval: Duration,
}

#[async_trait]
impl EventConsumer for InMemoryConsumer {
    async fn next(&mut self) -> Result<Delivery, EventLogError> {
        loop {
            // registered before checking so a publish in between still wakes us
            let notified = self.notify.notified();
            let fetched = {
                let mut state = lock_state(&self.state, &self.available)?;
                state.fetch(&self.group, self.member, &mut self.cursor)?
            };
            if let Some(delivery) = fetched {
                debug!(
                    group = %self.group,
                    member = self.member,
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    attempt = delivery.attempt,
                    "InMemoryConsumer::next: delivering"
                );
                return Ok(delivery);
            }
            let _ = tokio::time::timeout(self.poll_interval, notified).await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), EventLogError> {
        debug!(
            group = %self.group,
            topic = %delivery.topic,
            offset = delivery.offset,
            "InMemoryConsumer::ack: called"
        );
        let mut state = lock_state(&self.state, &self.available)?;
        let group = state
            .groups
            .get_mut(&self.group)
            .ok_or(EventLogError::NotMember(self.member))?;
        let pid = (delivery.topic.clone(), delivery.partition);
        let committed = group.committed.entry(pid.clone()).or_insert(0);
        *committed = (*committed).max(delivery.offset + 1);
        group.attempts.remove(&(pid, delivery.offset));
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery) -> Result<(), EventLogError> {
        debug!(
            group = %self.group,
            topic = %delivery.topic,
            offset = delivery.offset,
            "InMemoryConsumer::nack: called"
        );
        let mut state = lock_state(&self.state, &self.available)?;
        let group = state
            .groups
            .get_mut(&self.group)
            .ok_or(EventLogError::NotMember(self.member))?;
        let pid = (delivery.topic.clone(), delivery.partition);
        let position = group.position.entry(pid).or_insert(delivery.offset);
        *position = (*position).min(delivery.offset);
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock()
            && let Some(group) = state.groups.get_mut(&self.group)
        {
            group.members.retain(|m| m.id != self.member);
            group.rebalance();
            debug!(group = %self.group, member = self.member, "InMemoryConsumer: left group");
        }
    }
}
