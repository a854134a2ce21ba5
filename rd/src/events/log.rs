//! Event log capability: partitioned, at-least-once, consumer groups

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::EventLogError;

/// Which topics a consumer reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicSelector {
    Exact(String),
    Prefixes(Vec<String>),
}

impl TopicSelector {
    pub fn exact(topic: impl Into<String>) -> Self {
        TopicSelector::Exact(topic.into())
    }

    pub fn prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TopicSelector::Prefixes(prefixes.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicSelector::Exact(t) => t == topic,
            TopicSelector::Prefixes(ps) => ps.iter().any(|p| topic.starts_with(p.as_str())),
        }
    }
}

/// One event handed to a consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub payload: String,
    /// 1 on first delivery, incremented on every redelivery
    pub attempt: u32,
}

impl Delivery {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Append-only, partitioned log
///
/// Events with the same key land on the same partition and keep their order
/// there. Nothing is ordered across partitions.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event; returns its offset within its partition
    async fn publish(&self, topic: &str, key: &str, payload: String) -> Result<u64, EventLogError>;

    /// Join consumer group `group` reading the topics `selector` matches
    async fn subscribe(&self, group: &str, selector: TopicSelector) -> Result<Box<dyn EventConsumer>, EventLogError>;
}

/// A member of a consumer group
///
/// An event is redelivered until acknowledged. Leaving the group (dropping
/// the consumer) hands its unacknowledged events to the remaining members.
#[async_trait]
pub trait EventConsumer: Send {
    /// Wait for the next event on the partitions assigned to this member
    async fn next(&mut self) -> Result<Delivery, EventLogError>;

    /// Mark an event processed for the whole group
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), EventLogError>;

    /// Reject an event so it is delivered again
    async fn nack(&mut self, delivery: &Delivery) -> Result<(), EventLogError>;
}

/// Serialize `event` as JSON and publish it
pub async fn publish_json<T>(log: &dyn EventLog, topic: &str, key: &str, event: &T) -> Result<u64, EventLogError>
where
    T: Serialize + Sync,
{
    debug!(topic, key, "publish_json: called");
    let payload = serde_json::to_string(event)?;
    log.publish(topic, key, payload).await
}
