//! Event log plumbing
//!
//! - [`EventLog`] / [`EventConsumer`] - partitioned, at-least-once log with consumer groups
//! - [`InMemoryEventLog`] - in-process implementation
//! - [`ConsumerLoop`] / [`EventHandler`] - settle deliveries (ack, redeliver, drop)
//! - topic names and message bodies

mod consumer;
mod error;
mod log;
mod memory;
mod types;

pub use consumer::{ConsumerLoop, ConsumerStats, EventHandler, HandleError};
pub use error::EventLogError;
pub use log::{Delivery, EventConsumer, EventLog, TopicSelector, publish_json};
pub use memory::{EventLogConfig, InMemoryEventLog};
pub use types::{
    RoutesUpdateFailed, RoutesUpdateReceived, RoutesUpdateRequested, SEARCH_REQUEST_CREATED, SearchRequestCreated,
    UPDATE_FAILED_PREFIX, UPDATE_RECEIVED_PREFIX, UPDATE_REQUESTED_PREFIX, update_failed_topic, update_received_topic,
    update_requested_topic,
};
