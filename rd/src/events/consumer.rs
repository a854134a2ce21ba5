//! Run loop that drives an event handler from a consumer group

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::log::{Delivery, EventConsumer};
use crate::retry::RetryPolicy;

/// Why a handler could not finish with an event
#[derive(Debug, Error)]
pub enum HandleError {
    /// Payload could not be decoded; redelivered a few times, then dropped
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Infrastructure failure; the event must not be acknowledged
    #[error("transient failure: {0}")]
    Transient(String),

    /// Domain-level refusal; logged and acknowledged
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Processes one delivery at a time
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandleError>;
}

/// Counters reported when a loop stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub handled: u64,
    pub redelivered: u64,
    pub dropped: u64,
    pub rejected: u64,
}

/// What to tell the log about a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Ack,
    Retry,
    Drop,
}

/// Pulls deliveries from one consumer and settles each one
pub struct ConsumerLoop {
    consumer: Box<dyn EventConsumer>,
    max_redeliveries: u32,
    backoff: RetryPolicy,
    stats: ConsumerStats,
}

impl ConsumerLoop {
    pub fn new(consumer: Box<dyn EventConsumer>, max_redeliveries: u32, backoff: RetryPolicy) -> Self {
        Self {
            consumer,
            max_redeliveries,
            backoff,
            stats: ConsumerStats::default(),
        }
    }

    /// Run until `shutdown` flips to true or its sender goes away
    pub async fn run<H>(mut self, handler: &H, mut shutdown: watch::Receiver<bool>) -> ConsumerStats
    where
        H: EventHandler + ?Sized,
    {
        info!(handler = handler.name(), "ConsumerLoop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                next = self.consumer.next() => {
                    match next {
                        Ok(delivery) => self.settle(handler, delivery).await,
                        Err(e) => {
                            warn!(handler = handler.name(), error = %e, "ConsumerLoop: fetch failed");
                            tokio::time::sleep(self.backoff.backoff_for(1)).await;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!(handler = handler.name(), "ConsumerLoop: shutdown sender dropped");
                        break;
                    }
                }
            }
        }
        info!(handler = handler.name(), stats = ?self.stats, "ConsumerLoop stopped");
        self.stats
    }

    async fn settle<H>(&mut self, handler: &H, delivery: Delivery)
    where
        H: EventHandler + ?Sized,
    {
        let name = handler.name();
        let disposition = match handler.handle(&delivery).await {
            Ok(()) => {
                self.stats.handled += 1;
                Disposition::Ack
            }
            Err(HandleError::Rejected(reason)) => {
                warn!(handler = name, topic = %delivery.topic, %reason, "ConsumerLoop: event rejected");
                self.stats.rejected += 1;
                Disposition::Ack
            }
            Err(HandleError::Malformed(reason)) if delivery.attempt > self.max_redeliveries => {
                error!(
                    handler = name,
                    topic = %delivery.topic,
                    offset = delivery.offset,
                    attempt = delivery.attempt,
                    %reason,
                    "ConsumerLoop: dropping undecodable event"
                );
                self.stats.dropped += 1;
                Disposition::Drop
            }
            Err(e @ HandleError::Malformed(_)) | Err(e @ HandleError::Transient(_)) => {
                warn!(
                    handler = name,
                    topic = %delivery.topic,
                    offset = delivery.offset,
                    attempt = delivery.attempt,
                    error = %e,
                    "ConsumerLoop: leaving event for redelivery"
                );
                self.stats.redelivered += 1;
                Disposition::Retry
            }
        };

        let settled = match disposition {
            Disposition::Ack | Disposition::Drop => self.consumer.ack(&delivery).await,
            Disposition::Retry => {
                let result = self.consumer.nack(&delivery).await;
                tokio::time::sleep(self.backoff.backoff_for(delivery.attempt)).await;
                result
            }
        };
        if let Err(e) = settled {
            warn!(handler = name, error = %e, "ConsumerLoop: could not settle delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventLog, InMemoryEventLog, TopicSelector};
    use std::sync::Mutex;
    use std::time::Duration;

    const TOPIC: &str = "t";

    /// Fails according to the payload, records what it accepted
    struct Scripted {
        accepted: Mutex<Vec<String>>,
        transient_left: Mutex<u32>,
    }

    #[async_trait]
    impl EventHandler for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn handle(&self, delivery: &Delivery) -> Result<(), HandleError> {
            match delivery.payload.as_str() {
                "bad" => Err(HandleError::Malformed("bad".into())),
                "no" => Err(HandleError::Rejected("no".into())),
                "flaky" => {
                    let mut left = self.transient_left.lock().unwrap();
                    if *left > 0 {
                        *left -= 1;
                        return Err(HandleError::Transient("store down".into()));
                    }
                    drop(left);
                    self.accepted.lock().unwrap().push(delivery.payload.clone());
                    Ok(())
                }
                other => {
                    self.accepted.lock().unwrap().push(other.to_string());
                    Ok(())
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_settles_each_kind() {
        let log = InMemoryEventLog::default();
        for payload in ["ok", "bad", "no", "flaky"] {
            log.publish(TOPIC, "k", payload.to_string()).await.unwrap();
        }
        let consumer = log.subscribe("g", TopicSelector::exact(TOPIC)).await.unwrap();
        let handler = Scripted {
            accepted: Mutex::new(Vec::new()),
            transient_left: Mutex::new(2),
        };
        let (tx, rx) = watch::channel(false);

        let run = ConsumerLoop::new(consumer, 3, RetryPolicy::default()).run(&handler, rx);
        let stop = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            tx.send(true).unwrap();
        };
        let (stats, ()) = tokio::join!(run, stop);

        assert_eq!(*handler.accepted.lock().unwrap(), vec!["ok".to_string(), "flaky".to_string()]);
        assert_eq!(stats.handled, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.dropped, 1);
        // three redeliveries of "bad" plus two of "flaky"
        assert_eq!(stats.redelivered, 5);
        assert_eq!(log.committed("g", TOPIC), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_when_sender_dropped() {
        let log = InMemoryEventLog::default();
        let consumer = log.subscribe("g", TopicSelector::exact(TOPIC)).await.unwrap();
        let handler = Scripted {
            accepted: Mutex::new(Vec::new()),
            transient_left: Mutex::new(0),
        };
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let stats = ConsumerLoop::new(consumer, 3, RetryPolicy::default())
            .run(&handler, rx)
            .await;
        assert_eq!(stats, ConsumerStats::default());
    }
}
