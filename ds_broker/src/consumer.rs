//! ABOUTME: Subscription-group consumer — polls with auto-commit, dispatches by envelope type

use crate::envelope::Envelope;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use std::time::Duration;
use tracing::{instrument, warn};

/// Implemented by whoever wants to react to decoded envelopes arriving on a
/// subscription (the scheduler for job-result, the executor for job-submit
/// and job-cancel).
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope);
}

/// Wraps an `rdkafka::StreamConsumer`. One consumer per subscription group;
/// offsets auto-commit every five seconds, and a fresh group starts from
/// the earliest retained offset rather than only new messages.
pub struct BrokerConsumer {
    consumer: StreamConsumer,
}

impl BrokerConsumer {
    pub fn new(brokers: &str, group_id: &str, topics: &[&str]) -> ds_core::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "5000")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| ds_core::Error::Broker(format!("failed to create consumer: {e}")))?;
        consumer
            .subscribe(topics)
            .map_err(|e| ds_core::Error::Broker(format!("failed to subscribe: {e}")))?;
        Ok(Self { consumer })
    }

    /// Runs the poll loop until `shutdown` fires. Malformed payloads are
    /// logged and skipped; they do not stop the loop or fail the offset
    /// commit, matching the broker's at-least-once, best-effort contract.
    #[instrument(skip(self, handler, shutdown))]
    pub async fn run(
        &self,
        handler: &dyn EnvelopeHandler,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                message = self.consumer.recv() => {
                    match message {
                        Ok(borrowed) => {
                            let Some(payload) = borrowed.payload() else {
                                continue;
                            };
                            match Envelope::from_wire(payload) {
                                Ok(envelope) => handler.handle(envelope).await,
                                Err(e) => warn!(error = %e, "skipping malformed envelope"),
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "consumer poll error");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
    }
}
