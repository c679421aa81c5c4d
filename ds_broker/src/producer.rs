//! ABOUTME: Fire-and-forget producer — copy-based send, errors logged not propagated

use crate::envelope::Envelope;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, instrument};

/// Wraps an `rdkafka::FutureProducer`. Delivery failures are logged and
/// reported back as `false` rather than surfaced as errors: the original
/// queue semantics are best-effort at-least-once, and callers (scheduler
/// dispatch, executor result reporting) already retry at a higher level.
pub struct BrokerProducer {
    producer: FutureProducer,
}

impl BrokerProducer {
    pub fn new(brokers: &str) -> ds_core::Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| ds_core::Error::Broker(format!("failed to create producer: {e}")))?;
        Ok(Self { producer })
    }

    /// Sends `envelope` to `topic` keyed by `key`. Returns `true` if the
    /// broker acknowledged delivery, `false` on any failure (logged).
    #[instrument(skip(self, envelope))]
    pub async fn produce(&self, topic: &str, key: &str, envelope: &Envelope) -> bool {
        let payload = match envelope.to_wire() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, topic, key, "failed to encode envelope");
                return false;
            }
        };

        let record = FutureRecord::to(topic).key(key).payload(&payload);
        match self
            .producer
            .send(record, Timeout::After(Duration::from_secs(10)))
            .await
        {
            Ok(_) => true,
            Err((e, _)) => {
                error!(error = %e, topic, key, "failed to deliver envelope");
                false
            }
        }
    }
}
