//! ABOUTME: Executor heartbeat loop — store write plus broker announcement

use ds_broker::{BrokerProducer, Envelope, EnvelopeType, TOPIC_EXECUTOR_HEARTBEAT};
use ds_db::Db;
use std::sync::Arc;
use tracing::{instrument, warn};

pub struct Heartbeat {
    db: Db,
    producer: Arc<BrokerProducer>,
    executor_id: String,
    interval_seconds: u64,
}

impl Heartbeat {
    pub fn new(db: Db, producer: Arc<BrokerProducer>, executor_id: String, interval_seconds: u64) -> Self {
        Self {
            db,
            producer,
            executor_id,
            interval_seconds,
        }
    }

    pub async fn run(self) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.interval_seconds.max(1)));
        loop {
            ticker.tick().await;
            self.beat_once().await;
        }
    }

    #[instrument(skip(self))]
    async fn beat_once(&self) {
        if let Err(e) = self.db.executors().heartbeat(&self.executor_id).await {
            warn!(executor_id = %self.executor_id, error = %e, "failed to write heartbeat to store");
        }

        let envelope = Envelope::new(EnvelopeType::ExecutorHeartbeat, self.executor_id.clone());
        self.producer
            .produce(TOPIC_EXECUTOR_HEARTBEAT, &self.executor_id, &envelope)
            .await;
    }
}
