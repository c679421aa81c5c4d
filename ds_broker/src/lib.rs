//! ABOUTME: Broker client — typed envelopes over named Kafka topics
//! ABOUTME: Producer is copy-based fire-and-forget; consumer polls with auto-commit

pub mod consumer;
pub mod envelope;
pub mod payloads;
pub mod producer;

pub use consumer::{BrokerConsumer, EnvelopeHandler};
pub use envelope::{Envelope, EnvelopeType};
pub use payloads::{JobResultPayload, JobSubmitPayload};
pub use producer::BrokerProducer;

/// Topic names.
pub const TOPIC_JOB_SUBMIT: &str = "job-submit";
pub const TOPIC_JOB_CANCEL: &str = "job-cancel";
pub const TOPIC_JOB_RESULT: &str = "job-result";
pub const TOPIC_EXECUTOR_HEARTBEAT: &str = "executor-heartbeat";
