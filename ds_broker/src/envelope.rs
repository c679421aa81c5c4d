//! ABOUTME: Wire envelope shape shared by every broker topic

use ds_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Envelope message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeType {
    JobSubmit,
    JobCancel,
    JobResult,
    ExecutorHeartbeat,
}

/// `{ "type": "...", "payload": "..." }` — the payload is an opaque string,
/// typically embedded JSON (job/result) or a bare id (cancel/heartbeat).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    pub payload: String,
}

impl Envelope {
    pub fn new(envelope_type: EnvelopeType, payload: impl Into<String>) -> Self {
        Self {
            envelope_type,
            payload: payload.into(),
        }
    }

    /// The broker partition key for this envelope: `job_id` for submit and
    /// result, the bare payload for cancel and heartbeat.
    pub fn routing_key(&self, job_id_hint: Option<&str>) -> String {
        match self.envelope_type {
            EnvelopeType::JobSubmit | EnvelopeType::JobResult => {
                job_id_hint.unwrap_or(&self.payload).to_string()
            }
            EnvelopeType::JobCancel | EnvelopeType::ExecutorHeartbeat => self.payload.clone(),
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::Broker(format!("failed to encode envelope: {e}")))
    }

    /// Parses a raw broker value into an envelope. An unknown `type` value
    /// or malformed JSON both surface as `InvalidInput` so the consumer
    /// loop can log and skip without dying.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidInput(format!("malformed envelope: {e}")))
    }
}
