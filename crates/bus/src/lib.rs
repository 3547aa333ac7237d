//! Message-bus client for the brain and its workers.
//!
//! The bus gives at-least-once delivery with per-message acks. Job dispatch
//! goes through a durable stream so a crashed worker's messages are
//! redelivered; everything else (status, transfer, heartbeats) is plain
//! pub/sub. The [`Bus`] trait exists so the runtime is testable against
//! [`MemoryBus`] while production uses [`JetStreamBus`].

mod jetstream;
mod memory;
pub mod subjects;

pub use jetstream::JetStreamBus;
pub use memory::MemoryBus;

use async_trait::async_trait;

use bs_domain::stream::BoxStream;
use bs_domain::Result;

/// A message received from a plain subscription.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// A job delivered from the durable `WORKERS` consumer. Must be acked once
/// handled; unacked deliveries come back after the ack wait.
pub struct JobDelivery {
    pub payload: Vec<u8>,
    acker: Box<dyn Acker>,
}

impl JobDelivery {
    pub fn new(payload: Vec<u8>, acker: Box<dyn Acker>) -> Self {
        Self { payload, acker }
    }

    pub async fn ack(&self) {
        self.acker.ack().await;
    }
}

#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self);
}

/// The bus operations the brain core needs.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Fire-and-forget publish on a core subject.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Publish a job onto the durable `JOBS` stream with `msg_id` as the
    /// bus-level dedup key (`msgID = jobId`).
    async fn publish_job(&self, payload: Vec<u8>, msg_id: &str) -> Result<()>;

    /// Subscribe to a subject (wildcards allowed).
    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, BusMessage>>;

    /// Attach to the durable `WORKERS` consumer and receive job deliveries.
    async fn consume_jobs(&self) -> Result<BoxStream<'static, JobDelivery>>;
}

/// Publish a serializable payload as JSON.
pub async fn publish_json<T: serde::Serialize + Sync>(
    bus: &dyn Bus,
    subject: &str,
    value: &T,
) -> Result<()> {
    bus.publish(subject, serde_json::to_vec(value)?).await
}
