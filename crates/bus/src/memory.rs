//! In-memory bus used by tests.
//!
//! Mirrors the production semantics that matter: NATS-style subject
//! wildcards, msg-id deduplication on the job stream, explicit acks, and
//! requeue of unacked deliveries (driven manually via
//! [`MemoryBus::redeliver_unacked`] instead of a timer).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use bs_domain::stream::BoxStream;
use bs_domain::{Error, Result};

use crate::{Acker, Bus, BusMessage, JobDelivery};

#[derive(Default)]
struct Shared {
    subscriptions: Mutex<Vec<(String, mpsc::UnboundedSender<BusMessage>)>>,
    job_tx: Mutex<Option<mpsc::UnboundedSender<(u64, Vec<u8>)>>>,
    job_backlog: Mutex<Vec<(u64, Vec<u8>)>>,
    seen_job_ids: Mutex<HashSet<String>>,
    pending_acks: Mutex<HashMap<u64, Vec<u8>>>,
    next_delivery_id: AtomicU64,
}

/// Test double for the durable bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    shared: Arc<Shared>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delivered-but-unacked jobs.
    pub fn unacked_count(&self) -> usize {
        self.shared.pending_acks.lock().len()
    }

    /// Requeue every unacked delivery, simulating ack-wait expiry.
    pub fn redeliver_unacked(&self) {
        let pending: Vec<(u64, Vec<u8>)> =
            self.shared.pending_acks.lock().drain().collect();
        for (id, payload) in pending {
            self.enqueue_job(id, payload);
        }
    }

    fn enqueue_job(&self, delivery_id: u64, payload: Vec<u8>) {
        let tx = self.shared.job_tx.lock();
        match tx.as_ref() {
            Some(tx) if tx.send((delivery_id, payload.clone())).is_ok() => {}
            _ => {
                drop(tx);
                self.shared.job_backlog.lock().push((delivery_id, payload));
            }
        }
    }
}

/// NATS subject matching: `*` matches one token, `>` matches the rest.
pub(crate) fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');
    loop {
        match (pat.next(), sub.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    delivery_id: u64,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) {
        self.shared.pending_acks.lock().remove(&self.delivery_id);
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let mut subs = self.shared.subscriptions.lock();
        subs.retain(|(pattern, tx)| {
            if subject_matches(pattern, subject) {
                tx.send(BusMessage {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                })
                .is_ok()
            } else {
                !tx.is_closed()
            }
        });
        Ok(())
    }

    async fn publish_job(&self, payload: Vec<u8>, msg_id: &str) -> Result<()> {
        {
            let mut seen = self.shared.seen_job_ids.lock();
            if !seen.insert(msg_id.to_string()) {
                tracing::debug!(msg_id, "duplicate job publish dropped");
                return Ok(());
            }
        }
        let delivery_id = self.shared.next_delivery_id.fetch_add(1, Ordering::Relaxed);
        self.enqueue_job(delivery_id, payload);
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, BusMessage>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.shared
            .subscriptions
            .lock()
            .push((subject.to_string(), tx));
        Ok(Box::pin(async_stream::stream! {
            while let Some(msg) = rx.recv().await {
                yield msg;
            }
        }))
    }

    async fn consume_jobs(&self) -> Result<BoxStream<'static, JobDelivery>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut slot = self.shared.job_tx.lock();
            if slot.is_some() {
                return Err(Error::Bus(
                    "memory bus supports a single job consumer".into(),
                ));
            }
            *slot = Some(tx.clone());
        }
        for (id, payload) in self.shared.job_backlog.lock().drain(..) {
            let _ = tx.send((id, payload));
        }
        let shared = self.shared.clone();
        Ok(Box::pin(async_stream::stream! {
            while let Some((delivery_id, payload)) = rx.recv().await {
                shared
                    .pending_acks
                    .lock()
                    .insert(delivery_id, payload.clone());
                yield JobDelivery::new(
                    payload,
                    Box::new(MemoryAcker {
                        shared: shared.clone(),
                        delivery_id,
                    }),
                );
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn wildcard_matching() {
        assert!(subject_matches("bakerst.jobs.status.*", "bakerst.jobs.status.j1"));
        assert!(!subject_matches(
            "bakerst.jobs.status.*",
            "bakerst.jobs.status.j1.extra"
        ));
        assert!(subject_matches("bakerst.companions.>", "bakerst.companions.a.b.c"));
        assert!(subject_matches(
            "bakerst.extensions.*.heartbeat",
            "bakerst.extensions.voice.heartbeat"
        ));
        assert!(!subject_matches(
            "bakerst.extensions.*.heartbeat",
            "bakerst.extensions.voice.status"
        ));
        assert!(subject_matches("bakerst.brain.transfer.ready", "bakerst.brain.transfer.ready"));
    }

    #[tokio::test]
    async fn pubsub_delivers_to_matching_subscribers() {
        let bus = MemoryBus::new();
        let mut status = bus.subscribe("bakerst.jobs.status.*").await.unwrap();
        let mut other = bus.subscribe("bakerst.heartbeat.brain").await.unwrap();

        bus.publish("bakerst.jobs.status.j1", b"running".to_vec())
            .await
            .unwrap();

        let msg = status.next().await.unwrap();
        assert_eq!(msg.subject, "bakerst.jobs.status.j1");
        assert_eq!(msg.payload, b"running");

        bus.publish("bakerst.heartbeat.brain", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(other.next().await.unwrap().subject, "bakerst.heartbeat.brain");
    }

    #[tokio::test]
    async fn job_dedup_by_msg_id() {
        let bus = MemoryBus::new();
        bus.publish_job(b"one".to_vec(), "j1").await.unwrap();
        bus.publish_job(b"dup".to_vec(), "j1").await.unwrap();
        bus.publish_job(b"two".to_vec(), "j2").await.unwrap();

        let mut jobs = bus.consume_jobs().await.unwrap();
        let d1 = jobs.next().await.unwrap();
        assert_eq!(d1.payload, b"one");
        d1.ack().await;
        let d2 = jobs.next().await.unwrap();
        assert_eq!(d2.payload, b"two");
        d2.ack().await;
        assert_eq!(bus.unacked_count(), 0);
    }

    #[tokio::test]
    async fn unacked_jobs_are_redelivered() {
        let bus = MemoryBus::new();
        bus.publish_job(b"payload".to_vec(), "j1").await.unwrap();

        let mut jobs = bus.consume_jobs().await.unwrap();
        let d = jobs.next().await.unwrap();
        assert_eq!(bus.unacked_count(), 1);
        drop(d); // worker died before acking

        bus.redeliver_unacked();
        let d = jobs.next().await.unwrap();
        assert_eq!(d.payload, b"payload");
        d.ack().await;
        assert_eq!(bus.unacked_count(), 0);
    }
}
