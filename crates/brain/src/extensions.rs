//! Extension heartbeat tracking and companion-subject observation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::RwLock;

use bs_bus::{subjects, Bus};
use bs_domain::Result;

/// An extension is considered offline after this long without a heartbeat.
const STALE_AFTER: Duration = Duration::from_secs(120);

#[derive(Default)]
pub struct ExtensionTracker {
    last_seen: RwLock<HashMap<String, Instant>>,
}

impl ExtensionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_heartbeat(&self, extension: &str) {
        self.last_seen
            .write()
            .insert(extension.to_string(), Instant::now());
    }

    pub fn online_count(&self) -> usize {
        let now = Instant::now();
        self.last_seen
            .read()
            .values()
            .filter(|seen| now.duration_since(**seen) < STALE_AFTER)
            .count()
    }

    pub fn prune_stale(&self) {
        let now = Instant::now();
        self.last_seen
            .write()
            .retain(|_, seen| now.duration_since(*seen) < STALE_AFTER);
    }

    /// Listen for `bakerst.extensions.<name>.heartbeat` and record senders.
    pub async fn run(self: Arc<Self>, bus: Arc<dyn Bus>) -> Result<()> {
        let mut heartbeats = bus
            .subscribe(subjects::EXTENSIONS_HEARTBEAT_WILDCARD)
            .await?;
        while let Some(msg) = heartbeats.next().await {
            if let Some(name) = extension_name(&msg.subject) {
                tracing::debug!(extension = %name, "extension heartbeat");
                self.record_heartbeat(name);
            }
        }
        Ok(())
    }
}

/// Observe companion traffic; pure logging hook.
pub async fn watch_companions(bus: Arc<dyn Bus>) -> Result<()> {
    let mut messages = bus.subscribe(subjects::COMPANIONS_WILDCARD).await?;
    while let Some(msg) = messages.next().await {
        tracing::debug!(
            subject = %msg.subject,
            bytes = msg.payload.len(),
            "companion message"
        );
    }
    Ok(())
}

fn extension_name(subject: &str) -> Option<&str> {
    subject
        .strip_prefix("bakerst.extensions.")?
        .strip_suffix(".heartbeat")
}
