//! Status tracker: folds `bakerst.jobs.status.*` messages into job rows.
//!
//! Updates are applied in arrival order; the store enforces monotonicity so
//! a late `running` can never demote a terminal row.

use std::sync::Arc;

use futures_util::StreamExt;

use bs_bus::{subjects, Bus};
use bs_domain::trace::TraceEvent;
use bs_domain::Result;
use bs_store::Store;

use super::JobStatusMessage;

pub struct StatusTracker {
    store: Arc<Store>,
    bus: Arc<dyn Bus>,
}

impl StatusTracker {
    pub fn new(store: Arc<Store>, bus: Arc<dyn Bus>) -> Self {
        Self { store, bus }
    }

    pub async fn run(&self) -> Result<()> {
        let mut messages = self.bus.subscribe(subjects::JOBS_STATUS_WILDCARD).await?;
        tracing::info!(subject = subjects::JOBS_STATUS_WILDCARD, "status tracker subscribed");
        while let Some(msg) = messages.next().await {
            let status: JobStatusMessage = match msg.json() {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(subject = %msg.subject, error = %e, "bad status payload");
                    continue;
                }
            };
            self.apply(&status);
        }
        Ok(())
    }

    pub fn apply(&self, status: &JobStatusMessage) {
        match self.store.apply_job_status(
            &status.job_id,
            status.status,
            Some(status.worker_id.as_str()),
            status.result.as_deref(),
            status.error.as_deref(),
            status.duration_ms,
        ) {
            Ok(true) => {
                TraceEvent::JobStatus {
                    job_id: status.job_id.clone(),
                    status: status.status.as_str().to_string(),
                    worker_id: Some(status.worker_id.clone()),
                }
                .emit();
            }
            Ok(false) => {
                tracing::debug!(
                    job_id = %status.job_id,
                    status = status.status.as_str(),
                    "stale status update ignored"
                );
            }
            Err(e) => {
                tracing::warn!(job_id = %status.job_id, error = %e, "status update failed");
            }
        }
    }
}
