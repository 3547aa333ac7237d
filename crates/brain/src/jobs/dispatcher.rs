//! Job dispatch: persist the row, then publish with `msgID = jobId` so the
//! bus deduplicates redeliveries of the same dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use bs_bus::{subjects, Bus};
use bs_domain::trace::{TraceContext, TraceEvent};
use bs_domain::Result;
use bs_store::{now_iso, JobRow, JobStatus, JobType, Store};

use super::JobDispatch;

#[derive(Debug, Clone)]
pub struct DispatchParams {
    pub job_type: JobType,
    pub source: String,
    pub job: Option<String>,
    pub command: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub vars: Option<serde_json::Value>,
    pub timeout_secs: Option<u64>,
}

pub struct Dispatcher {
    store: Arc<Store>,
    bus: Arc<dyn Bus>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, bus: Arc<dyn Bus>) -> Self {
        Self { store, bus }
    }

    pub async fn dispatch(&self, params: DispatchParams) -> Result<JobDispatch> {
        let dispatch = JobDispatch {
            job_id: Uuid::new_v4().to_string(),
            job_type: params.job_type,
            source: params.source,
            job: params.job,
            command: params.command,
            url: params.url,
            method: params.method,
            headers: params.headers,
            vars: params.vars,
            timeout_secs: params.timeout_secs,
            created_at: now_iso(),
            trace_context: TraceContext::new(),
        };

        let row = JobRow {
            job_id: dispatch.job_id.clone(),
            job_type: dispatch.job_type,
            source: dispatch.source.clone(),
            input: serde_json::to_value(&dispatch)?,
            status: JobStatus::Dispatched,
            worker_id: None,
            result: None,
            error: None,
            duration_ms: None,
            trace_id: Some(dispatch.trace_context.trace_id.clone()),
            created_at: dispatch.created_at.clone(),
            updated_at: dispatch.created_at.clone(),
        };
        self.store.insert_job(&row)?;

        self.bus
            .publish_job(serde_json::to_vec(&dispatch)?, &dispatch.job_id)
            .await?;

        TraceEvent::JobDispatched {
            job_id: dispatch.job_id.clone(),
            job_type: dispatch.job_type.as_str().to_string(),
            source: dispatch.source.clone(),
        }
        .emit();
        tracing::info!(
            job_id = %dispatch.job_id,
            job_type = dispatch.job_type.as_str(),
            source = %dispatch.source,
            subject = subjects::JOBS_DISPATCH,
            "job dispatched"
        );

        Ok(dispatch)
    }
}
