//! The job fabric: dispatch onto the durable bus, worker execution, and the
//! status tracker that folds worker events back into job rows.

pub mod dispatcher;
pub mod status;
pub mod worker;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use bs_domain::trace::TraceContext;
use bs_store::{JobStatus, JobType};

/// The wire payload published to `bakerst.jobs.dispatch`. `job_id` doubles
/// as the bus-level dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDispatch {
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub source: String,
    /// Instruction text for `agent` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    /// Command line for `command` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub created_at: String,
    pub trace_context: TraceContext,
}

/// The wire payload on `bakerst.jobs.status.<jobId>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusMessage {
    pub job_id: String,
    pub worker_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_payload_uses_camel_case_and_type_tag() {
        let dispatch = JobDispatch {
            job_id: "j1".into(),
            job_type: JobType::Command,
            source: "webhook".into(),
            job: None,
            command: Some("echo hi".into()),
            url: None,
            method: None,
            headers: None,
            vars: None,
            timeout_secs: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            trace_context: TraceContext::new(),
        };
        let v = serde_json::to_value(&dispatch).unwrap();
        assert_eq!(v["jobId"], "j1");
        assert_eq!(v["type"], "command");
        assert_eq!(v["command"], "echo hi");
        assert!(v.get("url").is_none());
        assert!(v["traceContext"]["traceId"].is_string());
    }

    #[test]
    fn status_payload_roundtrip() {
        let msg: JobStatusMessage = serde_json::from_str(
            r#"{"jobId":"j1","workerId":"w1","status":"completed","result":"ok","durationMs":42}"#,
        )
        .unwrap();
        assert_eq!(msg.status, JobStatus::Completed);
        assert_eq!(msg.duration_ms, Some(42));
        assert!(msg.error.is_none());
    }
}
