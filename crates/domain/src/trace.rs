use serde::{Deserialize, Serialize};

/// Trace context carried across the bus so a worker's spans can be tied
/// back to the dispatching request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    /// Mint a fresh context for a new root operation.
    pub fn new() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Structured audit events emitted across all Baker Street crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ModelCall {
        provider: String,
        model: String,
        duration_ms: u64,
        input_tokens: Option<u32>,
        output_tokens: Option<u32>,
        error: Option<String>,
    },
    ModelFallback {
        from_model: String,
        to_model: String,
        reason: String,
    },
    JobDispatched {
        job_id: String,
        job_type: String,
        source: String,
    },
    JobStatus {
        job_id: String,
        status: String,
        worker_id: Option<String>,
    },
    ObserverRun {
        conversation_id: String,
        observed_tokens: u32,
        observation_tokens: u32,
    },
    ReflectorRun {
        conversation_id: String,
        replaced_version: i64,
        new_tokens: u32,
    },
    TransferPhase {
        phase: String,
        version: String,
    },
    ScheduleFired {
        schedule_id: String,
        job_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "bs_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_context_ids_are_unique() {
        assert_ne!(TraceContext::new().trace_id, TraceContext::new().trace_id);
    }

    #[test]
    fn trace_event_serializes_with_tag() {
        let ev = TraceEvent::JobDispatched {
            job_id: "j1".into(),
            job_type: "command".into(),
            source: "webhook".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "JobDispatched");
    }
}
