//! In-process tool providers.
//!
//! Plugins serve the tools that must not round-trip through an MCP server:
//! trivial utilities and the job-dispatch bridge onto the bus.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use bs_domain::chat::ToolDefinition;
use bs_domain::{Error, Result};
use bs_store::JobType;

use crate::jobs::dispatcher::{DispatchParams, Dispatcher};

/// Result of executing one tool call. `job_id` is set when the tool
/// dispatched work onto the bus, so the turn can report it in `done`.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub result: String,
    pub job_id: Option<String>,
}

impl ToolExecution {
    pub fn text(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            job_id: None,
        }
    }
}

/// An in-process tool provider.
#[async_trait]
pub trait ToolPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn all_tools(&self) -> Vec<ToolDefinition>;

    fn has_tool(&self, tool: &str) -> bool {
        self.all_tools().iter().any(|t| t.name == tool)
    }

    async fn execute(&self, tool: &str, input: &Value) -> Result<ToolExecution>;

    /// Out-of-band trigger hook (bus events, schedule fires). Default no-op.
    async fn handle_trigger(&self, _trigger: &str, _payload: &Value) -> Result<()> {
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Utility plugin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct UtilPlugin;

#[async_trait]
impl ToolPlugin for UtilPlugin {
    fn name(&self) -> &str {
        "util"
    }

    fn all_tools(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "util_time".into(),
            description: "Current time in UTC, ISO-8601.".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }]
    }

    async fn execute(&self, tool: &str, _input: &Value) -> Result<ToolExecution> {
        match tool {
            "util_time" => Ok(ToolExecution::text(
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            )),
            other => Err(Error::Tool(format!("util plugin does not own '{other}'"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job-dispatch plugin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lets the model hand long-running work to the worker pool instead of
/// blocking the turn on it.
pub struct JobsPlugin {
    dispatcher: Arc<Dispatcher>,
}

impl JobsPlugin {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl ToolPlugin for JobsPlugin {
    fn name(&self) -> &str {
        "jobs"
    }

    fn all_tools(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "dispatch_job".into(),
            description: "Dispatch a background job to the worker pool. \
                          Returns the job id; results arrive asynchronously."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["agent", "command", "http"],
                    },
                    "command": {"type": "string"},
                    "url": {"type": "string"},
                    "method": {"type": "string"},
                    "job": {
                        "type": "string",
                        "description": "Instruction for an agent job",
                    },
                    "vars": {"type": "object"},
                },
                "required": ["type"],
            }),
        }]
    }

    async fn execute(&self, tool: &str, input: &Value) -> Result<ToolExecution> {
        if tool != "dispatch_job" {
            return Err(Error::Tool(format!("jobs plugin does not own '{tool}'")));
        }
        let job_type = input
            .get("type")
            .and_then(|t| t.as_str())
            .and_then(JobType::parse)
            .ok_or_else(|| Error::Validation("dispatch_job requires a valid type".into()))?;

        let dispatch = self
            .dispatcher
            .dispatch(DispatchParams {
                job_type,
                source: "agent-tool".into(),
                job: input.get("job").and_then(|v| v.as_str()).map(String::from),
                command: input
                    .get("command")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                url: input.get("url").and_then(|v| v.as_str()).map(String::from),
                method: input
                    .get("method")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                headers: None,
                vars: input.get("vars").cloned(),
                timeout_secs: None,
            })
            .await?;

        Ok(ToolExecution {
            result: format!("dispatched job {}", dispatch.job_id),
            job_id: Some(dispatch.job_id),
        })
    }
}
