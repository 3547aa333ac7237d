//! Worker: consumes the durable `WORKERS` stream and executes jobs.
//!
//! Every delivery publishes `received` → `running` → `completed|failed` on
//! the per-job status subject, each message carrying the dispatch's trace id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tracing::Instrument;

use bs_bus::{publish_json, subjects, Bus};
use bs_domain::chat::ChatMessage;
use bs_domain::config::JobsConfig;
use bs_domain::{Error, Result};
use bs_providers::{ChatParams, ModelRouter};
use bs_store::{JobStatus, JobType};

use super::{JobDispatch, JobStatusMessage};

/// Longest accepted command line, in characters.
const MAX_COMMAND_CHARS: usize = 1024;

pub struct Worker {
    id: String,
    bus: Arc<dyn Bus>,
    router: Arc<ModelRouter>,
    config: JobsConfig,
    client: reqwest::Client,
}

impl Worker {
    pub fn new(id: impl Into<String>, bus: Arc<dyn Bus>, router: Arc<ModelRouter>, config: JobsConfig) -> Self {
        Self {
            id: id.into(),
            bus,
            router,
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Consume deliveries until the stream ends. Each job is acked after
    /// its terminal status publish; a crash before that point leaves the
    /// message unacked so the bus redelivers it.
    pub async fn run(&self) -> Result<()> {
        let mut jobs = self.bus.consume_jobs().await?;
        tracing::info!(worker_id = %self.id, "worker consuming");
        while let Some(delivery) = jobs.next().await {
            let dispatch: JobDispatch = match serde_json::from_slice(&delivery.payload) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable job payload, dropping");
                    delivery.ack().await;
                    continue;
                }
            };
            let span = tracing::info_span!(
                "job.execute",
                job_id = %dispatch.job_id,
                trace_id = %dispatch.trace_context.trace_id,
                "otel.kind" = "CONSUMER",
            );
            self.handle(&dispatch).instrument(span).await;
            delivery.ack().await;
        }
        Ok(())
    }

    /// Execute one job and publish its status transitions.
    pub async fn handle(&self, dispatch: &JobDispatch) {
        self.publish_status(dispatch, JobStatus::Received, None, None, None)
            .await;
        self.publish_status(dispatch, JobStatus::Running, None, None, None)
            .await;

        let t0 = Instant::now();
        let timeout = Duration::from_secs(
            dispatch
                .timeout_secs
                .unwrap_or(self.config.default_timeout_secs),
        );
        let outcome = match tokio::time::timeout(timeout, self.execute(dispatch)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "job exceeded {}s",
                timeout.as_secs()
            ))),
        };
        let duration_ms = t0.elapsed().as_millis() as i64;

        match outcome {
            Ok(result) => {
                tracing::info!(job_id = %dispatch.job_id, duration_ms, "job completed");
                self.publish_status(
                    dispatch,
                    JobStatus::Completed,
                    Some(result),
                    None,
                    Some(duration_ms),
                )
                .await;
            }
            Err(e) => {
                tracing::warn!(job_id = %dispatch.job_id, duration_ms, error = %e, "job failed");
                self.publish_status(
                    dispatch,
                    JobStatus::Failed,
                    None,
                    Some(e.to_string()),
                    Some(duration_ms),
                )
                .await;
            }
        }
    }

    async fn execute(&self, dispatch: &JobDispatch) -> Result<String> {
        match dispatch.job_type {
            JobType::Command => self.run_command(dispatch).await,
            JobType::Http => self.run_http(dispatch).await,
            JobType::Agent => self.run_agent(dispatch).await,
        }
    }

    // ── Command jobs ───────────────────────────────────────────────

    async fn run_command(&self, dispatch: &JobDispatch) -> Result<String> {
        let command = dispatch
            .command
            .as_deref()
            .ok_or_else(|| Error::Validation("command job without command".into()))?;
        let parsed = parse_command(command, &self.config.command_allowlist)?;
        check_path_arguments(&parsed.args, &self.config.allowed_paths)?;

        let mut cmd = tokio::process::Command::new(&parsed.binary);
        cmd.args(&parsed.args)
            .envs(parsed.env.iter().cloned())
            .kill_on_drop(true)
            .stdin(std::process::Stdio::null());

        let output = cmd.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            Err(Error::Other(format!(
                "command exited with {}: {}",
                output.status, stderr
            )))
        }
    }

    // ── HTTP jobs ──────────────────────────────────────────────────

    async fn run_http(&self, dispatch: &JobDispatch) -> Result<String> {
        let url = dispatch
            .url
            .as_deref()
            .ok_or_else(|| Error::Validation("http job without url".into()))?;
        let method: reqwest::Method = dispatch
            .method
            .as_deref()
            .unwrap_or("GET")
            .to_uppercase()
            .parse()
            .map_err(|_| Error::Validation("invalid HTTP method".into()))?;

        let mut req = self.client.request(method, url);
        if let Some(headers) = &dispatch.headers {
            for (name, value) in headers {
                req = req.header(name, value);
            }
        }
        if let Some(vars) = &dispatch.vars {
            req = req.json(vars);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(format!("HTTP {status}: {body}"))
    }

    // ── Agent jobs ─────────────────────────────────────────────────

    async fn run_agent(&self, dispatch: &JobDispatch) -> Result<String> {
        let instruction = dispatch
            .job
            .as_deref()
            .ok_or_else(|| Error::Validation("agent job without instruction".into()))?;
        let response = self
            .router
            .chat(ChatParams {
                role: Some("worker".into()),
                messages: vec![ChatMessage::user(instruction)],
                max_tokens: Some(1024),
                ..Default::default()
            })
            .await?;
        Ok(response.text())
    }

    async fn publish_status(
        &self,
        dispatch: &JobDispatch,
        status: JobStatus,
        result: Option<String>,
        error: Option<String>,
        duration_ms: Option<i64>,
    ) {
        let msg = JobStatusMessage {
            job_id: dispatch.job_id.clone(),
            worker_id: self.id.clone(),
            status,
            result,
            error,
            duration_ms,
            trace_id: Some(dispatch.trace_context.trace_id.clone()),
        };
        let subject = subjects::job_status_subject(&dispatch.job_id);
        if let Err(e) = publish_json(self.bus.as_ref(), &subject, &msg).await {
            tracing::warn!(job_id = %dispatch.job_id, error = %e, "status publish failed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, PartialEq)]
struct ParsedCommand {
    env: Vec<(String, String)>,
    binary: String,
    args: Vec<String>,
}

/// Validate and split a command line.
///
/// Leading `NAME=value` tokens become environment assignments; the next
/// token is the binary, whose basename (a leading absolute path is stripped
/// for the check) must be on the allowlist.
fn parse_command(command: &str, allowlist: &[String]) -> Result<ParsedCommand> {
    if command.chars().count() > MAX_COMMAND_CHARS {
        return Err(Error::Validation(format!(
            "command exceeds max length of {MAX_COMMAND_CHARS} characters"
        )));
    }

    let mut tokens = command.split_whitespace().peekable();
    let mut env = Vec::new();
    while let Some(token) = tokens.peek() {
        match parse_env_assignment(token) {
            Some(pair) => {
                env.push(pair);
                tokens.next();
            }
            None => break,
        }
    }

    let binary = tokens
        .next()
        .ok_or_else(|| Error::Validation("empty command".into()))?
        .to_string();
    let check_name = if binary.starts_with('/') {
        binary.rsplit('/').next().unwrap_or(&binary)
    } else {
        binary.as_str()
    };
    if !allowlist.iter().any(|allowed| allowed == check_name) {
        return Err(Error::Validation(format!(
            "binary '{check_name}' is not allowed"
        )));
    }

    Ok(ParsedCommand {
        env,
        binary,
        args: tokens.map(String::from).collect(),
    })
}

/// Absolute-path arguments must sit under an allowed mount. An empty list
/// denies all mounts.
fn check_path_arguments(args: &[String], allowed_paths: &[String]) -> Result<()> {
    for arg in args.iter().filter(|a| a.starts_with('/')) {
        let permitted = allowed_paths
            .iter()
            .any(|prefix| arg == prefix || arg.starts_with(&format!("{}/", prefix.trim_end_matches('/'))));
        if !permitted {
            return Err(Error::Validation(format!(
                "path '{arg}' is outside the allowed mounts"
            )));
        }
    }
    Ok(())
}

fn parse_env_assignment(token: &str) -> Option<(String, String)> {
    let (name, value) = token.split_once('=')?;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        || name.chars().next().is_some_and(|c| c.is_ascii_digit())
    {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}
