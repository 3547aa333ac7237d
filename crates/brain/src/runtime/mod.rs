//! The agent runtime: streaming tool-calling turns plus the observer and
//! reflector passes that keep long conversations inside the context window.

pub mod observer;
pub mod turn;

use serde::Serialize;
use tokio::sync::mpsc;

use bs_domain::{Error, Result};

use crate::state::AppState;

pub use turn::run_turn;

/// Events emitted during one chat turn, in causal order: `delta`* with
/// interleaved `thinking`/`tool_result` pairs, then exactly one terminal
/// `done` or `error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "delta")]
    Delta { text: String },

    #[serde(rename = "thinking")]
    Thinking { tool: String },

    #[serde(rename = "tool_result")]
    ToolResult { tool: String, summary: String },

    #[serde(rename = "done")]
    Done {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "jobIds")]
        job_ids: Vec<String>,
        #[serde(rename = "toolCallCount")]
        tool_call_count: u32,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub conversation_id: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    #[serde(rename = "jobIds")]
    pub job_ids: Vec<String>,
    #[serde(rename = "toolCallCount")]
    pub tool_call_count: u32,
}

/// Non-streaming chat: run the turn and fold its event stream into one
/// outcome.
pub async fn chat(state: AppState, message: String, opts: ChatOptions) -> Result<ChatOutcome> {
    let mut rx = run_turn(state, message, opts);

    let mut response = String::new();
    let mut outcome: Option<ChatOutcome> = None;
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Delta { text } => response.push_str(&text),
            AgentEvent::Done {
                conversation_id,
                job_ids,
                tool_call_count,
            } => {
                outcome = Some(ChatOutcome {
                    response: std::mem::take(&mut response),
                    conversation_id,
                    job_ids,
                    tool_call_count,
                });
            }
            AgentEvent::Error { message } => return Err(Error::Other(message)),
            AgentEvent::Thinking { .. } | AgentEvent::ToolResult { .. } => {}
        }
    }
    outcome.ok_or_else(|| Error::Other("turn ended without a terminal event".into()))
}

/// Streaming chat: the caller reads [`AgentEvent`]s as they arrive.
pub fn chat_stream(
    state: AppState,
    message: String,
    opts: ChatOptions,
) -> mpsc::Receiver<AgentEvent> {
    run_turn(state, message, opts)
}
