//! One agent turn: context assembly, the streaming tool loop, persistence,
//! and the post-turn observer/reflector hand-off.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::Instrument;

use bs_domain::chat::{ChatMessage, ChatResponse};
use bs_domain::stream::StreamEvent;
use bs_domain::{Error, Result};
use bs_providers::ChatParams;

use crate::context::{system_prompt_with_instructions, ContextBuilder};
use crate::runtime::{observer, AgentEvent, ChatOptions};
use crate::state::AppState;
use crate::truncate_str;

/// Maximum tool-call iterations per turn.
const MAX_TOOL_ITERATIONS: usize = 20;

/// Run one turn. Events arrive on the returned channel; the terminal event
/// is always `done` or `error`.
pub fn run_turn(
    state: AppState,
    message: String,
    opts: ChatOptions,
) -> mpsc::Receiver<AgentEvent> {
    let (tx, rx) = mpsc::channel::<AgentEvent>(64);

    let span = tracing::info_span!(
        "turn",
        conversation_id = tracing::field::Empty,
        channel = opts.channel.as_deref().unwrap_or("web"),
        "otel.kind" = "SERVER",
    );
    tokio::spawn(
        async move {
            let _guard = state.machine.begin_turn();
            if let Err(e) = run_turn_inner(&state, &message, &opts, &tx).await {
                tracing::warn!(error = %e, "turn failed");
                let _ = tx
                    .send(AgentEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        .instrument(span),
    );

    rx
}

async fn run_turn_inner(
    state: &AppState,
    message: &str,
    opts: &ChatOptions,
    tx: &mpsc::Sender<AgentEvent>,
) -> Result<()> {
    // ── Conversation + user message ───────────────────────────────
    let conversation = match &opts.conversation_id {
        Some(id) => state
            .store
            .get_conversation(id)?
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))?,
        None => state.store.create_conversation(None)?,
    };
    tracing::Span::current().record("conversation_id", conversation.id.as_str());
    state.store.add_message(&conversation.id, "user", message)?;

    // ── Long-term memory retrieval ────────────────────────────────
    let memories = match state
        .retriever
        .search(message, state.config.memory.top_k)
        .await
    {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(error = %e, "memory retrieval failed, continuing without");
            Vec::new()
        }
    };

    // ── Context + tools ───────────────────────────────────────────
    let system_prompt = system_prompt_with_instructions(&state.config, &state.store)?;
    let ctx = ContextBuilder::new(&state.store, &state.config.memory).build(
        &conversation.id,
        &system_prompt,
        &memories,
        state.router.use_oauth(),
        opts.channel.as_deref(),
    )?;
    let tools = state.registry.all_tool_definitions().await;

    let mut working = ctx.messages.clone();
    let mut full_text = String::new();
    let mut job_ids: Vec<String> = Vec::new();
    let mut tool_call_count: u32 = 0;

    // ── Tool loop ─────────────────────────────────────────────────
    let mut completed = false;
    for iteration in 0..MAX_TOOL_ITERATIONS {
        tracing::debug!(iteration, "model call");
        let response = match stream_one_call(state, &ctx.system, &tools, &working, tx).await {
            Ok(r) => r,
            Err(e) => {
                persist_partial(state, &conversation.id, &full_text);
                return Err(e);
            }
        };
        full_text.push_str(&response.text());

        if response.stop_reason.as_deref() != Some("tool_use") {
            completed = true;
            break;
        }

        // The model asked for tools: extend the working messages with its
        // blocks, then one tool_result message per call.
        working.push(ChatMessage::assistant_blocks(response.content.clone()));
        for (id, name, input) in response.tool_uses() {
            let _ = tx
                .send(AgentEvent::Thinking {
                    tool: name.to_string(),
                })
                .await;

            let tool_span = tracing::info_span!("tool.call", tool = name);
            let execution = async {
                match state.registry.execute(name, input).await {
                    Ok(execution) => execution,
                    // A failing tool is not a turn failure: hand the model
                    // the error text so it can react.
                    Err(e) => crate::registry::ToolExecution::text(format!(
                        "tool '{name}' failed: {e}"
                    )),
                }
            }
            .instrument(tool_span)
            .await;

            tool_call_count += 1;
            if let Some(job_id) = &execution.job_id {
                job_ids.push(job_id.clone());
            }
            working.push(ChatMessage::tool_result(id, &execution.result));
            let _ = tx
                .send(AgentEvent::ToolResult {
                    tool: name.to_string(),
                    summary: truncate_str(&execution.result, 200),
                })
                .await;
        }
    }

    if !completed {
        persist_partial(state, &conversation.id, &full_text);
        return Err(Error::Other(format!(
            "tool loop limit reached ({MAX_TOOL_ITERATIONS} iterations)"
        )));
    }

    // ── Persist + terminal event ──────────────────────────────────
    state
        .store
        .add_message(&conversation.id, "assistant", &full_text)?;
    let _ = tx
        .send(AgentEvent::Done {
            conversation_id: conversation.id.clone(),
            job_ids,
            tool_call_count,
        })
        .await;

    // ── Post-turn memory passes (never block the stream) ──────────
    if ctx.should_observe {
        let state = state.clone();
        let conversation_id = conversation.id.clone();
        tokio::spawn(async move {
            if let Err(e) = observer::run_observer(&state, &conversation_id).await {
                tracing::warn!(error = %e, "observer pass failed");
            }
        });
    }
    if ctx.should_reflect {
        let state = state.clone();
        let conversation_id = conversation.id.clone();
        tokio::spawn(async move {
            if let Err(e) = observer::run_reflector(&state, &conversation_id).await {
                tracing::warn!(error = %e, "reflector pass failed");
            }
        });
    }

    Ok(())
}

/// One streaming router call: forward deltas, return the validated final
/// response from `message_done`.
async fn stream_one_call(
    state: &AppState,
    system: &[bs_domain::chat::SystemBlock],
    tools: &[bs_domain::chat::ToolDefinition],
    working: &[ChatMessage],
    tx: &mpsc::Sender<AgentEvent>,
) -> Result<ChatResponse> {
    let mut stream = state
        .router
        .chat_stream(ChatParams {
            role: Some("agent".into()),
            system: system.to_vec(),
            tools: tools.to_vec(),
            messages: working.to_vec(),
            ..Default::default()
        })
        .await?;

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::TextDelta { text } => {
                let _ = tx.send(AgentEvent::Delta { text }).await;
            }
            StreamEvent::MessageDone { response } => return Ok(response),
        }
    }
    Err(Error::InvalidResponseShape(
        "stream ended without message_done".into(),
    ))
}

/// Keep whatever the model produced so the conversation state survives a
/// failed turn.
fn persist_partial(state: &AppState, conversation_id: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Err(e) = state.store.add_message(conversation_id, "assistant", text) {
        tracing::warn!(error = %e, "failed to persist partial assistant content");
    }
}
