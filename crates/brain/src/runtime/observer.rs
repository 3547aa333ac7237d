//! Observer and reflector passes.
//!
//! The observer summarises the unobserved message range into bullets and
//! advances the cursor; the reflector compresses the accumulated observation
//! log once it grows too large. Both commit through a lock-version CAS
//! in the store, so concurrent passes cannot interleave: the loser's
//! transaction writes nothing.

use bs_domain::chat::ChatMessage;
use bs_domain::tokens::estimate_tokens;
use bs_domain::trace::TraceEvent;
use bs_domain::Result;
use bs_providers::ChatParams;
use bs_store::ObserverCommit;

use crate::state::AppState;

const OBSERVER_PROMPT: &str = "You observe an assistant's conversation and keep \
    notes. Summarize the following turns as concise bullets. Preserve stated \
    facts, user preferences, decisions, and task outcomes. Omit pleasantries. \
    Output only the bullets.";

const REFLECTOR_PROMPT: &str = "Compress the following conversation notes into a \
    shorter set of bullets. Preserve decisions, preferences, durable facts, and \
    outcomes; drop anything transient or redundant. Output only the bullets.";

/// Summarise `(observed_cursor, latest]` and advance the cursor.
pub async fn run_observer(state: &AppState, conversation_id: &str) -> Result<()> {
    let Some(mem) = state.store.memory_state(conversation_id)? else {
        return Ok(());
    };
    let messages = state
        .store
        .messages_after(conversation_id, mem.observed_cursor_message_id)?;
    let Some(last) = messages.last() else {
        return Ok(());
    };
    let range_from = messages.first().map(|m| m.id).unwrap_or(last.id);
    let range_to = last.id;
    let observed_tokens: i64 = messages
        .iter()
        .map(|m| estimate_tokens(&m.content) as i64)
        .sum();

    let transcript: String = messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let response = state
        .router
        .chat(ChatParams {
            role: Some("observer".into()),
            messages: vec![ChatMessage::user(format!(
                "{OBSERVER_PROMPT}\n\nCONVERSATION:\n{transcript}"
            ))],
            max_tokens: Some(1024),
            ..Default::default()
        })
        .await?;
    let observation = response.text();
    if observation.trim().is_empty() {
        tracing::debug!(conversation_id, "observer produced no text, skipping");
        return Ok(());
    }
    let observation_tokens = estimate_tokens(&observation) as i64;

    // New active log = previous active text plus the new bullets.
    let previous = state.store.latest_observation_log(conversation_id)?;
    let (log_version, log_text) = match &previous {
        Some(log) => (log.version + 1, format!("{}\n{}", log.text, observation)),
        None => (1, observation.clone()),
    };
    let log_tokens = estimate_tokens(&log_text) as i64;

    let committed = state.store.commit_observer_pass(ObserverCommit {
        conversation_id,
        expected_lock_version: mem.lock_version,
        observation_text: &observation,
        observation_tokens,
        tags: None,
        source_from: range_from,
        source_to: range_to,
        log_version,
        log_text: &log_text,
        log_tokens,
        observed_tokens,
    })?;

    if committed {
        TraceEvent::ObserverRun {
            conversation_id: conversation_id.to_string(),
            observed_tokens: observed_tokens as u32,
            observation_tokens: observation_tokens as u32,
        }
        .emit();
        tracing::info!(
            conversation_id,
            range_from,
            range_to,
            observation_tokens,
            "observer pass committed"
        );
    } else {
        tracing::debug!(conversation_id, "observer lost the CAS race, aborting");
    }
    Ok(())
}

/// Compress the active observation log into a smaller version.
pub async fn run_reflector(state: &AppState, conversation_id: &str) -> Result<()> {
    let Some(mem) = state.store.memory_state(conversation_id)? else {
        return Ok(());
    };
    let Some(log) = state.store.latest_observation_log(conversation_id)? else {
        return Ok(());
    };

    let response = state
        .router
        .chat(ChatParams {
            role: Some("observer".into()),
            messages: vec![ChatMessage::user(format!(
                "{REFLECTOR_PROMPT}\n\nNOTES:\n{}",
                log.text
            ))],
            max_tokens: Some(1024),
            ..Default::default()
        })
        .await?;
    let compressed = response.text();
    if compressed.trim().is_empty() {
        tracing::debug!(conversation_id, "reflector produced no text, skipping");
        return Ok(());
    }
    let new_tokens = estimate_tokens(&compressed) as i64;

    let committed = state.store.commit_reflector_pass(
        conversation_id,
        mem.lock_version,
        log.version,
        log.version + 1,
        &compressed,
        new_tokens,
    )?;

    if committed {
        TraceEvent::ReflectorRun {
            conversation_id: conversation_id.to_string(),
            replaced_version: log.version,
            new_tokens: new_tokens as u32,
        }
        .emit();
        tracing::info!(
            conversation_id,
            replaced_version = log.version,
            new_tokens,
            "reflector pass committed"
        );
    } else {
        tracing::debug!(conversation_id, "reflector lost the CAS race, aborting");
    }
    Ok(())
}
