//! End-to-end agent-loop scenarios against the scripted model.

mod common;

use common::{harness, text_response, tool_use_response};

use bs_brain::runtime::{self, AgentEvent, ChatOptions};

#[tokio::test]
async fn happy_path_chat() {
    let h = harness(vec![Ok(text_response("Hello!"))]);

    let outcome = runtime::chat(h.state.clone(), "Hi".into(), ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.response, "Hello!");
    assert_eq!(outcome.tool_call_count, 0);
    assert!(outcome.job_ids.is_empty());

    // One conversation, two message rows (user + assistant).
    let conversations = h.store.list_recent_conversations(10).unwrap();
    assert_eq!(conversations.len(), 1);
    let messages = h
        .store
        .messages_for_conversation(&outcome.conversation_id)
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "Hi");
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[1].content, "Hello!");
}

#[tokio::test]
async fn tool_calling_turn_emits_events_in_order() {
    let h = harness(vec![
        Ok(tool_use_response("tu1", "util_time", serde_json::json!({}))),
        Ok(text_response("The time is above.")),
    ]);

    let mut rx = runtime::chat_stream(h.state.clone(), "what time is it?".into(), ChatOptions::default());
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    // thinking → tool_result → delta* → done
    assert!(matches!(&events[0], AgentEvent::Thinking { tool } if tool == "util_time"));
    match &events[1] {
        AgentEvent::ToolResult { tool, summary } => {
            assert_eq!(tool, "util_time");
            assert!(summary.ends_with('Z'), "summary should be a timestamp: {summary}");
        }
        other => panic!("expected tool_result, got {other:?}"),
    }
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::Delta { text } if text.contains("time is above"))));
    match events.last().unwrap() {
        AgentEvent::Done {
            tool_call_count,
            job_ids,
            ..
        } => {
            assert_eq!(*tool_call_count, 1);
            assert!(job_ids.is_empty());
        }
        other => panic!("expected done, got {other:?}"),
    }
}

#[tokio::test]
async fn dispatching_tool_surfaces_job_ids() {
    let h = harness(vec![
        Ok(tool_use_response(
            "tu1",
            "dispatch_job",
            serde_json::json!({"type": "command", "command": "echo hi"}),
        )),
        Ok(text_response("Dispatched.")),
    ]);

    let outcome = runtime::chat(h.state.clone(), "run it".into(), ChatOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.tool_call_count, 1);
    assert_eq!(outcome.job_ids.len(), 1);
    let job = h.store.get_job(&outcome.job_ids[0]).unwrap().unwrap();
    assert_eq!(job.source, "agent-tool");
}

#[tokio::test]
async fn unknown_tool_becomes_a_tool_result_not_a_failure() {
    let h = harness(vec![
        Ok(tool_use_response("tu1", "no_such_tool", serde_json::json!({}))),
        Ok(text_response("I could not use that tool.")),
    ]);

    let mut rx = runtime::chat_stream(h.state.clone(), "try it".into(), ChatOptions::default());
    let mut saw_error_result = false;
    let mut terminal_done = false;
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::ToolResult { summary, .. } => {
                saw_error_result = summary.contains("failed") || summary.contains("unknown");
            }
            AgentEvent::Done { .. } => terminal_done = true,
            AgentEvent::Error { message } => panic!("turn should not fail: {message}"),
            _ => {}
        }
    }
    assert!(saw_error_result);
    assert!(terminal_done);
}

#[tokio::test]
async fn router_error_surfaces_as_error_event_and_keeps_user_message() {
    let h = harness(vec![Err(bs_domain::Error::Transient("model down".into()))]);

    let mut rx = runtime::chat_stream(h.state.clone(), "hello?".into(), ChatOptions::default());
    let mut saw_error = false;
    while let Some(event) = rx.recv().await {
        if let AgentEvent::Error { message } = event {
            assert!(message.contains("model down"));
            saw_error = true;
        }
    }
    assert!(saw_error);

    // The user message survived the failed turn.
    let conversations = h.store.list_recent_conversations(10).unwrap();
    let messages = h
        .store
        .messages_for_conversation(&conversations[0].id)
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "user");
}

#[tokio::test]
async fn unknown_conversation_id_is_an_error() {
    let h = harness(vec![Ok(text_response("unused"))]);
    let err = runtime::chat(
        h.state.clone(),
        "hi".into(),
        ChatOptions {
            conversation_id: Some("nope".into()),
            channel: None,
        },
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("nope"));
}

#[tokio::test]
async fn follow_up_turn_reuses_the_conversation() {
    let h = harness(vec![
        Ok(text_response("First answer.")),
        Ok(text_response("Second answer.")),
    ]);

    let first = runtime::chat(h.state.clone(), "one".into(), ChatOptions::default())
        .await
        .unwrap();
    let second = runtime::chat(
        h.state.clone(),
        "two".into(),
        ChatOptions {
            conversation_id: Some(first.conversation_id.clone()),
            channel: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(first.conversation_id, second.conversation_id);
    let messages = h
        .store
        .messages_for_conversation(&first.conversation_id)
        .unwrap();
    assert_eq!(messages.len(), 4);
}
