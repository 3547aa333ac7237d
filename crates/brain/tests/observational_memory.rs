//! Observer and reflector passes against the scripted model.

mod common;

use common::{harness, text_response};

use bs_brain::runtime::observer::{run_observer, run_reflector};

#[tokio::test]
async fn observer_summarises_and_advances_the_cursor() {
    let h = harness(vec![Ok(text_response(
        "- user is planning a trip\n- prefers morning flights",
    ))]);
    let conv = h.store.create_conversation(None).unwrap();
    h.store.add_message(&conv.id, "user", "I am planning a trip").unwrap();
    h.store
        .add_message(&conv.id, "assistant", "Morning flights suit you best")
        .unwrap();

    let before = h.store.memory_state(&conv.id).unwrap().unwrap();
    assert!(before.unobserved_token_count > 0);

    run_observer(&h.state, &conv.id).await.unwrap();

    let after = h.store.memory_state(&conv.id).unwrap().unwrap();
    assert_eq!(after.observed_cursor_message_id, Some(2));
    assert_eq!(after.unobserved_token_count, 0);
    assert!(after.observation_token_count > 0);
    assert!(after.last_observer_run.is_some());

    let observations = h.store.list_observations(&conv.id).unwrap();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].source_message_from, 1);
    assert_eq!(observations[0].source_message_to, 2);

    let log = h.store.latest_observation_log(&conv.id).unwrap().unwrap();
    assert_eq!(log.version, 1);
    assert!(log.text.contains("morning flights"));
}

#[tokio::test]
async fn second_observer_pass_appends_a_log_version() {
    let h = harness(vec![
        Ok(text_response("- first batch")),
        Ok(text_response("- second batch")),
    ]);
    let conv = h.store.create_conversation(None).unwrap();
    h.store.add_message(&conv.id, "user", "first").unwrap();
    run_observer(&h.state, &conv.id).await.unwrap();

    h.store.add_message(&conv.id, "user", "second").unwrap();
    run_observer(&h.state, &conv.id).await.unwrap();

    let log = h.store.latest_observation_log(&conv.id).unwrap().unwrap();
    assert_eq!(log.version, 2);
    // The new active log keeps the previous bullets and appends the new.
    assert!(log.text.contains("first batch"));
    assert!(log.text.contains("second batch"));
}

#[tokio::test]
async fn observer_with_nothing_new_is_a_noop() {
    let h = harness(vec![]);
    let conv = h.store.create_conversation(None).unwrap();
    // No messages at all: no model call (the script is empty and would fail).
    run_observer(&h.state, &conv.id).await.unwrap();
    assert!(h.store.list_observations(&conv.id).unwrap().is_empty());
}

#[tokio::test]
async fn reflector_compresses_the_active_log() {
    let h = harness(vec![Ok(text_response("- compressed essence"))]);
    let conv = h.store.create_conversation(None).unwrap();
    h.store
        .upsert_observation_log(&conv.id, 1, &"- bullet\n".repeat(50), 500)
        .unwrap();

    run_reflector(&h.state, &conv.id).await.unwrap();

    let log = h.store.latest_observation_log(&conv.id).unwrap().unwrap();
    assert_eq!(log.version, 2);
    assert_eq!(log.text, "- compressed essence");

    let state = h.store.memory_state(&conv.id).unwrap().unwrap();
    assert!(state.observation_token_count < 500);
    assert!(state.last_reflector_run.is_some());
}

#[tokio::test]
async fn reflector_without_a_log_is_a_noop() {
    let h = harness(vec![]);
    let conv = h.store.create_conversation(None).unwrap();
    run_reflector(&h.state, &conv.id).await.unwrap();
    assert!(h.store.latest_observation_log(&conv.id).unwrap().is_none());
}
