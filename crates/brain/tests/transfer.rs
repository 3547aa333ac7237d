//! Zero-downtime brain transfer over the in-memory bus, plus the draining
//! behavior of the HTTP surface.

mod common;

use std::time::Duration;

use common::{harness, harness_with_state, text_response};

use bs_brain::api;
use bs_brain::lifecycle::{BrainState, BrainStateMachine, TransferHandler};
use bs_domain::config::BrainConfig;

fn transfer_config() -> BrainConfig {
    BrainConfig {
        drain_deadline_secs: 1,
        ready_timeout_secs: 60,
        ..Default::default()
    }
}

#[tokio::test]
async fn ready_clear_handshake_hands_over() {
    // Outgoing and incoming brains share the bus and the store (the store
    // models the shared data volume).
    let h = harness(vec![]);
    let store = h.store.clone();
    let bus = h.state.bus.clone();

    // Seed state the handoff note should carry.
    let conv = store.create_conversation(Some("live chat")).unwrap();
    store.add_message(&conv.id, "user", "still here").unwrap();

    let outgoing = BrainStateMachine::new(BrainState::Active, "v1");
    let incoming = BrainStateMachine::new(BrainState::Pending, "v2");

    let outgoing_handler = TransferHandler::new(
        outgoing.clone(),
        bus.clone(),
        store.clone(),
        transfer_config(),
    );
    let incoming_handler = TransferHandler::new(
        incoming.clone(),
        bus.clone(),
        store.clone(),
        transfer_config(),
    );

    // The active brain subscribes first, then the pending brain announces.
    let outgoing_task = tokio::spawn(async move { outgoing_handler.run_active().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let incoming_task = tokio::spawn(async move { incoming_handler.run_pending().await });

    tokio::time::timeout(Duration::from_secs(5), outgoing_task)
        .await
        .expect("outgoing brain should finish the transfer")
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), incoming_task)
        .await
        .expect("incoming brain should activate")
        .unwrap()
        .unwrap();

    assert_eq!(outgoing.state(), BrainState::Shutdown);
    assert_eq!(incoming.state(), BrainState::Active);

    let note = store.latest_handoff_note().unwrap().unwrap();
    assert_eq!(note.from_version, "v1");
    assert_eq!(note.to_version.as_deref(), Some("v2"));
    let active = note.active_conversations.as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["id"], serde_json::json!(conv.id));
}

#[tokio::test]
async fn pending_brain_fresh_starts_after_timeout() {
    let h = harness(vec![]);
    let machine = BrainStateMachine::new(BrainState::Pending, "v2");
    let handler = TransferHandler::new(
        machine.clone(),
        h.state.bus.clone(),
        h.store.clone(),
        BrainConfig {
            ready_timeout_secs: 1,
            ..Default::default()
        },
    );

    tokio::time::timeout(Duration::from_secs(5), handler.run_pending())
        .await
        .expect("fresh start should fire")
        .unwrap();
    assert_eq!(machine.state(), BrainState::Active);
}

#[tokio::test]
async fn draining_brain_rejects_chat_with_503() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    let h = harness_with_state(vec![Ok(text_response("unused"))], BrainState::Active);
    // Move into draining the legal way.
    h.state
        .machine
        .transition(BrainState::Draining)
        .unwrap();

    let app = api::router(h.state.clone()).with_state(h.state.clone());

    let chat_req = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"message":"hi"}"#))
        .unwrap();
    let resp = app.clone().oneshot(chat_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "service draining");
    assert_eq!(json["state"], "draining");

    // Health and state stay reachable while draining.
    let ping = Request::builder()
        .method("GET")
        .uri("/ping")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(ping).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let brain_state = Request::builder()
        .method("GET")
        .uri("/brain/state")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(brain_state).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
