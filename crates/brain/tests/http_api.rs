//! HTTP surface behavior: validation, auth, dispatch, health.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use common::{harness, harness_with_state, text_response};

use bs_brain::api;
use bs_brain::lifecycle::BrainState;
use bs_brain::state::AppState;

fn app(state: &AppState) -> axum::Router {
    api::router(state.clone()).with_state(state.clone())
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn chat_without_message_is_400() {
    let h = harness(vec![]);
    let resp = app(&h.state)
        .oneshot(post_json("/chat", r#"{"channel":"web"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["error"], "missing message");
}

#[tokio::test]
async fn chat_happy_path_returns_outcome() {
    let h = harness(vec![Ok(text_response("Hello!"))]);
    let resp = app(&h.state)
        .oneshot(post_json("/chat", r#"{"message":"Hi"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["response"], "Hello!");
    assert_eq!(json["toolCallCount"], 0);
    assert!(json["conversationId"].is_string());
}

#[tokio::test]
async fn webhook_rejects_bad_type_and_accepts_good() {
    let h = harness(vec![]);

    let resp = app(&h.state)
        .oneshot(post_json("/webhook", r#"{"type":"teleport"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app(&h.state)
        .oneshot(post_json(
            "/webhook",
            r#"{"type":"command","command":"echo ok"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "dispatched");
    let job_id = json["jobId"].as_str().unwrap();
    assert!(h.store.get_job(job_id).unwrap().is_some());
}

#[tokio::test]
async fn ping_is_503_while_pending() {
    let h = harness_with_state(vec![], BrainState::Pending);
    let resp = app(&h.state)
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn auth_gates_protected_routes_only() {
    let mut h = harness(vec![]);
    let state = AppState {
        auth_token_hash: Some(api::auth::hash_token("sekrit")),
        ..h.state.clone()
    };
    h.state = state;

    // Missing token → 401.
    let resp = app(&h.state)
        .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Wrong token → 401.
    let resp = app(&h.state)
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Right token → 200.
    let resp = app(&h.state)
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .header("authorization", "Bearer sekrit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Health bypasses auth.
    let resp = app(&h.state)
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_job_and_conversation_are_404() {
    let h = harness(vec![]);
    let resp = app(&h.state)
        .oneshot(
            Request::builder()
                .uri("/jobs/ghost/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app(&h.state)
        .oneshot(
            Request::builder()
                .uri("/conversations/ghost/messages")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mcp_registry_search_length_is_validated() {
    let h = harness(vec![]);
    for uri in ["/mcps/registry?search=", "/mcps/registry?search=a"] {
        let resp = app(&h.state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "uri {uri}");
    }
    let long = format!("/mcps/registry?search={}", "x".repeat(201));
    let resp = app(&h.state)
        .oneshot(Request::builder().uri(long).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn schedules_crud_over_http() {
    let h = harness(vec![]);

    let resp = app(&h.state)
        .oneshot(post_json(
            "/schedules",
            r#"{"name":"daily","schedule":"0 3 * * *","type":"command","config":{"command":"date"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();

    let resp = app(&h.state)
        .oneshot(
            Request::builder()
                .uri(format!("/schedules/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Bad cron on update → 400.
    let resp = app(&h.state)
        .oneshot({
            Request::builder()
                .method("PUT")
                .uri(format!("/schedules/{id}"))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"schedule":"whenever"}"#))
                .unwrap()
        })
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app(&h.state)
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/schedules/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    h.state.scheduler.shutdown();
}

#[tokio::test]
async fn secrets_are_write_only() {
    let h = harness(vec![]);

    let resp = app(&h.state)
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/secrets/api-key")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"value":"s3cret"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app(&h.state)
        .oneshot(
            Request::builder()
                .uri("/secrets")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["secrets"], serde_json::json!(["api-key"]));
    // Values never appear on the wire.
    assert!(!json.to_string().contains("s3cret"));
}
