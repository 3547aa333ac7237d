//! Router behavior against scripted adapters: fallback, breaker, auditing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use bs_domain::chat::{ChatMessage, ChatResponse, ContentBlock, Usage};
use bs_domain::config::{ModelConfig, RouterConfig};
use bs_domain::stream::{BoxStream, StreamEvent};
use bs_domain::{Error, Result};
use bs_providers::router::ConfigUpdate;
use bs_providers::{AdapterRequest, ApiCallInfo, ChatParams, ModelRouter, ProviderAdapter};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScriptedAdapter {
    key: String,
    invocations: Arc<AtomicUsize>,
    script: Mutex<VecDeque<Result<ChatResponse>>>,
}

impl ScriptedAdapter {
    fn new(key: &str, script: Vec<Result<ChatResponse>>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let invocations = Arc::new(AtomicUsize::new(0));
        let adapter = Arc::new(Self {
            key: key.to_string(),
            invocations: invocations.clone(),
            script: Mutex::new(script.into()),
        });
        (adapter, invocations)
    }

    fn next(&self) -> Result<ChatResponse> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Other("script exhausted".into())))
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn chat(&self, _model: &str, _req: &AdapterRequest) -> Result<ChatResponse> {
        self.next()
    }

    async fn chat_stream(
        &self,
        _model: &str,
        _req: &AdapterRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.next()?;
        Ok(Box::pin(async_stream::stream! {
            let text = response.text();
            if !text.is_empty() {
                yield Ok(StreamEvent::TextDelta { text });
            }
            yield Ok(StreamEvent::MessageDone { response });
        }))
    }

    fn provider_key(&self) -> &str {
        &self.key
    }
}

fn ok_response(text: &str, model: &str) -> ChatResponse {
    ChatResponse {
        content: vec![ContentBlock::Text { text: text.into() }],
        stop_reason: Some("end_turn".into()),
        model: model.into(),
        usage: Usage {
            input_tokens: 5,
            output_tokens: 2,
        },
    }
}

fn model(id: &str, provider: &str) -> ModelConfig {
    ModelConfig {
        id: id.into(),
        model_name: format!("{id}-wire"),
        provider: provider.into(),
        max_tokens: 1024,
        cost_per_1m_input: None,
        cost_per_1m_output: None,
    }
}

fn config(fallback: Option<Vec<&str>>) -> RouterConfig {
    RouterConfig {
        providers: HashMap::new(),
        models: vec![model("sonnet-4", "anthropic"), model("haiku-4.5", "anthropic")],
        roles: HashMap::from([("agent".to_string(), "sonnet-4".to_string())]),
        fallback_chain: fallback.map(|v| v.into_iter().map(String::from).collect()),
    }
}

fn params(text: &str) -> ChatParams {
    ChatParams {
        role: Some("agent".into()),
        messages: vec![ChatMessage::user(text)],
        ..Default::default()
    }
}

fn audit_log(router: &ModelRouter) -> Arc<Mutex<Vec<ApiCallInfo>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log2 = log.clone();
    router.set_on_api_call(move |info| log2.lock().push(info));
    log
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_path_chat() {
    let (adapter, _) = ScriptedAdapter::new("anthropic", vec![Ok(ok_response("Hello!", "m"))]);
    let router = ModelRouter::with_adapters(
        config(None),
        HashMap::from([("anthropic".to_string(), adapter as Arc<dyn ProviderAdapter>)]),
    );

    let resp = router.chat(params("Hi")).await.unwrap();
    assert_eq!(resp.text(), "Hello!");
    assert_eq!(resp.usage.input_tokens, 5);
}

#[tokio::test]
async fn fallback_succeeds_and_audits_both_calls() {
    let (adapter, invocations) = ScriptedAdapter::new(
        "anthropic",
        vec![
            Err(Error::Other("primary failed".into())),
            Ok(ok_response("from haiku", "haiku-4.5-wire")),
        ],
    );
    let router = ModelRouter::with_adapters(
        config(Some(vec!["sonnet-4", "haiku-4.5"])),
        HashMap::from([("anthropic".to_string(), adapter as Arc<dyn ProviderAdapter>)]),
    );
    let log = audit_log(&router);

    let resp = router.chat(params("Hi")).await.unwrap();
    assert_eq!(resp.text(), "from haiku");
    assert_eq!(invocations.load(Ordering::SeqCst), 2);

    let log = log.lock();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].error.as_deref(), Some("primary failed"));
    assert!(log[1].error.is_none());
    assert_eq!(log[1].input_tokens, Some(5));
    assert_eq!(log[1].output_tokens, Some(2));
}

#[tokio::test]
async fn exhausted_fallbacks_surface_the_last_error() {
    let (adapter, _) = ScriptedAdapter::new(
        "anthropic",
        vec![
            Err(Error::Other("first".into())),
            Err(Error::Other("second".into())),
        ],
    );
    let router = ModelRouter::with_adapters(
        config(Some(vec!["haiku-4.5"])),
        HashMap::from([("anthropic".to_string(), adapter as Arc<dyn ProviderAdapter>)]),
    );

    let err = router.chat(params("Hi")).await.unwrap_err();
    assert!(err.to_string().contains("second"));
}

#[tokio::test]
async fn invalid_shape_is_not_retried() {
    let (adapter, invocations) = ScriptedAdapter::new(
        "anthropic",
        vec![
            Err(Error::InvalidResponseShape("missing usage".into())),
            Ok(ok_response("never reached", "m")),
        ],
    );
    let router = ModelRouter::with_adapters(
        config(Some(vec!["haiku-4.5"])),
        HashMap::from([("anthropic".to_string(), adapter as Arc<dyn ProviderAdapter>)]),
    );

    let err = router.chat(params("Hi")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidResponseShape(_)));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_role_and_model_errors() {
    let (adapter, _) = ScriptedAdapter::new("anthropic", vec![]);
    let router = ModelRouter::with_adapters(
        config(None),
        HashMap::from([("anthropic".to_string(), adapter as Arc<dyn ProviderAdapter>)]),
    );

    let err = router
        .chat(ChatParams {
            role: Some("nonexistent".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownRole(_)));

    let err = router
        .chat(ChatParams {
            model_override: Some("no-such-model".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownModelId(_)));
}

#[tokio::test]
async fn stream_yields_deltas_then_done() {
    use futures_util::StreamExt;

    let (adapter, _) = ScriptedAdapter::new("anthropic", vec![Ok(ok_response("Hello!", "m"))]);
    let router = ModelRouter::with_adapters(
        config(None),
        HashMap::from([("anthropic".to_string(), adapter as Arc<dyn ProviderAdapter>)]),
    );

    let mut stream = router.chat_stream(params("Hi")).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert!(matches!(first, StreamEvent::TextDelta { ref text } if text == "Hello!"));
    let second = stream.next().await.unwrap().unwrap();
    assert!(matches!(second, StreamEvent::MessageDone { .. }));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn five_stream_failures_open_the_breaker() {
    let (adapter, invocations) = ScriptedAdapter::new(
        "anthropic",
        (0..5)
            .map(|i| Err(Error::Transient(format!("fail {i}"))))
            .collect(),
    );
    let router = ModelRouter::with_adapters(
        config(None),
        HashMap::from([("anthropic".to_string(), adapter as Arc<dyn ProviderAdapter>)]),
    );

    for _ in 0..5 {
        let err = match router.chat_stream(params("Hi")).await {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, Error::Transient(_)));
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 5);

    // Sixth call fails fast without touching the adapter.
    let err = match router.chat_stream(params("Hi")).await {
        Err(e) => e,
        Ok(_) => panic!("expected error"),
    };
    assert!(matches!(err, Error::BreakerOpen { .. }));
    assert_eq!(invocations.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn stream_does_not_fall_back() {
    let (adapter, invocations) = ScriptedAdapter::new(
        "anthropic",
        vec![Err(Error::Transient("stream down".into()))],
    );
    let router = ModelRouter::with_adapters(
        config(Some(vec!["haiku-4.5"])),
        HashMap::from([("anthropic".to_string(), adapter as Arc<dyn ProviderAdapter>)]),
    );

    let err = match router.chat_stream(params("Hi")).await {
        Err(e) => e,
        Ok(_) => panic!("expected error"),
    };
    assert!(matches!(err, Error::Transient(_)));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn update_config_merges_roles_and_chain() {
    let (adapter, _) = ScriptedAdapter::new(
        "anthropic",
        vec![Ok(ok_response("observer reply", "haiku-4.5-wire"))],
    );
    let router = ModelRouter::with_adapters(
        config(None),
        HashMap::from([("anthropic".to_string(), adapter as Arc<dyn ProviderAdapter>)]),
    );

    router.update_config(ConfigUpdate {
        roles: Some(HashMap::from([(
            "observer".to_string(),
            "haiku-4.5".to_string(),
        )])),
        fallback_chain: Some(vec!["haiku-4.5".to_string()]),
    });

    let resp = router
        .chat(ChatParams {
            role: Some("observer".into()),
            messages: vec![ChatMessage::user("summarize")],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(resp.text(), "observer reply");
    assert_eq!(
        router.model_for_role("observer").unwrap().id,
        "haiku-4.5"
    );
}
