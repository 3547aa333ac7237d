//! Shared test harness: scripted model adapter, in-memory bus and store,
//! fully wired `AppState`.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use bs_brain::extensions::ExtensionTracker;
use bs_brain::jobs::dispatcher::Dispatcher;
use bs_brain::lifecycle::{BrainState, BrainStateMachine};
use bs_brain::memory::NoopMemoryRetriever;
use bs_brain::registry::{JobsPlugin, SkillRegistry, ToolPlugin, UnifiedToolRegistry, UtilPlugin};
use bs_brain::sched::Scheduler;
use bs_brain::state::AppState;
use bs_bus::MemoryBus;
use bs_domain::chat::{ChatResponse, ContentBlock, Usage};
use bs_domain::config::{Config, ModelConfig, RouterConfig};
use bs_domain::stream::{BoxStream, StreamEvent};
use bs_domain::Result;
use bs_providers::{AdapterRequest, ModelRouter, ProviderAdapter};
use bs_store::Store;

pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Result<ChatResponse>>>,
}

impl ScriptedAdapter {
    pub fn new(script: Vec<Result<ChatResponse>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
        })
    }

    fn next(&self) -> Result<ChatResponse> {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(bs_domain::Error::Other("script exhausted".into())))
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
        "scripted"
    }
}

pub fn text_response(text: &str) -> ChatResponse {
    ChatResponse {
        content: vec![ContentBlock::Text { text: text.into() }],
        stop_reason: Some("end_turn".into()),
        model: "m".into(),
        usage: Usage {
            input_tokens: 5,
            output_tokens: 2,
        },
    }
}

pub fn tool_use_response(id: &str, name: &str, input: serde_json::Value) -> ChatResponse {
    ChatResponse {
        content: vec![ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }],
        stop_reason: Some("tool_use".into()),
        model: "m".into(),
        usage: Usage {
            input_tokens: 10,
            output_tokens: 6,
        },
    }
}

fn router_config() -> RouterConfig {
    RouterConfig {
        providers: HashMap::new(),
        models: vec![ModelConfig {
            id: "default".into(),
            model_name: "scripted-model".into(),
            provider: "scripted".into(),
            max_tokens: 1024,
            cost_per_1m_input: None,
            cost_per_1m_output: None,
        }],
        roles: HashMap::from([
            ("agent".to_string(), "default".to_string()),
            ("observer".to_string(), "default".to_string()),
            ("worker".to_string(), "default".to_string()),
        ]),
        fallback_chain: None,
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub bus: Arc<MemoryBus>,
    pub store: Arc<Store>,
}

/// Build a fully wired state around a scripted model.
pub fn harness(script: Vec<Result<ChatResponse>>) -> TestHarness {
    harness_with_state(script, BrainState::Active)
}

pub fn harness_with_state(
    script: Vec<Result<ChatResponse>>,
    initial: BrainState,
) -> TestHarness {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let bus = Arc::new(MemoryBus::new());
    let adapter = ScriptedAdapter::new(script);
    let router = Arc::new(ModelRouter::with_adapters(
        router_config(),
        HashMap::from([(
            "scripted".to_string(),
            adapter as Arc<dyn ProviderAdapter>,
        )]),
    ));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), bus.clone()));
    let plugins: Vec<Arc<dyn ToolPlugin>> = vec![
        Arc::new(UtilPlugin),
        Arc::new(JobsPlugin::new(dispatcher.clone())),
    ];
    let registry = Arc::new(UnifiedToolRegistry::new(
        Arc::new(SkillRegistry::new()),
        plugins,
    ));
    let scheduler = Arc::new(Scheduler::new(store.clone(), dispatcher.clone()));
    let machine = BrainStateMachine::new(initial, "v-test");

    let state = AppState {
        config: Arc::new(Config::default()),
        store: store.clone(),
        bus: bus.clone(),
        router,
        registry,
        retriever: Arc::new(NoopMemoryRetriever),
        dispatcher,
        scheduler,
        machine,
        extensions: ExtensionTracker::new(),
        auth_token_hash: None,
    };

    TestHarness { state, bus, store }
}
