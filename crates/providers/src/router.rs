//! The ModelRouter: role resolution, adapter selection, per-provider
//! breakers, fallback on non-streaming calls, and usage auditing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use bs_domain::chat::{ChatMessage, ChatResponse, SystemBlock, ToolDefinition};
use bs_domain::config::{ModelConfig, ProviderKind, RouterConfig};
use bs_domain::stream::{BoxStream, StreamEvent};
use bs_domain::trace::TraceEvent;
use bs_domain::{Error, Result};

use crate::anthropic::AnthropicAdapter;
use crate::breaker::CircuitBreaker;
use crate::openai_compat::OpenAiCompatAdapter;
use crate::traits::{AdapterRequest, ProviderAdapter};
use crate::util::mask_secrets;

/// Deadline for a non-streaming call (per candidate).
const NON_STREAM_TIMEOUT: Duration = Duration::from_secs(150);
/// Deadline for establishing a streaming call.
const STREAM_TIMEOUT: Duration = Duration::from_secs(300);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A routed chat request. The caller speaks in roles; the router picks the
/// model unless `model_override` pins one.
#[derive(Debug, Clone, Default)]
pub struct ChatParams {
    pub role: Option<String>,
    pub model_override: Option<String>,
    pub system: Vec<SystemBlock>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
}

/// Audit record handed to the `on_api_call` callback after every outbound
/// call, success or failure.
#[derive(Debug, Clone)]
pub struct ApiCallInfo {
    pub provider: String,
    pub model: String,
    pub duration_ms: u64,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub error: Option<String>,
}

/// Partial config merge for [`ModelRouter::update_config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub roles: Option<HashMap<String, String>>,
    pub fallback_chain: Option<Vec<String>>,
}

type AuditCallback = Arc<dyn Fn(ApiCallInfo) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ModelRouter {
    config: RwLock<RouterConfig>,
    adapters: RwLock<HashMap<String, Arc<dyn ProviderAdapter>>>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    on_api_call: RwLock<Option<AuditCallback>>,
    use_oauth: bool,
}

impl ModelRouter {
    /// Build the router from config. Anthropic-protocol adapters are
    /// constructed eagerly (a bad credential should surface at startup);
    /// OpenAI-compat adapters are constructed on first use.
    pub fn from_config(config: RouterConfig) -> Result<Self> {
        let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        let mut use_oauth = false;

        for (key, pc) in &config.providers {
            match pc.kind {
                ProviderKind::AnthropicNative | ProviderKind::AnthropicCompat => {
                    match AnthropicAdapter::from_config(key, pc) {
                        Ok(adapter) => {
                            if pc.kind == ProviderKind::AnthropicNative && adapter.uses_oauth() {
                                use_oauth = true;
                            }
                            tracing::info!(provider = %key, kind = ?pc.kind, "registered provider");
                            adapters.insert(key.clone(), Arc::new(adapter));
                        }
                        Err(e) => {
                            tracing::warn!(
                                provider = %key,
                                error = %mask_secrets(&e.to_string()),
                                "failed to initialize provider, skipping"
                            );
                        }
                    }
                }
                ProviderKind::OpenaiCompat => {
                    // Lazy: constructed on first use.
                }
            }
        }

        Ok(Self {
            config: RwLock::new(config),
            adapters: RwLock::new(adapters),
            breakers: Mutex::new(HashMap::new()),
            on_api_call: RwLock::new(None),
            use_oauth,
        })
    }

    /// Build from pre-constructed adapters (used by tests).
    pub fn with_adapters(
        config: RouterConfig,
        adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            adapters: RwLock::new(adapters),
            breakers: Mutex::new(HashMap::new()),
            on_api_call: RwLock::new(None),
            use_oauth: false,
        }
    }

    /// Whether the Anthropic credential in use is an OAuth token.
    pub fn use_oauth(&self) -> bool {
        self.use_oauth
    }

    /// Register the audit callback, invoked after every call.
    pub fn set_on_api_call(&self, cb: impl Fn(ApiCallInfo) + Send + Sync + 'static) {
        *self.on_api_call.write() = Some(Arc::new(cb));
    }

    /// Merge roles and/or the fallback chain in place.
    pub fn update_config(&self, update: ConfigUpdate) {
        let mut cfg = self.config.write();
        if let Some(roles) = update.roles {
            cfg.roles.extend(roles);
        }
        if let Some(chain) = update.fallback_chain {
            cfg.fallback_chain = Some(chain);
        }
    }

    pub fn model_for_role(&self, role: &str) -> Option<ModelConfig> {
        let cfg = self.config.read();
        let id = cfg.roles.get(role)?;
        cfg.model(id).cloned()
    }

    // ── Resolution ─────────────────────────────────────────────────

    fn resolve_primary(&self, params: &ChatParams) -> Result<ModelConfig> {
        let cfg = self.config.read();
        let model_id = match &params.model_override {
            Some(id) => id.clone(),
            None => {
                let role = params.role.as_deref().unwrap_or("agent");
                cfg.roles
                    .get(role)
                    .cloned()
                    .ok_or_else(|| Error::UnknownRole(role.to_string()))?
            }
        };
        cfg.model(&model_id)
            .cloned()
            .ok_or_else(|| Error::UnknownModelId(model_id))
    }

    fn fallback_candidates(&self, primary_id: &str) -> Vec<ModelConfig> {
        let cfg = self.config.read();
        cfg.fallback_chain
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|id| id.as_str() != primary_id)
            .filter_map(|id| {
                let model = cfg.model(id).cloned();
                if model.is_none() {
                    tracing::warn!(model_id = %id, "fallback model id unknown, skipping");
                }
                model
            })
            .collect()
    }

    fn adapter_for(&self, provider_key: &str) -> Result<Arc<dyn ProviderAdapter>> {
        if let Some(adapter) = self.adapters.read().get(provider_key) {
            return Ok(adapter.clone());
        }
        // Lazy path for openai-compat providers.
        let cfg = self.config.read();
        let pc = cfg.providers.get(provider_key).ok_or_else(|| {
            Error::Config(format!("model references unknown provider '{provider_key}'"))
        })?;
        if pc.kind != ProviderKind::OpenaiCompat {
            return Err(Error::Unavailable(format!(
                "provider '{provider_key}' failed to initialize at startup"
            )));
        }
        let adapter: Arc<dyn ProviderAdapter> =
            Arc::new(OpenAiCompatAdapter::from_config(provider_key, pc)?);
        drop(cfg);
        self.adapters
            .write()
            .insert(provider_key.to_string(), adapter.clone());
        Ok(adapter)
    }

    fn breaker_for(&self, provider_key: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .entry(provider_key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider_key)))
            .clone()
    }

    fn audit(&self, info: ApiCallInfo) {
        TraceEvent::ModelCall {
            provider: info.provider.clone(),
            model: info.model.clone(),
            duration_ms: info.duration_ms,
            input_tokens: info.input_tokens,
            output_tokens: info.output_tokens,
            error: info.error.clone(),
        }
        .emit();
        if let Some(cb) = self.on_api_call.read().clone() {
            cb(info);
        }
    }

    fn request_for(&self, params: &ChatParams, model: &ModelConfig) -> AdapterRequest {
        AdapterRequest {
            system: params.system.clone(),
            messages: params.messages.clone(),
            tools: params.tools.clone(),
            max_tokens: params.max_tokens.unwrap_or(model.max_tokens),
        }
    }

    // ── Non-streaming chat with fallback ───────────────────────────

    pub async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        let primary = self.resolve_primary(&params)?;
        let mut candidates = vec![primary.clone()];
        candidates.extend(self.fallback_candidates(&primary.id));

        let total = candidates.len();
        let mut last_err: Option<Error> = None;

        for (idx, model) in candidates.into_iter().enumerate() {
            if idx > 0 {
                TraceEvent::ModelFallback {
                    from_model: primary.id.clone(),
                    to_model: model.id.clone(),
                    reason: last_err
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_default(),
                }
                .emit();
            }

            let adapter = match self.adapter_for(&model.provider) {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(model_id = %model.id, error = %e, "provider unavailable");
                    last_err = Some(e);
                    continue;
                }
            };
            let breaker = self.breaker_for(&model.provider);
            let req = self.request_for(&params, &model);

            let start = Instant::now();
            let result = breaker
                .call(async {
                    tokio::time::timeout(NON_STREAM_TIMEOUT, adapter.chat(&model.model_name, &req))
                        .await
                        .map_err(|_| {
                            Error::Timeout(format!(
                                "model '{}' exceeded {}s",
                                model.id,
                                NON_STREAM_TIMEOUT.as_secs()
                            ))
                        })?
                })
                .await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    self.audit(ApiCallInfo {
                        provider: model.provider.clone(),
                        model: model.model_name.clone(),
                        duration_ms,
                        input_tokens: Some(response.usage.input_tokens),
                        output_tokens: Some(response.usage.output_tokens),
                        error: None,
                    });
                    return Ok(response);
                }
                Err(e) => {
                    self.audit(ApiCallInfo {
                        provider: model.provider.clone(),
                        model: model.model_name.clone(),
                        duration_ms,
                        input_tokens: None,
                        output_tokens: None,
                        error: Some(e.to_string()),
                    });
                    // A structurally wrong response is not a provider blip;
                    // retrying another model would mask the bug.
                    if matches!(e, Error::InvalidResponseShape(_)) {
                        return Err(e);
                    }
                    if idx + 1 < total {
                        tracing::warn!(
                            model_id = %model.id,
                            error = %e,
                            "model call failed, trying next candidate"
                        );
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Unavailable("no model candidates".into())))
    }

    // ── Streaming chat (no fallback) ───────────────────────────────

    pub async fn chat_stream(
        &self,
        params: ChatParams,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let model = self.resolve_primary(&params)?;
        let adapter = self.adapter_for(&model.provider)?;
        let breaker = self.breaker_for(&model.provider);

        // Streaming fails fast while the breaker is open.
        breaker.try_acquire()?;

        let req = self.request_for(&params, &model);
        let start = Instant::now();

        let established = tokio::time::timeout(
            STREAM_TIMEOUT,
            adapter.chat_stream(&model.model_name, &req),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "model '{}' stream exceeded {}s",
                model.id,
                STREAM_TIMEOUT.as_secs()
            ))
        })
        .and_then(|r| r);

        let mut stream = match established {
            Ok(s) => {
                breaker.record_success();
                s
            }
            Err(e) => {
                breaker.record_failure();
                self.audit(ApiCallInfo {
                    provider: model.provider.clone(),
                    model: model.model_name.clone(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    input_tokens: None,
                    output_tokens: None,
                    error: Some(e.to_string()),
                });
                return Err(e);
            }
        };

        // Wrap the stream so the audit callback fires at the terminal event.
        let on_api_call = self.on_api_call.read().clone();
        let provider = model.provider.clone();
        let model_name = model.model_name.clone();
        Ok(Box::pin(async_stream::stream! {
            use futures_util::StreamExt;
            let mut audited = false;
            while let Some(event) = stream.next().await {
                match &event {
                    Ok(StreamEvent::MessageDone { response }) => {
                        audited = true;
                        let info = ApiCallInfo {
                            provider: provider.clone(),
                            model: model_name.clone(),
                            duration_ms: start.elapsed().as_millis() as u64,
                            input_tokens: Some(response.usage.input_tokens),
                            output_tokens: Some(response.usage.output_tokens),
                            error: None,
                        };
                        TraceEvent::ModelCall {
                            provider: info.provider.clone(),
                            model: info.model.clone(),
                            duration_ms: info.duration_ms,
                            input_tokens: info.input_tokens,
                            output_tokens: info.output_tokens,
                            error: None,
                        }
                        .emit();
                        if let Some(cb) = &on_api_call {
                            cb(info);
                        }
                    }
                    Err(e) if !audited => {
                        audited = true;
                        if let Some(cb) = &on_api_call {
                            cb(ApiCallInfo {
                                provider: provider.clone(),
                                model: model_name.clone(),
                                duration_ms: start.elapsed().as_millis() as u64,
                                input_tokens: None,
                                output_tokens: None,
                                error: Some(e.to_string()),
                            });
                        }
                    }
                    _ => {}
                }
                yield event;
            }
        }))
    }
}
