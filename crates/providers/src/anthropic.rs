//! Anthropic Messages adapter.
//!
//! Serves two provider kinds: `anthropic-native` (canonical endpoint,
//! `x-api-key` or OAuth bearer) and `anthropic-compat` (the same wire
//! protocol at a custom base URL, e.g. OpenRouter, always bearer auth).

use async_trait::async_trait;
use serde_json::Value;

use bs_domain::chat::{ChatMessage, ContentBlock, MessageContent, Role};
use bs_domain::config::{ProviderConfig, ProviderKind};
use bs_domain::stream::{BoxStream, StreamEvent};
use bs_domain::{Error, Result};

use crate::sse::data_line_stream;
use crate::traits::{AdapterRequest, ProviderAdapter};
use crate::util::from_reqwest;
use crate::validate;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Substring marking an Anthropic OAuth access token.
pub const OAUTH_TOKEN_MARKER: &str = "sk-ant-oat";

#[derive(Debug)]
enum Credential {
    ApiKey(String),
    Bearer(String),
}

#[derive(Debug)]
pub struct AnthropicAdapter {
    key: String,
    base_url: String,
    credential: Credential,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn from_config(key: &str, cfg: &ProviderConfig) -> Result<Self> {
        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        // The OAuth token wins when both credentials are configured.
        let credential = match (&cfg.oauth_token, &cfg.api_key) {
            (Some(token), _) => Credential::Bearer(token.clone()),
            (None, Some(api_key)) => match cfg.kind {
                ProviderKind::AnthropicNative => Credential::ApiKey(api_key.clone()),
                _ => Credential::Bearer(api_key.clone()),
            },
            (None, None) => {
                return Err(Error::Config(format!(
                    "provider '{key}' has neither api_key nor oauth_token"
                )))
            }
        };

        Ok(Self {
            key: key.to_string(),
            base_url,
            credential,
            client: reqwest::Client::new(),
        })
    }

    /// True when the selected credential is an OAuth token; consumed by the
    /// context builder to prepend the Claude-Code identity block.
    pub fn uses_oauth(&self) -> bool {
        match &self.credential {
            Credential::Bearer(t) => t.contains(OAUTH_TOKEN_MARKER),
            Credential::ApiKey(k) => k.contains(OAUTH_TOKEN_MARKER),
        }
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        match &self.credential {
            Credential::ApiKey(key) => builder.header("x-api-key", key),
            Credential::Bearer(token) => builder.bearer_auth(token),
        }
    }

    fn build_body(&self, model_name: &str, req: &AdapterRequest, stream: bool) -> Value {
        let system: Vec<Value> = req
            .system
            .iter()
            .map(|block| {
                let mut v = serde_json::json!({"type": "text", "text": block.text});
                if block.cache {
                    v["cache_control"] = serde_json::json!({"type": "ephemeral"});
                }
                v
            })
            .collect();

        let messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();

        let mut body = serde_json::json!({
            "model": model_name,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = Value::Array(system);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn message_to_wire(msg: &ChatMessage) -> Value {
    match msg.role {
        Role::User => serde_json::json!({
            "role": "user",
            "content": content_to_wire(&msg.content),
        }),
        Role::Assistant => serde_json::json!({
            "role": "assistant",
            "content": content_to_wire(&msg.content),
        }),
        // Tool results travel as user messages with tool_result blocks.
        Role::Tool => serde_json::json!({
            "role": "user",
            "content": content_to_wire(&msg.content),
        }),
    }
}

fn content_to_wire(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(t) => Value::String(t.clone()),
        MessageContent::Blocks(blocks) => {
            let arr: Vec<Value> = blocks
                .iter()
                .map(|b| serde_json::to_value(b).unwrap_or(Value::Null))
                .collect();
            Value::Array(arr)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembles a full Messages response from the SSE event sequence so the
/// terminal `message_done` can carry a validated response.
struct StreamState {
    model: String,
    // index -> partially assembled wire block
    open_blocks: std::collections::HashMap<u64, Value>,
    // index -> accumulated input_json buffer for tool_use blocks
    json_buffers: std::collections::HashMap<u64, String>,
    content: Vec<(u64, Value)>,
    input_tokens: u64,
    output_tokens: u64,
    stop_reason: Option<String>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            model: "unknown".into(),
            open_blocks: Default::default(),
            json_buffers: Default::default(),
            content: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            stop_reason: None,
        }
    }

    /// Handle one SSE payload; returns deltas to yield and whether the
    /// message is complete.
    fn handle(&mut self, data: &str) -> Result<(Vec<StreamEvent>, bool)> {
        let v: Value = serde_json::from_str(data)?;
        let event_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let mut deltas = Vec::new();

        match event_type {
            "message_start" => {
                if let Some(msg) = v.get("message") {
                    if let Some(model) = msg.get("model").and_then(|m| m.as_str()) {
                        self.model = model.to_string();
                    }
                    if let Some(usage) = msg.get("usage") {
                        self.input_tokens =
                            usage.get("input_tokens").and_then(|t| t.as_u64()).unwrap_or(0);
                        self.output_tokens = usage
                            .get("output_tokens")
                            .and_then(|t| t.as_u64())
                            .unwrap_or(0);
                    }
                }
            }
            "content_block_start" => {
                let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                if let Some(block) = v.get("content_block") {
                    self.open_blocks.insert(idx, block.clone());
                    self.json_buffers.insert(idx, String::new());
                }
            }
            "content_block_delta" => {
                let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                if let Some(delta) = v.get("delta") {
                    match delta.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                        "text_delta" => {
                            if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                                if !text.is_empty() {
                                    if let Some(block) = self.open_blocks.get_mut(&idx) {
                                        let existing =
                                            block.get("text").and_then(|t| t.as_str()).unwrap_or("");
                                        block["text"] =
                                            Value::String(format!("{existing}{text}"));
                                    }
                                    deltas.push(StreamEvent::TextDelta {
                                        text: text.to_string(),
                                    });
                                }
                            }
                        }
                        "input_json_delta" => {
                            if let Some(partial) =
                                delta.get("partial_json").and_then(|p| p.as_str())
                            {
                                if let Some(buf) = self.json_buffers.get_mut(&idx) {
                                    buf.push_str(partial);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            "content_block_stop" => {
                let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                if let Some(mut block) = self.open_blocks.remove(&idx) {
                    if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                        let buf = self.json_buffers.remove(&idx).unwrap_or_default();
                        if !buf.trim().is_empty() {
                            block["input"] = serde_json::from_str(&buf)
                                .unwrap_or(Value::Object(Default::default()));
                        }
                    }
                    self.content.push((idx, block));
                }
            }
            "message_delta" => {
                if let Some(usage) = v.get("usage") {
                    if let Some(out) = usage.get("output_tokens").and_then(|t| t.as_u64()) {
                        self.output_tokens = out;
                    }
                }
                if let Some(reason) = v
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|r| r.as_str())
                {
                    self.stop_reason = Some(reason.to_string());
                }
            }
            "message_stop" => return Ok((deltas, true)),
            "error" => {
                let msg = v
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown stream error");
                return Err(Error::Provider {
                    provider: "anthropic".into(),
                    message: msg.to_string(),
                });
            }
            // ping and future event types
            _ => {}
        }
        Ok((deltas, false))
    }

    /// Build the Messages-shaped body and run it through the shared
    /// validator so streaming and non-streaming responses are held to the
    /// same shape.
    fn into_response(mut self) -> Result<bs_domain::chat::ChatResponse> {
        self.content.sort_by_key(|(idx, _)| *idx);
        let content: Vec<Value> = self.content.into_iter().map(|(_, b)| b).collect();
        let body = serde_json::json!({
            "content": content,
            "stop_reason": self.stop_reason,
            "model": self.model,
            "usage": {
                "input_tokens": self.input_tokens,
                "output_tokens": self.output_tokens,
            },
        });
        validate::parse_response(&body)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn chat(
        &self,
        model_name: &str,
        req: &AdapterRequest,
    ) -> Result<bs_domain::chat::ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(model_name, req, false);

        tracing::debug!(provider = %self.key, model = model_name, "messages request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.key.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let json: Value = serde_json::from_str(&text)?;
        validate::parse_response(&json)
    }

    async fn chat_stream(
        &self,
        model_name: &str,
        req: &AdapterRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(model_name, req, true);

        tracing::debug!(provider = %self.key, model = model_name, "messages stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.key.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let mut lines = data_line_stream(resp);
        Ok(Box::pin(async_stream::stream! {
            use futures_util::StreamExt;
            let mut state = Some(StreamState::new());
            while let Some(line) = lines.next().await {
                let data = match line {
                    Ok(d) => d,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let Some(st) = state.as_mut() else { break };
                match st.handle(&data) {
                    Ok((deltas, done)) => {
                        for d in deltas {
                            yield Ok(d);
                        }
                        if done {
                            let st = state.take().expect("stream state present");
                            yield st.into_response().map(|response| {
                                StreamEvent::MessageDone { response }
                            });
                            return;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            if state.is_some() {
                yield Err(Error::InvalidResponseShape(
                    "stream ended before message_stop".into(),
                ));
            }
        }))
    }

    fn provider_key(&self) -> &str {
        &self.key
    }
}
