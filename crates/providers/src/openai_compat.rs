//! OpenAI-compatible adapter.
//!
//! Works with any endpoint following the OpenAI chat-completions contract
//! (local model servers, vLLM, Ollama, LM Studio). Requests and responses
//! are translated to and from the internal content-block model, then run
//! through the same validator as the Anthropic adapters.

use async_trait::async_trait;
use serde_json::Value;

use bs_domain::chat::{ChatMessage, ContentBlock, MessageContent, Role};
use bs_domain::config::ProviderConfig;
use bs_domain::stream::{BoxStream, StreamEvent};
use bs_domain::{Error, Result};

use crate::sse::data_line_stream;
use crate::traits::{AdapterRequest, ProviderAdapter};
use crate::util::from_reqwest;
use crate::validate;

#[derive(Debug)]
pub struct OpenAiCompatAdapter {
    key: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn from_config(key: &str, cfg: &ProviderConfig) -> Result<Self> {
        let base_url = cfg
            .base_url
            .clone()
            .ok_or_else(|| Error::Config(format!("openai-compat provider '{key}' needs base_url")))?
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            key: key.to_string(),
            base_url,
            api_key: cfg.api_key.clone(),
            client: reqwest::Client::new(),
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url).header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn build_body(&self, model_name: &str, req: &AdapterRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        // System blocks flatten into one leading system message; the
        // cache marker has no OpenAI equivalent and is dropped here.
        if !req.system.is_empty() {
            let system_text = req
                .system
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            messages.push(serde_json::json!({"role": "system", "content": system_text}));
        }
        for msg in &req.messages {
            messages.extend(message_to_wire(msg));
        }

        let mut body = serde_json::json!({
            "model": model_name,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        },
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One internal message may expand into several wire messages (assistant
/// text + tool_calls stay together, but each tool result becomes its own
/// `tool` role message).
fn message_to_wire(msg: &ChatMessage) -> Vec<Value> {
    match msg.role {
        Role::User => vec![serde_json::json!({
            "role": "user",
            "content": msg.content.extract_all_text(),
        })],
        Role::Assistant => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();
            if let MessageContent::Blocks(blocks) = &msg.content {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => text_parts.push(text.as_str()),
                        ContentBlock::ToolUse { id, name, input } => {
                            tool_calls.push(serde_json::json!({
                                "id": id,
                                "type": "function",
                                "function": {
                                    "name": name,
                                    "arguments": input.to_string(),
                                },
                            }));
                        }
                        ContentBlock::ToolResult { .. } => {}
                    }
                }
            } else {
                return vec![serde_json::json!({
                    "role": "assistant",
                    "content": msg.content.extract_all_text(),
                })];
            }
            let mut obj = serde_json::json!({
                "role": "assistant",
                "content": text_parts.join(""),
            });
            if !tool_calls.is_empty() {
                obj["tool_calls"] = Value::Array(tool_calls);
            }
            vec![obj]
        }
        Role::Tool => match &msg.content {
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => Some(serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    })),
                    _ => None,
                })
                .collect(),
            MessageContent::Text(t) => vec![serde_json::json!({
                "role": "tool",
                "tool_call_id": "",
                "content": t,
            })],
        },
    }
}

/// Convert an OpenAI completion response into the Messages shape and
/// validate it.
fn parse_completion(key: &str, body: &Value) -> Result<bs_domain::chat::ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| Error::InvalidResponseShape("missing choices".into()))?;
    let message = choice.get("message").unwrap_or(&Value::Null);

    let mut content: Vec<Value> = Vec::new();
    if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            content.push(serde_json::json!({"type": "text", "text": text}));
        }
    }
    let mut saw_tool_calls = false;
    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for call in calls {
            saw_tool_calls = true;
            let func = call.get("function").unwrap_or(&Value::Null);
            let arguments = func
                .get("arguments")
                .and_then(|a| a.as_str())
                .and_then(|a| serde_json::from_str::<Value>(a).ok())
                .unwrap_or(Value::Object(Default::default()));
            content.push(serde_json::json!({
                "type": "tool_use",
                "id": call.get("id").and_then(|i| i.as_str()).unwrap_or(""),
                "name": func.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                "input": arguments,
            }));
        }
    }

    let stop_reason = match choice.get("finish_reason").and_then(|f| f.as_str()) {
        Some("tool_calls") => Some("tool_use"),
        Some("length") => Some("max_tokens"),
        Some(_) if saw_tool_calls => Some("tool_use"),
        Some(_) => Some("end_turn"),
        None => None,
    };

    let usage = body.get("usage").unwrap_or(&Value::Null);
    let normalized = serde_json::json!({
        "content": content,
        "stop_reason": stop_reason,
        "model": body.get("model").and_then(|m| m.as_str()).unwrap_or(key),
        "usage": {
            "input_tokens": usage.get("prompt_tokens").and_then(|t| t.as_u64()),
            "output_tokens": usage.get("completion_tokens").and_then(|t| t.as_u64()),
        },
    });
    validate::parse_response(&normalized)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct StreamState {
    model: String,
    text: String,
    // index -> (id, name, arguments buffer)
    tool_calls: std::collections::BTreeMap<u64, (String, String, String)>,
    finish_reason: Option<String>,
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl StreamState {
    fn handle(&mut self, data: &str) -> Result<Vec<StreamEvent>> {
        let v: Value = serde_json::from_str(data)?;
        let mut deltas = Vec::new();

        if let Some(model) = v.get("model").and_then(|m| m.as_str()) {
            self.model = model.to_string();
        }
        if let Some(usage) = v.get("usage") {
            if let Some(p) = usage.get("prompt_tokens").and_then(|t| t.as_u64()) {
                self.prompt_tokens = p;
            }
            if let Some(c) = usage.get("completion_tokens").and_then(|t| t.as_u64()) {
                self.completion_tokens = c;
            }
        }

        let Some(choice) = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
        else {
            return Ok(deltas);
        };

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.finish_reason = Some(fr.to_string());
        }

        let delta = choice.get("delta").unwrap_or(&Value::Null);
        if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                self.text.push_str(text);
                deltas.push(StreamEvent::TextDelta {
                    text: text.to_string(),
                });
            }
        }
        if let Some(calls) = delta.get("tool_calls").and_then(|c| c.as_array()) {
            for call in calls {
                let idx = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let entry = self.tool_calls.entry(idx).or_default();
                if let Some(id) = call.get("id").and_then(|i| i.as_str()) {
                    entry.0 = id.to_string();
                }
                if let Some(func) = call.get("function") {
                    if let Some(name) = func.get("name").and_then(|n| n.as_str()) {
                        entry.1.push_str(name);
                    }
                    if let Some(args) = func.get("arguments").and_then(|a| a.as_str()) {
                        entry.2.push_str(args);
                    }
                }
            }
        }
        Ok(deltas)
    }

    fn into_response(self, key: &str) -> Result<bs_domain::chat::ChatResponse> {
        let mut content: Vec<Value> = Vec::new();
        if !self.text.is_empty() {
            content.push(serde_json::json!({"type": "text", "text": self.text}));
        }
        let has_tools = !self.tool_calls.is_empty();
        for (_, (id, name, args)) in self.tool_calls {
            let input: Value =
                serde_json::from_str(&args).unwrap_or(Value::Object(Default::default()));
            content.push(serde_json::json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            }));
        }
        let stop_reason = match self.finish_reason.as_deref() {
            Some("tool_calls") => "tool_use",
            Some("length") => "max_tokens",
            _ if has_tools => "tool_use",
            _ => "end_turn",
        };
        let model = if self.model.is_empty() {
            key.to_string()
        } else {
            self.model
        };
        let normalized = serde_json::json!({
            "content": content,
            "stop_reason": stop_reason,
            "model": model,
            "usage": {
                "input_tokens": self.prompt_tokens,
                "output_tokens": self.completion_tokens,
            },
        });
        validate::parse_response(&normalized)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn chat(
        &self,
        model_name: &str,
        req: &AdapterRequest,
    ) -> Result<bs_domain::chat::ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(model_name, req, false);

        tracing::debug!(provider = %self.key, model = model_name, "chat completions request");

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
        parse_completion(&self.key, &json)
    }

    async fn chat_stream(
        &self,
        model_name: &str,
        req: &AdapterRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(model_name, req, true);

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

        let key = self.key.clone();
        let mut lines = data_line_stream(resp);
        Ok(Box::pin(async_stream::stream! {
            use futures_util::StreamExt;
            let mut state = StreamState::default();
            while let Some(line) = lines.next().await {
                let data = match line {
                    Ok(d) => d,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                if data == "[DONE]" {
                    break;
                }
                match state.handle(&data) {
                    Ok(deltas) => {
                        for d in deltas {
                            yield Ok(d);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            yield state
                .into_response(&key)
                .map(|response| StreamEvent::MessageDone { response });
        }))
    }

    fn provider_key(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bs_domain::chat::SystemBlock;
    use bs_domain::config::ProviderKind;

    fn adapter() -> OpenAiCompatAdapter {
        OpenAiCompatAdapter::from_config(
            "local",
            &ProviderConfig {
                kind: ProviderKind::OpenaiCompat,
                api_key: None,
                oauth_token: None,
                base_url: Some("http://localhost:8080/v1".into()),
            },
        )
        .unwrap()
    }

    #[test]
    fn missing_base_url_is_config_error() {
        let err = OpenAiCompatAdapter::from_config(
            "local",
            &ProviderConfig {
                kind: ProviderKind::OpenaiCompat,
                api_key: None,
                oauth_token: None,
                base_url: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn system_blocks_flatten_into_one_message() {
        let req = AdapterRequest {
            system: vec![SystemBlock::new("a"), SystemBlock::cached("b")],
            messages: vec![ChatMessage::user("hi")],
            tools: vec![],
            max_tokens: 256,
        };
        let body = adapter().build_body("llama3", &req, false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "a\n\nb");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn tool_results_become_tool_role_messages() {
        let wire = message_to_wire(&ChatMessage::tool_result("tu1", "42"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "tu1");
    }

    #[test]
    fn completion_with_tool_calls_maps_to_tool_use() {
        let body = serde_json::json!({
            "model": "llama3",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "util_time", "arguments": "{\"tz\":\"utc\"}"},
                    }],
                },
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4},
        });
        let resp = parse_completion("local", &body).unwrap();
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
        let uses = resp.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].1, "util_time");
        assert_eq!(resp.usage.input_tokens, 10);
    }

    #[test]
    fn missing_usage_fails_validation() {
        let body = serde_json::json!({
            "choices": [{"finish_reason": "stop", "message": {"content": "hi"}}],
        });
        assert!(matches!(
            parse_completion("local", &body).unwrap_err(),
            Error::InvalidResponseShape(_)
        ));
    }

    #[test]
    fn stream_state_assembles_split_tool_arguments() {
        let mut st = StreamState::default();
        st.handle(r#"{"model":"llama3","choices":[{"delta":{"content":"Hi"}}]}"#)
            .unwrap();
        st.handle(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"lookup","arguments":"{\"q\":"}}]}}]}"#,
        )
        .unwrap();
        st.handle(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"x\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        )
        .unwrap();
        st.handle(r#"{"usage":{"prompt_tokens":7,"completion_tokens":3},"choices":[]}"#)
            .unwrap();

        let resp = st.into_response("local").unwrap();
        assert_eq!(resp.text(), "Hi");
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
        let uses = resp.tool_uses();
        assert_eq!(uses[0].2["q"], "x");
        assert_eq!(resp.usage.input_tokens, 7);
    }
}
