//! Response-shape validation shared by all adapters.
//!
//! Adapters convert their wire format into a Messages-shaped JSON value and
//! run it through [`parse_response`]. A missing content array or usage block
//! is an [`InvalidResponseShape`] error; unknown content-block types are
//! dropped with a warning, keeping only `text`, `tool_use`, and
//! `tool_result` blocks with their required fields.

use serde_json::Value;

use bs_domain::chat::{ChatResponse, ContentBlock, Usage};
use bs_domain::{Error, Result};

pub fn parse_response(body: &Value) -> Result<ChatResponse> {
    let content_arr = body
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::InvalidResponseShape("missing content array".into()))?;

    let mut content = Vec::with_capacity(content_arr.len());
    for block in content_arr {
        match parse_block(block)? {
            Some(b) => content.push(b),
            None => {
                tracing::warn!(
                    block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("?"),
                    "dropping unknown content block type"
                );
            }
        }
    }

    let usage = parse_usage(body.get("usage"))?;

    Ok(ChatResponse {
        content,
        stop_reason: body
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        usage,
    })
}

/// Parse one content block. `Ok(None)` means "unknown type, drop it";
/// a known type missing its required fields is a shape error.
fn parse_block(block: &Value) -> Result<Option<ContentBlock>> {
    let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match block_type {
        "text" => {
            let text = block
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidResponseShape("text block without text".into()))?;
            Ok(Some(ContentBlock::Text {
                text: text.to_string(),
            }))
        }
        "tool_use" => {
            let id = block
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidResponseShape("tool_use block without id".into()))?;
            let name = block
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidResponseShape("tool_use block without name".into()))?;
            Ok(Some(ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: block
                    .get("input")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default())),
            }))
        }
        "tool_result" => {
            let tool_use_id = block
                .get("tool_use_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidResponseShape("tool_result block without tool_use_id".into())
                })?;
            Ok(Some(ContentBlock::ToolResult {
                tool_use_id: tool_use_id.to_string(),
                content: block
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                is_error: block
                    .get("is_error")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            }))
        }
        _ => Ok(None),
    }
}

fn parse_usage(v: Option<&Value>) -> Result<Usage> {
    let v = v.ok_or_else(|| Error::InvalidResponseShape("missing usage".into()))?;
    let input = v
        .get("input_tokens")
        .and_then(|t| t.as_u64())
        .ok_or_else(|| Error::InvalidResponseShape("usage without integer input_tokens".into()))?;
    let output = v
        .get("output_tokens")
        .and_then(|t| t.as_u64())
        .ok_or_else(|| Error::InvalidResponseShape("usage without integer output_tokens".into()))?;
    Ok(Usage {
        input_tokens: input as u32,
        output_tokens: output as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_response_parses() {
        let body = serde_json::json!({
            "content": [{"type": "text", "text": "Hello!"}],
            "stop_reason": "end_turn",
            "model": "m",
            "usage": {"input_tokens": 5, "output_tokens": 2},
        });
        let resp = parse_response(&body).unwrap();
        assert_eq!(resp.text(), "Hello!");
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(resp.usage.input_tokens, 5);
    }

    #[test]
    fn missing_content_is_shape_error() {
        let body = serde_json::json!({"usage": {"input_tokens": 1, "output_tokens": 1}});
        assert!(matches!(
            parse_response(&body).unwrap_err(),
            Error::InvalidResponseShape(_)
        ));
    }

    #[test]
    fn missing_usage_is_shape_error() {
        let body = serde_json::json!({"content": []});
        assert!(matches!(
            parse_response(&body).unwrap_err(),
            Error::InvalidResponseShape(_)
        ));
    }

    #[test]
    fn non_integer_usage_is_shape_error() {
        let body = serde_json::json!({
            "content": [],
            "usage": {"input_tokens": "five", "output_tokens": 2},
        });
        assert!(matches!(
            parse_response(&body).unwrap_err(),
            Error::InvalidResponseShape(_)
        ));
    }

    #[test]
    fn unknown_block_types_are_dropped() {
        let body = serde_json::json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "kept"},
                {"type": "server_tool_use", "id": "x"},
            ],
            "model": "m",
            "usage": {"input_tokens": 1, "output_tokens": 1},
        });
        let resp = parse_response(&body).unwrap();
        assert_eq!(resp.content.len(), 1);
        assert_eq!(resp.text(), "kept");
    }

    #[test]
    fn tool_use_without_name_is_shape_error() {
        let body = serde_json::json!({
            "content": [{"type": "tool_use", "id": "tu1"}],
            "usage": {"input_tokens": 1, "output_tokens": 1},
        });
        assert!(matches!(
            parse_response(&body).unwrap_err(),
            Error::InvalidResponseShape(_)
        ));
    }
}
