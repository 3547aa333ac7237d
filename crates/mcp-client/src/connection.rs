//! An initialized MCP server connection: handshake, tool discovery, calls.

use serde_json::Value;

use crate::protocol::{self, McpToolDef, ToolCallResult, ToolsListResult};
use crate::transport::{McpTransport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP server is down")]
    ServerDown,
}

/// One connected MCP server. Owns its transport for the connection's whole
/// lifetime; dropping without [`McpConnection::shutdown`] leaks a stdio
/// child until process exit, so the registry always shuts connections down.
pub struct McpConnection {
    transport: Box<dyn McpTransport>,
    tools: Vec<McpToolDef>,
}

impl McpConnection {
    /// Perform the MCP handshake and discover tools.
    pub async fn initialize(transport: Box<dyn McpTransport>) -> Result<Self, McpError> {
        let init_params = serde_json::to_value(protocol::initialize_params())
            .map_err(|e| McpError::Protocol(format!("serializing initialize params: {e}")))?;

        let resp = transport.send_request("initialize", Some(init_params)).await?;
        if let Err(err) = resp.into_result() {
            return Err(McpError::Protocol(format!("initialize failed: {err}")));
        }

        transport
            .send_notification("notifications/initialized")
            .await?;

        let tools_resp = transport.send_request("tools/list", None).await?;
        let tools = match tools_resp.into_result() {
            Ok(value) => match serde_json::from_value::<ToolsListResult>(value) {
                Ok(r) => r.tools,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse tools/list result");
                    Vec::new()
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "tools/list returned error, no tools registered");
                Vec::new()
            }
        };

        tracing::info!(tool_count = tools.len(), "MCP connection initialized");
        Ok(Self { transport, tools })
    }

    pub fn tools(&self) -> &[McpToolDef] {
        &self.tools
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Call a tool by its server-side (unsanitized) name.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpError> {
        if !self.transport.is_alive() {
            return Err(McpError::ServerDown);
        }
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        let resp = self.transport.send_request("tools/call", Some(params)).await?;
        let value = resp
            .into_result()
            .map_err(|err| McpError::Protocol(format!("tools/call failed: {err}")))?;
        serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("parsing tools/call result: {e}")))
    }

    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Transport that answers from a canned table, for handshake tests.
    struct CannedTransport {
        next_id: AtomicU64,
        tools_json: Value,
    }

    #[async_trait]
    impl McpTransport for CannedTransport {
        async fn send_request(
            &self,
            method: &str,
            _params: Option<Value>,
        ) -> Result<JsonRpcResponse, TransportError> {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let result = match method {
                "initialize" => serde_json::json!({"capabilities": {}}),
                "tools/list" => self.tools_json.clone(),
                "tools/call" => serde_json::json!({
                    "content": [{"type": "text", "text": "2026-01-01T00:00:00Z"}],
                }),
                other => panic!("unexpected method {other}"),
            };
            Ok(JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id,
                result: Some(result),
                error: None,
            })
        }

        async fn send_notification(&self, _method: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            true
        }

        async fn shutdown(&self) {}
    }

    #[tokio::test]
    async fn handshake_discovers_tools_and_calls_work() {
        let transport = CannedTransport {
            next_id: AtomicU64::new(1),
            tools_json: serde_json::json!({
                "tools": [{"name": "current time", "description": "clock"}],
            }),
        };
        let conn = McpConnection::initialize(Box::new(transport)).await.unwrap();
        assert_eq!(conn.tools().len(), 1);
        assert_eq!(conn.tools()[0].name, "current time");

        let result = conn
            .call_tool("current time", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result.joined_text(), "2026-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn empty_tool_list_is_tolerated() {
        let transport = CannedTransport {
            next_id: AtomicU64::new(1),
            tools_json: serde_json::json!({"unexpected": true}),
        };
        let conn = McpConnection::initialize(Box::new(transport)).await.unwrap();
        assert!(conn.tools().is_empty());
    }
}
