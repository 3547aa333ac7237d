//! The skill registry: tier ≥ 1 skills backed by MCP servers.
//!
//! On startup every enabled skill from the store is connected to its
//! transport, its tools listed, and each tool name sanitized and mapped to
//! the owning skill. Name conflicts are first-wins; later duplicates are
//! skipped with a warning.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use bs_domain::chat::ToolDefinition;
use bs_domain::{Error, Result};
use bs_mcp::{HttpTransport, McpConnection, McpTransport, StdioTransport};
use bs_store::{SkillRow, Store};

use super::plugins::ToolExecution;

/// A registered tool: which skill owns it and what the server calls it.
#[derive(Clone)]
struct ToolBinding {
    skill_id: String,
    server_tool_name: String,
    definition: ToolDefinition,
}

struct SkillConnection {
    skill: SkillRow,
    conn: Arc<McpConnection>,
}

#[derive(Default)]
pub struct SkillRegistry {
    connections: RwLock<HashMap<String, SkillConnection>>,
    tools: RwLock<HashMap<String, ToolBinding>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect every enabled tier ≥ 1 skill. Connection failures are logged
    /// and the skill skipped; loading continues.
    pub async fn startup(&self, store: &Store) -> Result<()> {
        let skills = store.list_skills(true)?;
        for skill in skills.into_iter().filter(|s| s.tier >= 1) {
            let name = skill.name.clone();
            if let Err(e) = self.connect_and_register(skill).await {
                tracing::warn!(skill = %name, error = %e, "skill connection failed, skipping");
            }
        }
        Ok(())
    }

    pub async fn connect_and_register(&self, skill: SkillRow) -> Result<()> {
        skill.validate().map_err(Error::Validation)?;

        let transport: Box<dyn McpTransport> = match skill.tier {
            1 => {
                let command = skill
                    .stdio_command
                    .as_deref()
                    .ok_or_else(|| Error::Validation("tier-1 skill without stdio_command".into()))?;
                let env: Vec<(String, String)> = skill
                    .config
                    .get("env")
                    .and_then(|e| e.as_object())
                    .map(|obj| {
                        obj.iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();
                Box::new(
                    StdioTransport::spawn(command, &skill.stdio_args, &env)
                        .map_err(|e| Error::Tool(e.to_string()))?,
                )
            }
            2 | 3 => {
                let url = skill
                    .http_url
                    .as_deref()
                    .ok_or_else(|| Error::Validation("HTTP skill without http_url".into()))?;
                Box::new(HttpTransport::new(url))
            }
            tier => {
                return Err(Error::Validation(format!(
                    "tier-{tier} skills have no MCP transport"
                )))
            }
        };

        let conn = Arc::new(
            McpConnection::initialize(transport)
                .await
                .map_err(|e| Error::Tool(e.to_string()))?,
        );

        let mut tools = self.tools.write().await;
        let mut registered = 0usize;
        for tool in conn.tools() {
            let sanitized = sanitize_tool_name(&tool.name);
            if let Some(existing) = tools.get(&sanitized) {
                tracing::warn!(
                    tool = %sanitized,
                    skill = %skill.id,
                    owner = %existing.skill_id,
                    "tool name conflict, keeping first registration"
                );
                continue;
            }
            tools.insert(
                sanitized.clone(),
                ToolBinding {
                    skill_id: skill.id.clone(),
                    server_tool_name: tool.name.clone(),
                    definition: ToolDefinition {
                        name: sanitized,
                        description: tool.description.clone(),
                        input_schema: tool.input_schema.clone(),
                    },
                },
            );
            registered += 1;
        }
        drop(tools);

        tracing::info!(
            skill = %skill.id,
            tier = skill.tier,
            tools = registered,
            "skill connected"
        );
        self.connections.write().await.insert(
            skill.id.clone(),
            SkillConnection { skill, conn },
        );
        Ok(())
    }

    /// Disconnect a skill and remove its tool-map entries.
    pub async fn disconnect_skill(&self, skill_id: &str) -> Result<()> {
        let removed = self.connections.write().await.remove(skill_id);
        match removed {
            Some(connection) => {
                self.tools
                    .write()
                    .await
                    .retain(|_, binding| binding.skill_id != skill_id);
                connection.conn.shutdown().await;
                tracing::info!(skill = %skill_id, "skill disconnected");
                Ok(())
            }
            None => Err(Error::NotFound(format!("skill {skill_id}"))),
        }
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn all_tool_definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut defs: Vec<ToolDefinition> =
            tools.values().map(|b| b.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by its sanitized name. MCP errors come back as a
    /// diagnostic result string, not a turn-level failure.
    pub async fn execute(&self, name: &str, input: &Value) -> Result<ToolExecution> {
        let binding = self
            .tools
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Tool(format!("no skill owns tool '{name}'")))?;

        let conn = {
            let connections = self.connections.read().await;
            connections
                .get(&binding.skill_id)
                .map(|c| c.conn.clone())
                .ok_or_else(|| Error::Tool(format!("skill {} is not connected", binding.skill_id)))?
        };

        match conn
            .call_tool(&binding.server_tool_name, input.clone())
            .await
        {
            Ok(result) => {
                let text = result.joined_text();
                if result.is_error {
                    Ok(ToolExecution::text(format!("tool error: {text}")))
                } else {
                    Ok(ToolExecution::text(text))
                }
            }
            Err(e) => Ok(ToolExecution::text(format!(
                "tool '{name}' failed: {e}"
            ))),
        }
    }

    pub async fn list_connected(&self) -> Vec<SkillRow> {
        self.connections
            .read()
            .await
            .values()
            .map(|c| c.skill.clone())
            .collect()
    }

    /// Close every transport.
    pub async fn shutdown(&self) {
        let connections: Vec<Arc<McpConnection>> = self
            .connections
            .write()
            .await
            .drain()
            .map(|(_, c)| c.conn)
            .collect();
        for conn in connections {
            conn.shutdown().await;
        }
        self.tools.write().await.clear();
    }
}

/// Sanitize a server-side tool name into `^[a-zA-Z0-9_-]{1,128}$`: runs of
/// invalid characters collapse to one `_`, then the result is truncated.
pub fn sanitize_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(128));
    let mut last_was_invalid = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
            last_was_invalid = false;
        } else if !last_was_invalid {
            out.push('_');
            last_was_invalid = true;
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out.truncate(128);
    out
}
