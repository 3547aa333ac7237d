//! Unified tool dispatch across the skill registry (MCP) and the in-process
//! plugin registry. Skills are consulted first for ownership, execution, and
//! definition listing; colliding names shadow the plugin definition.

pub mod plugins;
pub mod skills;

use std::sync::Arc;

use serde_json::Value;

use bs_domain::chat::ToolDefinition;
use bs_domain::{Error, Result};

pub use plugins::{JobsPlugin, ToolExecution, ToolPlugin, UtilPlugin};
pub use skills::{sanitize_tool_name, SkillRegistry};

pub struct UnifiedToolRegistry {
    skills: Arc<SkillRegistry>,
    plugins: Vec<Arc<dyn ToolPlugin>>,
}

impl UnifiedToolRegistry {
    pub fn new(skills: Arc<SkillRegistry>, plugins: Vec<Arc<dyn ToolPlugin>>) -> Self {
        Self { skills, plugins }
    }

    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.skills
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        if self.skills.has_tool(name).await {
            return true;
        }
        self.plugins.iter().any(|p| p.has_tool(name))
    }

    /// All definitions, skill tools first; a plugin tool whose name collides
    /// with a skill tool is shadowed.
    pub async fn all_tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.skills.all_tool_definitions().await;
        for plugin in &self.plugins {
            for tool in plugin.all_tools() {
                if !defs.iter().any(|d| d.name == tool.name) {
                    defs.push(tool);
                }
            }
        }
        defs
    }

    /// Dispatch one tool call: the owning skill wins over any plugin.
    pub async fn execute(&self, name: &str, input: &Value) -> Result<ToolExecution> {
        if self.skills.has_tool(name).await {
            return self.skills.execute(name, input).await;
        }
        for plugin in &self.plugins {
            if plugin.has_tool(name) {
                return plugin.execute(name, input).await;
            }
        }
        Err(Error::Tool(format!("unknown tool '{name}'")))
    }

    /// Forward an out-of-band trigger to every plugin.
    pub async fn handle_trigger(&self, trigger: &str, payload: &Value) -> Result<()> {
        for plugin in &self.plugins {
            if let Err(e) = plugin.handle_trigger(trigger, payload).await {
                tracing::warn!(plugin = plugin.name(), trigger, error = %e, "trigger failed");
            }
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.skills.shutdown().await;
    }
}
