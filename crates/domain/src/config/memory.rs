use serde::{Deserialize, Serialize};

use super::env_opt;

/// Observational-memory thresholds and retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Unobserved-token count at which the observer runs after a turn.
    #[serde(default = "d_observe_threshold")]
    pub observe_threshold_tokens: u32,
    /// Observation-log token count at which the reflector compresses it.
    #[serde(default = "d_reflect_threshold")]
    pub reflect_threshold_tokens: u32,
    /// Floor on the number of tail messages included in context.
    #[serde(default = "d_keep_last")]
    pub keep_last_messages: usize,
    /// Base URL of the vector-store collaborator. `None` disables retrieval.
    #[serde(default)]
    pub retriever_url: Option<String>,
    /// Top-K for semantic search.
    #[serde(default = "d_top_k")]
    pub top_k: usize,
}

impl MemoryConfig {
    pub fn from_env() -> Self {
        Self {
            observe_threshold_tokens: env_opt("OBSERVE_THRESHOLD_TOKENS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(d_observe_threshold),
            reflect_threshold_tokens: env_opt("REFLECT_THRESHOLD_TOKENS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(d_reflect_threshold),
            keep_last_messages: env_opt("KEEP_LAST_MESSAGES")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(d_keep_last),
            retriever_url: env_opt("MEMORY_RETRIEVER_URL"),
            top_k: env_opt("MEMORY_TOP_K")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(d_top_k),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            observe_threshold_tokens: d_observe_threshold(),
            reflect_threshold_tokens: d_reflect_threshold(),
            keep_last_messages: d_keep_last(),
            retriever_url: None,
            top_k: d_top_k(),
        }
    }
}

fn d_observe_threshold() -> u32 {
    2_000
}
fn d_reflect_threshold() -> u32 {
    4_000
}
fn d_keep_last() -> usize {
    20
}
fn d_top_k() -> usize {
    5
}
