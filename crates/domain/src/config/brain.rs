use serde::{Deserialize, Serialize};

use super::env_opt;

/// Startup role assigned by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrainRole {
    #[default]
    Active,
    Pending,
}

/// Brain identity and transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    #[serde(default)]
    pub role: BrainRole,
    #[serde(default = "d_version")]
    pub version: String,
    /// When disabled the brain forces itself to `active` regardless of role.
    #[serde(default = "d_true")]
    pub transfer_enabled: bool,
    /// Maximum time spent waiting for in-flight turns while draining.
    #[serde(default = "d_drain_secs")]
    pub drain_deadline_secs: u64,
    /// How long a pending brain waits for an active brain before a fresh start.
    #[serde(default = "d_ready_secs")]
    pub ready_timeout_secs: u64,
}

impl BrainConfig {
    pub fn from_env() -> Self {
        Self {
            role: match env_opt("BRAIN_ROLE").as_deref() {
                Some("pending") => BrainRole::Pending,
                _ => BrainRole::Active,
            },
            version: env_opt("BRAIN_VERSION").unwrap_or_else(d_version),
            transfer_enabled: env_opt("BRAIN_TRANSFER_ENABLED")
                .map(|v| !matches!(v.as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            drain_deadline_secs: env_opt("BRAIN_DRAIN_DEADLINE_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(d_drain_secs),
            ready_timeout_secs: env_opt("BRAIN_READY_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(d_ready_secs),
        }
    }
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            role: BrainRole::Active,
            version: d_version(),
            transfer_enabled: true,
            drain_deadline_secs: d_drain_secs(),
            ready_timeout_secs: d_ready_secs(),
        }
    }
}

fn d_version() -> String {
    "dev".into()
}
fn d_true() -> bool {
    true
}
fn d_drain_secs() -> u64 {
    30
}
fn d_ready_secs() -> u64 {
    120
}
