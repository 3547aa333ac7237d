use serde::{Deserialize, Serialize};

use super::env_opt;

/// Worker-side job execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Binaries a `command` job may invoke.
    #[serde(default = "d_command_allowlist")]
    pub command_allowlist: Vec<String>,
    /// Filesystem mounts command jobs may touch (`TASK_ALLOWED_PATHS`,
    /// comma list). Empty = deny all mounts.
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    /// Per-job execution timeout unless the job overrides it.
    #[serde(default = "d_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl JobsConfig {
    pub fn from_env() -> Self {
        Self {
            command_allowlist: env_opt("COMMAND_ALLOWLIST")
                .map(|v| split_list(&v))
                .unwrap_or_else(d_command_allowlist),
            allowed_paths: env_opt("TASK_ALLOWED_PATHS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            default_timeout_secs: env_opt("JOB_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(d_timeout_secs),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            command_allowlist: d_command_allowlist(),
            allowed_paths: Vec::new(),
            default_timeout_secs: d_timeout_secs(),
        }
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn d_command_allowlist() -> Vec<String> {
    ["echo", "ls", "cat", "date", "uptime", "df", "curl", "kubectl"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn d_timeout_secs() -> u64 {
    30 * 60
}
