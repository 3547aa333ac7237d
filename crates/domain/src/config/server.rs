use serde::{Deserialize, Serialize};

use super::env_opt;

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    /// Directory holding `bakerst.db` and `gateway.db`.
    #[serde(default = "d_data_dir")]
    pub data_dir: String,
    /// Bearer token for protected routes. `None` = dev mode (no auth).
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Display name injected into service info responses.
    #[serde(default = "d_agent_name")]
    pub agent_name: String,
    /// Allowed CORS origins. Empty = dev-permissive (any origin).
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_opt("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(d_port),
            data_dir: env_opt("DATA_DIR").unwrap_or_else(d_data_dir),
            auth_token: env_opt("AUTH_TOKEN"),
            agent_name: env_opt("AGENT_NAME").unwrap_or_else(d_agent_name),
            cors_origins: env_opt("CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            data_dir: d_data_dir(),
            auth_token: None,
            agent_name: d_agent_name(),
            cors_origins: Vec::new(),
        }
    }
}

fn d_port() -> u16 {
    8700
}
fn d_data_dir() -> String {
    "./data".into()
}
fn d_agent_name() -> String {
    "baker-street".into()
}
