//! Configuration for the brain service.
//!
//! All options arrive through environment variables (the deployment contract
//! of the container image); the ModelRouter additionally accepts a TOML file
//! via `MODEL_ROUTER_CONFIG_PATH` for multi-provider setups that do not fit
//! in a handful of env vars.

mod brain;
mod jobs;
mod memory;
mod router;
mod server;

pub use brain::{BrainConfig, BrainRole};
pub use jobs::JobsConfig;
pub use memory::MemoryConfig;
pub use router::{ModelConfig, ProviderConfig, ProviderKind, RouterConfig};
pub use server::ServerConfig;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level configuration, assembled once at startup and passed by `Arc`
/// into every component constructor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub brain: BrainConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl Config {
    /// Load the full configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig::from_env(),
            brain: BrainConfig::from_env(),
            bus: BusConfig::from_env(),
            router: RouterConfig::from_env()?,
            memory: MemoryConfig::from_env(),
            jobs: JobsConfig::from_env(),
        })
    }
}

/// Message-bus connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// NATS server URL.
    pub url: String,
}

impl BusConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("BUS_URL")
                .or_else(|_| std::env::var("NATS_URL"))
                .unwrap_or_else(|_| "nats://localhost:4222".into()),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".into(),
        }
    }
}

/// Read an env var, treating empty values as absent.
pub(crate) fn env_opt(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}
