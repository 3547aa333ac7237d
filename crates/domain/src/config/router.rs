use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::env_opt;
use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ModelRouter configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Full router configuration: providers, the ordered model list, role
/// assignments, and the optional non-streaming fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// Role name (`agent`, `observer`, `worker`, ...) to model id.
    #[serde(default)]
    pub roles: HashMap<String, String>,
    /// Ordered model ids tried when the primary fails on non-stream calls.
    #[serde(default)]
    pub fallback_chain: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub oauth_token: Option<String>,
    /// Required for `anthropic-compat` and `openai-compat`.
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// The Anthropic Messages API at its canonical endpoint.
    AnthropicNative,
    /// The same wire protocol served at a custom base URL (e.g. OpenRouter).
    AnthropicCompat,
    /// OpenAI-style chat completions at a custom base URL.
    OpenaiCompat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Stable id referenced by roles and the fallback chain.
    pub id: String,
    /// Provider-facing model name.
    pub model_name: String,
    /// Key into [`RouterConfig::providers`].
    pub provider: String,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub cost_per_1m_input: Option<f64>,
    #[serde(default)]
    pub cost_per_1m_output: Option<f64>,
}

fn d_max_tokens() -> u32 {
    8_192
}

impl RouterConfig {
    /// Assemble the router config from the environment.
    ///
    /// `MODEL_ROUTER_CONFIG_PATH` wins outright when set; otherwise a
    /// single-provider config is synthesised from `ANTHROPIC_API_KEY` /
    /// `ANTHROPIC_OAUTH_TOKEN` / `OPENROUTER_API_KEY` plus `DEFAULT_MODEL`
    /// and `OBSERVER_MODEL`.
    pub fn from_env() -> Result<Self> {
        if let Some(path) = env_opt("MODEL_ROUTER_CONFIG_PATH") {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("reading {path}: {e}")))?;
            return toml::from_str(&raw)
                .map_err(|e| Error::Config(format!("parsing {path}: {e}")));
        }
        Ok(Self::synthesize_from_env())
    }

    fn synthesize_from_env() -> Self {
        let mut providers = HashMap::new();
        let mut models = Vec::new();

        let anthropic_key = env_opt("ANTHROPIC_API_KEY");
        let anthropic_oauth = env_opt("ANTHROPIC_OAUTH_TOKEN");
        let default_model =
            env_opt("DEFAULT_MODEL").unwrap_or_else(|| "claude-sonnet-4-20250514".into());
        let observer_model = env_opt("OBSERVER_MODEL");

        if anthropic_key.is_some() || anthropic_oauth.is_some() {
            providers.insert(
                "anthropic".to_string(),
                ProviderConfig {
                    kind: ProviderKind::AnthropicNative,
                    api_key: anthropic_key,
                    oauth_token: anthropic_oauth,
                    base_url: None,
                },
            );
            models.push(ModelConfig {
                id: "default".into(),
                model_name: default_model.clone(),
                provider: "anthropic".into(),
                max_tokens: d_max_tokens(),
                cost_per_1m_input: None,
                cost_per_1m_output: None,
            });
            if let Some(obs) = &observer_model {
                models.push(ModelConfig {
                    id: "observer".into(),
                    model_name: obs.clone(),
                    provider: "anthropic".into(),
                    max_tokens: 2_048,
                    cost_per_1m_input: None,
                    cost_per_1m_output: None,
                });
            }
        }

        if let Some(key) = env_opt("OPENROUTER_API_KEY") {
            providers.insert(
                "openrouter".to_string(),
                ProviderConfig {
                    kind: ProviderKind::AnthropicCompat,
                    api_key: Some(key),
                    oauth_token: None,
                    base_url: Some("https://openrouter.ai/api".into()),
                },
            );
            if models.is_empty() {
                models.push(ModelConfig {
                    id: "default".into(),
                    model_name: default_model,
                    provider: "openrouter".into(),
                    max_tokens: d_max_tokens(),
                    cost_per_1m_input: None,
                    cost_per_1m_output: None,
                });
            }
        }

        let mut roles = HashMap::new();
        if !models.is_empty() {
            roles.insert("agent".to_string(), "default".to_string());
            roles.insert("worker".to_string(), "default".to_string());
            let observer_id = if models.iter().any(|m| m.id == "observer") {
                "observer"
            } else {
                "default"
            };
            roles.insert("observer".to_string(), observer_id.to_string());
        }

        Self {
            providers,
            models,
            roles,
            fallback_chain: None,
        }
    }

    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_toml() {
        let raw = r#"
            fallback_chain = ["sonnet-4", "haiku-4.5"]

            [providers.anthropic]
            kind = "anthropic-native"
            api_key = "sk-test"

            [providers.local]
            kind = "openai-compat"
            base_url = "http://localhost:8080/v1"

            [[models]]
            id = "sonnet-4"
            model_name = "claude-sonnet-4-20250514"
            provider = "anthropic"
            max_tokens = 8192
            cost_per_1m_input = 3.0
            cost_per_1m_output = 15.0

            [[models]]
            id = "haiku-4.5"
            model_name = "claude-haiku-4-5"
            provider = "anthropic"

            [roles]
            agent = "sonnet-4"
            observer = "haiku-4.5"
        "#;
        let cfg: RouterConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.providers.len(), 2);
        assert_eq!(cfg.models.len(), 2);
        assert_eq!(cfg.roles["agent"], "sonnet-4");
        assert_eq!(
            cfg.fallback_chain.as_deref(),
            Some(&["sonnet-4".to_string(), "haiku-4.5".to_string()][..])
        );
        assert_eq!(
            cfg.providers["local"].kind,
            ProviderKind::OpenaiCompat
        );
        // Unspecified max_tokens falls back to the default.
        assert_eq!(cfg.model("haiku-4.5").unwrap().max_tokens, 8_192);
    }

    #[test]
    fn provider_kind_kebab_case() {
        let kind: ProviderKind = serde_json::from_str("\"anthropic-compat\"").unwrap();
        assert_eq!(kind, ProviderKind::AnthropicCompat);
    }
}
