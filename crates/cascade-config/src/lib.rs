//! Configuration loading for cascade.
//! Reads cascade.toml from the current directory or the path in CASCADE_CONFIG,
//! after loading a `.env` file if one is present.

use std::path::{Path, PathBuf};

use cascade_llm::{BackoffConfig, ProviderKind, RateLimitConfig, RetryPolicy};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_ENV: &str = "CASCADE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "cascade.toml";
const API_KEY_ENVS: &[&str] = &["CASCADE_API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("No API key configured (set provider.api_key, CASCADE_API_KEY or GEMINI_API_KEY)")]
    MissingCredential,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CascadeConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    /// Prefer the environment; a key in the file is accepted for local use.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default)]
    pub validate_on_startup: bool,
}

fn default_models() -> Vec<String> {
    ["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.0-flash", "gemini-2.0-flash-lite"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self { models: default_models(), validate_on_startup: false }
    }
}

impl CascadeConfig {
    /// Load configuration from cascade.toml.
    /// Checks CASCADE_CONFIG env var first, then the current directory.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), models = config.chain.models.len(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CascadeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.models.is_empty() {
            return Err(ConfigError::Invalid("chain.models must list at least one model".into()));
        }
        if self.chain.models.iter().any(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid("chain.models contains an empty identifier".into()));
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid("retry.max_retries must be at least 1".into()));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid("backoff.multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_ratio) {
            return Err(ConfigError::Invalid("backoff.jitter_ratio must be within [0, 1]".into()));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(ConfigError::Invalid("backoff.base_delay_ms exceeds backoff.max_delay_ms".into()));
        }
        Ok(())
    }

    /// The provider credential: file value first, then the environment.
    pub fn credential(&self) -> Result<SecretString, ConfigError> {
        self.credential_with(|name| std::env::var(name).ok())
    }

    fn credential_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<SecretString, ConfigError> {
        let key = self
            .provider
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| API_KEY_ENVS.iter().find_map(|name| env(*name).filter(|k| !k.is_empty())));

        match key {
            Some(k) => Ok(SecretString::from(k)),
            // Local OpenAI-compatible servers usually run without a key.
            None if self.provider.kind == ProviderKind::OpenAiCompatible => Ok(SecretString::from(String::new())),
            None => Err(ConfigError::MissingCredential),
        }
    }
}

mod tests;
