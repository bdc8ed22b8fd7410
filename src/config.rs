//! Engine configuration from the environment
//!
//! `.env` is loaded first (if present), then process environment variables
//! are read. CLI flags are applied on top by the binary.

use std::path::PathBuf;
use std::time::Duration;

use crate::llm::anthropic::DEFAULT_BASE_URL;
use crate::llm::RoleModels;
use crate::sandbox::{DEFAULT_ENV_DIR, DEFAULT_EXEC_TIMEOUT};
use crate::session::DEFAULT_MAX_CONTEXT_TOKENS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,

    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub anthropic_api_key: String,
    pub anthropic_base_url: String,
    /// Web search is reported as unavailable when unset
    pub tavily_api_key: Option<String>,
    pub models: RoleModels,
    pub max_context_tokens: usize,
    /// Bound for `execute_code`
    pub exec_timeout: Duration,
    /// Bound for one model host request
    pub request_timeout: Duration,
    pub venv_path: PathBuf,
    /// Interpreter used to create the venv
    pub base_python: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: String::new(),
            anthropic_base_url: DEFAULT_BASE_URL.to_string(),
            tavily_api_key: None,
            models: RoleModels::default(),
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            request_timeout: Duration::from_secs(600),
            venv_path: PathBuf::from(DEFAULT_ENV_DIR),
            base_python: default_base_python().to_string(),
            otlp_endpoint: None,
        }
    }
}

fn default_base_python() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

impl EngineConfig {
    /// Load `.env`, then read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.anthropic_api_key = get("ANTHROPIC_API_KEY").ok_or(ConfigError::MissingApiKey)?;
        if let Some(url) = get("ANTHROPIC_BASE_URL") {
            config.anthropic_base_url = url;
        }
        config.tavily_api_key = get("TAVILY_API_KEY");
        if let Some(model) = get("ENGINEER_MODEL") {
            config.models = RoleModels::uniform(model);
        }
        if let Some(value) = get("ENGINEER_MAX_CONTEXT_TOKENS") {
            config.max_context_tokens = parse_positive("ENGINEER_MAX_CONTEXT_TOKENS", &value)? as usize;
        }
        if let Some(value) = get("ENGINEER_EXEC_TIMEOUT_SECS") {
            config.exec_timeout =
                Duration::from_secs(parse_positive("ENGINEER_EXEC_TIMEOUT_SECS", &value)?);
        }
        if let Some(path) = get("ENGINEER_VENV_PATH") {
            config.venv_path = PathBuf::from(path);
        }
        if let Some(python) = get("ENGINEER_BASE_PYTHON") {
            config.base_python = python;
        }
        config.otlp_endpoint = get("ENGINEER_OTLP_ENDPOINT");

        Ok(config)
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_requires_api_key() {
        let err = EngineConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));

        let err = EngineConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.anthropic_api_key, "sk-test");
        assert_eq!(config.tavily_api_key, None);
        assert_eq!(config.max_context_tokens, 200_000);
        assert_eq!(config.exec_timeout, Duration::from_secs(10));
        assert_eq!(config.venv_path, PathBuf::from("code_execution_env"));
        assert_eq!(config.models, RoleModels::default());
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("TAVILY_API_KEY", "tvly"),
            ("ENGINEER_MODEL", "claude-x"),
            ("ENGINEER_MAX_CONTEXT_TOKENS", "5000"),
            ("ENGINEER_EXEC_TIMEOUT_SECS", "3"),
            ("ENGINEER_OTLP_ENDPOINT", "http://localhost:4317"),
        ]))
        .unwrap();
        assert_eq!(config.tavily_api_key.as_deref(), Some("tvly"));
        assert_eq!(config.models.code_editor, "claude-x");
        assert_eq!(config.max_context_tokens, 5000);
        assert_eq!(config.exec_timeout, Duration::from_secs(3));
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://localhost:4317"));
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let err = EngineConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("ENGINEER_EXEC_TIMEOUT_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("ENGINEER_EXEC_TIMEOUT_SECS"));
    }
}
