//! Configuration management for the chat gateway.
//!
//! Configuration comes from an optional YAML file (with `${VAR}` expansion)
//! followed by environment overrides. Without a file, [`AppConfig::from_env`]
//! builds a single OpenAI-compatible provider from the environment.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, route prefix)
    #[serde(default)]
    pub server: ServerConfig,

    /// Provider used when a request does not name one
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used when a request does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Bounded wait for non-streaming provider calls, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Whether to verify SSL certificates for upstream requests
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    /// Registered LLM providers
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// PostgreSQL URL for the conversation store; in-memory store when absent
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Configuration for a single LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier clients use in `ChatRequest.provider`
    pub name: String,

    /// Wire protocol spoken by the provider
    #[serde(default = "default_provider_type")]
    pub provider_type: String,

    /// Base URL for the provider's API
    pub api_base: String,

    /// API key for authentication
    #[serde(default)]
    pub api_key: String,

    /// Models advertised on `/models`
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub id: String,

    /// Display name; defaults to the id
    #[serde(default)]
    pub name: Option<String>,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix for all API routes (health and metrics stay at the root)
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_prefix: default_api_prefix(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_provider_type() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_verify_ssl() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// The catalogue advertised for the built-in OpenAI provider.
pub fn default_openai_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig::new("gpt-3.5-turbo", "GPT-3.5 Turbo"),
        ModelConfig::new("gpt-4", "GPT-4"),
        ModelConfig::new("gpt-4-turbo", "GPT-4 Turbo"),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            default_provider: default_provider(),
            default_model: default_model(),
            request_timeout_secs: default_request_timeout(),
            verify_ssl: default_verify_ssl(),
            providers: vec![ProviderConfig {
                name: "openai".to_string(),
                provider_type: default_provider_type(),
                api_base: OPENAI_API_BASE.to_string(),
                api_key: String::new(),
                models: default_openai_models(),
            }],
            database_url: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, then apply environment overrides.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use chat_gateway::core::config::AppConfig;
    ///
    /// let config = AppConfig::load("config.yaml").expect("Failed to load config");
    /// ```
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let expanded = expand_env_vars(&content);

        let mut config: AppConfig = serde_yaml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults and environment variables only.
    pub fn from_env() -> Result<Self> {
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from `CONFIG_PATH` when set, otherwise from the environment.
    pub fn load_default() -> Result<Self> {
        match std::env::var("CONFIG_PATH") {
            Ok(path) => Self::load(&path),
            Err(_) => Self::from_env(),
        }
    }

    /// Environment variables take precedence over file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }

        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(prefix) = std::env::var("API_PREFIX") {
            self.server.api_prefix = prefix;
        }

        if let Ok(provider) = std::env::var("DEFAULT_PROVIDER") {
            self.default_provider = provider;
        }

        if let Ok(model) = std::env::var("DEFAULT_MODEL") {
            self.default_model = model;
        }

        if let Ok(timeout_str) = std::env::var("REQUEST_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout_str.parse::<u64>() {
                self.request_timeout_secs = timeout;
            }
        }

        if let Ok(verify_ssl_str) = std::env::var("VERIFY_SSL") {
            self.verify_ssl = str_to_bool(&verify_ssl_str);
        }

        if let Ok(url) = std::env::var("DB_URL") {
            if !url.is_empty() {
                self.database_url = Some(url);
            }
        }

        if let Some(openai) = self
            .providers
            .iter_mut()
            .find(|p| p.provider_type == "openai" && p.name == "openai")
        {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                openai.api_key = key;
            }
            if let Ok(base) = std::env::var("OPENAI_API_BASE") {
                openai.api_base = base;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                anyhow::bail!("Duplicate provider name in configuration: {}", provider.name);
            }
        }
        Ok(())
    }

    /// Prefix normalized to start with `/` and have no trailing slash
    /// (empty string means routes are mounted at the root).
    pub fn api_prefix(&self) -> String {
        let trimmed = self.server.api_prefix.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }
}

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
fn expand_env_vars(content: &str) -> String {
    let re = Regex::new(r#"\$\{([^}:]+)(?::-?([^}]*))?\}"#).expect("valid env var pattern");

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
    })
    .to_string()
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const OVERRIDE_VARS: &[&str] = &[
        "HOST",
        "PORT",
        "API_PREFIX",
        "DEFAULT_PROVIDER",
        "DEFAULT_MODEL",
        "REQUEST_TIMEOUT_SECS",
        "VERIFY_SSL",
        "DB_URL",
        "OPENAI_API_KEY",
        "OPENAI_API_BASE",
    ];

    fn clear_overrides() {
        for var in OVERRIDE_VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn test_expand_env_vars() {
        unsafe {
            std::env::set_var("GATEWAY_TEST_VAR", "test_value");
        }
        let output = expand_env_vars("api_key: ${GATEWAY_TEST_VAR}");
        assert_eq!(output, "api_key: test_value");
        unsafe {
            std::env::remove_var("GATEWAY_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        unsafe {
            std::env::remove_var("GATEWAY_MISSING_VAR");
        }
        let output = expand_env_vars("api_key: ${GATEWAY_MISSING_VAR:-fallback}");
        assert_eq!(output, "api_key: fallback");
        let output = expand_env_vars("api_key: ${GATEWAY_MISSING_VAR:fallback}");
        assert_eq!(output, "api_key: fallback");
    }

    #[test]
    fn test_expand_env_vars_empty_default() {
        unsafe {
            std::env::remove_var("GATEWAY_EMPTY_VAR");
        }
        let output = expand_env_vars("api_key: ${GATEWAY_EMPTY_VAR:-}");
        assert_eq!(output, "api_key: ");
    }

    #[test]
    fn test_str_to_bool() {
        assert!(str_to_bool("true"));
        assert!(str_to_bool("YES"));
        assert!(str_to_bool("1"));
        assert!(str_to_bool("On"));
        assert!(!str_to_bool("false"));
        assert!(!str_to_bool("0"));
        assert!(!str_to_bool(""));
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.default_model, "gpt-3.5-turbo");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].models.len(), 3);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_api_prefix_normalization() {
        let mut config = AppConfig::default();
        assert_eq!(config.api_prefix(), "/api");
        config.server.api_prefix = "v1/".to_string();
        assert_eq!(config.api_prefix(), "/v1");
        config.server.api_prefix = "/".to_string();
        assert_eq!(config.api_prefix(), "");
    }

    #[test]
    fn test_model_display_name_falls_back_to_id() {
        let model = ModelConfig {
            id: "m1".to_string(),
            name: None,
        };
        assert_eq!(model.display_name(), "m1");
    }

    #[test]
    #[serial]
    fn test_load_config_from_file() {
        clear_overrides();

        let temp_file = write_config(
            r#"
default_provider: openai
default_model: gpt-4
request_timeout_secs: 12
providers:
  - name: openai
    api_base: http://localhost:9000/v1
    api_key: test_key
    models:
      - id: gpt-4
        name: GPT-4
server:
  host: 127.0.0.1
  port: 8080
  api_prefix: /chat-api
"#,
        );

        let config = AppConfig::load(temp_file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.default_model, "gpt-4");
        assert_eq!(config.request_timeout_secs, 12);
        assert_eq!(config.providers[0].api_base, "http://localhost:9000/v1");
        assert_eq!(config.providers[0].provider_type, "openai");
        assert_eq!(config.providers[0].models[0].display_name(), "GPT-4");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.api_prefix(), "/chat-api");
    }

    #[test]
    #[serial]
    fn test_load_config_with_env_expansion() {
        clear_overrides();
        unsafe {
            std::env::set_var("GATEWAY_TEST_API_KEY", "env_api_key");
        }

        let temp_file = write_config(
            r#"
providers:
  - name: openai
    api_base: http://localhost:9000/v1
    api_key: ${GATEWAY_TEST_API_KEY}
"#,
        );

        let config = AppConfig::load(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.providers[0].api_key, "env_api_key");

        unsafe {
            std::env::remove_var("GATEWAY_TEST_API_KEY");
        }
    }

    #[test]
    #[serial]
    fn test_env_var_overrides() {
        clear_overrides();
        unsafe {
            std::env::set_var("PORT", "9999");
            std::env::set_var("DEFAULT_MODEL", "gpt-4-turbo");
            std::env::set_var("OPENAI_API_KEY", "sk-from-env");
            std::env::set_var("DB_URL", "postgresql://localhost/chat");
        }

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.default_model, "gpt-4-turbo");
        assert_eq!(config.providers[0].api_key, "sk-from-env");
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgresql://localhost/chat")
        );

        clear_overrides();
    }

    #[test]
    #[serial]
    fn test_duplicate_provider_names_rejected() {
        clear_overrides();
        let temp_file = write_config(
            r#"
providers:
  - name: openai
    api_base: http://a
  - name: openai
    api_base: http://b
"#,
        );
        assert!(AppConfig::load(temp_file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(AppConfig::load("nonexistent_file.yaml").is_err());
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let temp_file = write_config("invalid: yaml: content:");
        assert!(AppConfig::load(temp_file.path().to_str().unwrap()).is_err());
    }
}
