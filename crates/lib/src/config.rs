//! Configuration types and loading.
//!
//! Config is loaded once at startup from an optional JSON file (e.g. `~/.label-relay/config.json`)
//! and then overridden from the environment. The result is immutable and shared as `Arc<Config>`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Inbound webhook server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// OpenAI assistant used for classification.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Chatwoot API used for annotation.
    #[serde(default)]
    pub chatwoot: ChatwootConfig,

    /// Diagnostics.
    #[serde(default)]
    pub debug: DebugConfig,
}

/// Bind, port, and auth settings for the webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 8080).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Shared secret expected in the `token` query parameter. Overridden by AUTH_TOKEN env.
    #[serde(default)]
    pub auth_token: String,

    /// How failures map to HTTP status codes.
    #[serde(default)]
    pub error_status: ErrorStatusMode,
}

/// Status code policy for failed requests. The JSON body is the same in both modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStatusMode {
    /// Every failure is 500.
    #[default]
    Uniform,

    /// 405 method, 401 auth, 400 schema, 422 unprocessable event, 502 upstream failure.
    Differentiated,
}

/// OpenAI Assistants API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiConfig {
    /// API key. Overridden by OPENAI_API_KEY env.
    #[serde(default)]
    pub api_key: String,

    /// Organization id sent as `OpenAI-Organization`. Overridden by OPENAI_ORG env.
    #[serde(default)]
    pub organization: String,

    /// Existing assistant to run. When absent a new assistant is created per classification.
    #[serde(default)]
    pub assistant_id: Option<String>,

    /// API base URL including the version segment (default "https://api.openai.com/v1").
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model for newly created assistants (default "gpt-4o-mini").
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Assistants protocol version sent as `OpenAI-Beta: assistants=<version>` (default "v2").
    #[serde(default = "default_assistants_version")]
    pub assistants_version: String,

    /// Timeout for each HTTP request to the API (default 3000 ms).
    #[serde(default = "default_openai_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Upper bound for a whole classification, including run polling (default 20000 ms).
    #[serde(default = "default_run_deadline_ms")]
    pub run_deadline_ms: u64,

    /// Delay between run status polls (default 500 ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Chatwoot application API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatwootConfig {
    /// Access token sent as the `api_access_token` header. Overridden by CHATWOOT_API_ACCESS_TOKEN env.
    #[serde(default)]
    pub access_token: String,

    /// Installation base URL, e.g. "https://app.chatwoot.com". Overridden by CHATWOOT_API_URL env.
    #[serde(default)]
    pub api_url: String,

    /// Timeout for each HTTP request to the API (default 5000 ms).
    #[serde(default = "default_chatwoot_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Diagnostics settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugConfig {
    /// When set, the raw body of the last authenticated webhook is written here. Overridden by RELAY_DUMP_PATH env.
    #[serde(default)]
    pub dump_path: Option<PathBuf>,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_assistants_version() -> String {
    "v2".to_string()
}

fn default_openai_request_timeout_ms() -> u64 {
    3_000
}

fn default_run_deadline_ms() -> u64 {
    20_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_chatwoot_request_timeout_ms() -> u64 {
    5_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth_token: String::new(),
            error_status: ErrorStatusMode::default(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            organization: String::new(),
            assistant_id: None,
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            assistants_version: default_assistants_version(),
            request_timeout_ms: default_openai_request_timeout_ms(),
            run_deadline_ms: default_run_deadline_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for ChatwootConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            api_url: String::new(),
            request_timeout_ms: default_chatwoot_request_timeout_ms(),
        }
    }
}

impl OpenAiConfig {
    /// Configured assistant id, or None when unset or blank.
    pub fn assistant_id(&self) -> Option<&str> {
        self.assistant_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

impl Config {
    /// Override settings from the process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Override settings from `lookup` (env var name → value). Blank values are ignored,
    /// except OPENAI_ASSISTANT_ID where blank explicitly means "no fixed assistant".
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);

        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai.api_key = v;
        }
        if let Some(v) = get("OPENAI_ORG") {
            self.openai.organization = v;
        }
        if let Some(v) = lookup("OPENAI_ASSISTANT_ID") {
            self.openai.assistant_id = non_empty(v);
        }
        if let Some(v) = get("OPENAI_API_URL") {
            self.openai.base_url = v;
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.openai.model = v;
        }
        if let Some(v) = get("CHATWOOT_API_ACCESS_TOKEN") {
            self.chatwoot.access_token = v;
        }
        if let Some(v) = get("CHATWOOT_API_URL") {
            self.chatwoot.api_url = v;
        }
        if let Some(v) = get("AUTH_TOKEN") {
            self.gateway.auth_token = v;
        }
        if let Some(v) = get("RELAY_BIND") {
            self.gateway.bind = v;
        }
        if let Some(v) = get("RELAY_PORT") {
            match v.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => log::warn!("ignoring invalid RELAY_PORT: {}", v),
            }
        }
        if let Some(v) = get("RELAY_DUMP_PATH") {
            self.debug.dump_path = Some(PathBuf::from(v));
        }
    }

    fn missing_openai(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.openai.api_key.trim().is_empty() {
            missing.push("OPENAI_API_KEY");
        }
        if self.openai.organization.trim().is_empty() {
            missing.push("OPENAI_ORG");
        }
        if self.openai.base_url.trim().is_empty() {
            missing.push("OPENAI_API_URL");
        }
        missing
    }

    /// Check the settings the classifier needs.
    pub fn validate_openai(&self) -> Result<()> {
        bail_missing(&self.missing_openai())
    }

    /// Check every setting the relay needs to serve webhooks.
    pub fn validate(&self) -> Result<()> {
        let mut missing = self.missing_openai();
        if self.chatwoot.access_token.trim().is_empty() {
            missing.push("CHATWOOT_API_ACCESS_TOKEN");
        }
        if self.chatwoot.api_url.trim().is_empty() {
            missing.push("CHATWOOT_API_URL");
        }
        if self.gateway.auth_token.trim().is_empty() {
            missing.push("AUTH_TOKEN");
        }
        bail_missing(&missing)
    }
}

fn bail_missing(missing: &[&str]) -> Result<()> {
    if missing.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("missing required configuration: {}", missing.join(", "))
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".label-relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (RELAY_CONFIG_PATH). Missing file => default config.
/// Environment overrides are not applied here; call [`Config::apply_process_env`] afterwards.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
