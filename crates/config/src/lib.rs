//! Configuration loading, validation, and management for TaskForge.
//!
//! Loads configuration from `~/.taskforge/config.toml` with `TASKFORGE_*`
//! environment variable overrides. Every field has a serde default so an
//! absent file yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use taskforge_core::ProviderKind;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// The root configuration structure.
///
/// Maps directly to `~/.taskforge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default completion provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Provider-specific configurations, keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Tool-provider (MCP server) configuration
    #[serde(default)]
    pub mcp: McpConfig,

    /// Agent loop limits and policies
    #[serde(default)]
    pub agent: AgentSettings,

    /// Session surface (HTTP) configuration
    #[serde(default)]
    pub surface: SurfaceConfig,
}

fn default_provider() -> String {
    "gemini".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            providers: HashMap::new(),
            mcp: McpConfig::default(),
            agent: AgentSettings::default(),
            surface: SurfaceConfig::default(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("default_provider", &self.default_provider)
            .field("providers", &self.providers)
            .field("mcp", &self.mcp)
            .field("agent", &self.agent)
            .field("surface", &self.surface)
            .finish()
    }
}

/// Per-provider settings.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key. Also settable via `TASKFORGE_<PROVIDER>_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override (proxies, self-hosted compatible endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Which tool-provider protocol variant to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpMode {
    /// JSON-RPC 2.0 with an `initialize` handshake before discovery
    #[default]
    JsonRpc,
    /// Plain REST endpoints, no handshake
    Rest,
}

/// Tool-provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub mode: McpMode,

    #[serde(default = "default_mcp_base_url")]
    pub base_url: String,

    /// Path for JSON-RPC messages and REST invocations
    #[serde(default = "default_message_path")]
    pub message_path: String,

    /// Path for REST discovery
    #[serde(default = "default_tools_path")]
    pub tools_path: String,

    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
}

fn default_mcp_base_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn default_message_path() -> String {
    "/mcp/message".into()
}
fn default_tools_path() -> String {
    "/mcp/tools".into()
}
fn default_mcp_timeout() -> u64 {
    30
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            mode: McpMode::default(),
            base_url: default_mcp_base_url(),
            message_path: default_message_path(),
            tools_path: default_tools_path(),
            timeout_secs: default_mcp_timeout(),
        }
    }
}

/// Agent loop limits and recoverability policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum Acting→Evaluating passes before forced termination
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Per-tool-call timeout
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Per-completion-request timeout
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_secs: u64,

    /// Whether a step that failed validation is considered recoverable
    /// (eligible for replan) rather than terminal
    #[serde(default = "default_true")]
    pub recoverable_validation_failures: bool,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_completion_timeout() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_secs: default_tool_timeout(),
            completion_timeout_secs: default_completion_timeout(),
            recoverable_validation_failures: default_true(),
        }
    }
}

/// HTTP session-surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Retained session cap; oldest sessions are evicted beyond this
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5000
}
fn default_max_sessions() -> usize {
    1000
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl AppConfig {
    /// Default config file location: `~/.taskforge/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".taskforge/config.toml"))
    }

    /// Load configuration from the given path (or the default location),
    /// then apply environment overrides. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = path.map(PathBuf::from).or_else(Self::default_path);

        let mut config = match resolved {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(&p).map_err(|source| ConfigError::Io {
                    path: p.clone(),
                    source,
                })?;
                let parsed =
                    toml::from_str::<AppConfig>(&raw).map_err(|source| ConfigError::Parse {
                        path: p.clone(),
                        source,
                    })?;
                debug!(path = %p.display(), "Loaded configuration");
                parsed
            }
            _ => {
                debug!("No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `TASKFORGE_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TASKFORGE_DEFAULT_PROVIDER") {
            self.default_provider = v;
        }
        if let Ok(v) = std::env::var("TASKFORGE_MCP_BASE_URL") {
            self.mcp.base_url = v;
        }
        if let Ok(v) = std::env::var("TASKFORGE_MCP_MODE") {
            match v.to_ascii_lowercase().as_str() {
                "jsonrpc" => self.mcp.mode = McpMode::JsonRpc,
                "rest" => self.mcp.mode = McpMode::Rest,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("TASKFORGE_MAX_ITERATIONS") {
            if let Ok(n) = v.parse() {
                self.agent.max_iterations = n;
            }
        }
        if let Ok(v) = std::env::var("TASKFORGE_TOOL_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.agent.tool_timeout_secs = n;
            }
        }

        for kind in ProviderKind::ALL {
            let var = format!("TASKFORGE_{}_API_KEY", kind.as_str().to_uppercase());
            if let Ok(key) = std::env::var(&var) {
                self.providers.entry(kind.as_str().into()).or_default().api_key = Some(key);
            }
        }
    }

    /// Provider config for a kind, if one is present.
    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        self.providers.get(kind.as_str())
    }
}
