//! Configuration management for databot
//!
//! Settings come from an optional TOML file, overlaid by environment
//! variables. Credentials only ever come from the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
pub const GEMINI_MODEL: &str = "GEMINI_MODEL";
pub const LANGFUSE_ENABLED: &str = "LANGFUSE_ENABLED";
pub const LANGFUSE_PUBLIC_KEY: &str = "LANGFUSE_PUBLIC_KEY";
pub const LANGFUSE_SECRET_KEY: &str = "LANGFUSE_SECRET_KEY";
pub const LANGFUSE_HOST: &str = "LANGFUSE_HOST";
pub const DATABOT_HOST: &str = "DATABOT_HOST";
pub const DATABOT_PORT: &str = "DATABOT_PORT";

pub const DEFAULT_LANGFUSE_HOST: &str = "https://cloud.langfuse.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Settings that can live in the TOML file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            max_tokens: 8192,
            temperature: 0.0,
            request_timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Sessions idle for longer than this are dropped
    pub session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8501,
            session_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: usize,
    /// Rows of a query result shown to the model
    pub observation_rows: usize,
    /// Rows of a query result kept for display
    pub artifact_rows: usize,
    pub tool_timeout_secs: u64,
    /// Estimated token budget for the conversation sent to the model
    pub max_context_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            observation_rows: 20,
            artifact_rows: 1000,
            tool_timeout_secs: 30,
            max_context_tokens: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub max_upload_bytes: usize,
    pub preview_rows: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 200 * 1024 * 1024,
            preview_rows: 5,
        }
    }
}

/// Langfuse tracing settings; present only when tracing is fully configured
#[derive(Clone)]
pub struct TracingConfig {
    pub host: String,
    pub public_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for TracingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingConfig")
            .field("host", &self.host)
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Process-wide configuration, immutable after startup
#[derive(Clone)]
pub struct Config {
    pub google_api_key: String,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub data: DataConfig,
    pub tracing: Option<TracingConfig>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("google_api_key", &"<redacted>")
            .field("llm", &self.llm)
            .field("server", &self.server)
            .field("agent", &self.agent)
            .field("data", &self.data)
            .field("tracing", &self.tracing)
            .finish()
    }
}

impl Config {
    /// Load the file config (explicit path or default location) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file_config = match path {
            Some(path) => FileConfig::read(path)?,
            None => match Self::config_path() {
                Some(path) if path.exists() => FileConfig::read(&path)?,
                _ => FileConfig::default(),
            },
        };

        Self::from_lookup(file_config, |name| std::env::var(name).ok())
    }

    /// Default configuration file path, e.g. `~/.config/databot/config.toml`
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "databot")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Build the configuration from file settings and an environment lookup
    pub fn from_lookup<F>(file_config: FileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let google_api_key = get(GOOGLE_API_KEY).ok_or(ConfigError::MissingVar(GOOGLE_API_KEY))?;

        let FileConfig {
            mut llm,
            mut server,
            agent,
            data,
        } = file_config;

        if let Some(model) = get(GEMINI_MODEL) {
            llm.model = model;
        }
        if let Some(host) = get(DATABOT_HOST) {
            server.host = host;
        }
        if let Some(port) = get(DATABOT_PORT) {
            server.port = port.parse().map_err(|e| ConfigError::InvalidValue {
                name: DATABOT_PORT,
                reason: format!("{port:?}: {e}"),
            })?;
        }

        let limits: [(&'static str, u64); 8] = [
            ("llm.request_timeout_secs", llm.request_timeout_secs),
            ("agent.max_iterations", agent.max_iterations as u64),
            ("agent.observation_rows", agent.observation_rows as u64),
            ("agent.artifact_rows", agent.artifact_rows as u64),
            ("agent.tool_timeout_secs", agent.tool_timeout_secs),
            ("agent.max_context_tokens", agent.max_context_tokens as u64),
            ("data.max_upload_bytes", data.max_upload_bytes as u64),
            ("data.preview_rows", data.preview_rows as u64),
        ];
        if let Some((name, _)) = limits.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidValue {
                name,
                reason: "must be at least 1".to_string(),
            });
        }

        let tracing = resolve_tracing(&get);

        Ok(Self {
            google_api_key,
            llm,
            server,
            agent,
            data,
            tracing,
        })
    }

    pub fn tracing_enabled(&self) -> bool {
        self.tracing.is_some()
    }
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Tracing is either fully configured or off; partial setups fall back to off
fn resolve_tracing(get: &impl Fn(&str) -> Option<String>) -> Option<TracingConfig> {
    let enabled = get(LANGFUSE_ENABLED).is_some_and(|v| is_truthy(&v));
    if !enabled {
        return None;
    }

    let public_key = get(LANGFUSE_PUBLIC_KEY);
    let secret_key = get(LANGFUSE_SECRET_KEY);
    match (public_key, secret_key) {
        (Some(public_key), Some(secret_key)) => Some(TracingConfig {
            host: get(LANGFUSE_HOST)
                .unwrap_or_else(|| DEFAULT_LANGFUSE_HOST.to_string())
                .trim_end_matches('/')
                .to_string(),
            public_key,
            secret_key,
        }),
        (public_key, _) => {
            let missing = if public_key.is_none() {
                LANGFUSE_PUBLIC_KEY
            } else {
                LANGFUSE_SECRET_KEY
            };
            tracing::warn!(
                missing = missing,
                "{} is set but tracing keys are incomplete; tracing disabled",
                LANGFUSE_ENABLED
            );
            None
        }
    }
}
