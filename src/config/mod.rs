//! Configuration Module
//!
//! Provides TOML-based configuration for meshmq with support for:
//! - Node identity
//! - Store backend selection
//! - Engine limits
//! - Static user authentication
//! - Environment variable overrides (MESHMQ__* prefix)

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}


/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Bad substitution pattern
    Pattern(regex::Error),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Pattern(e) => write!(f, "Pattern error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<regex::Error> for ConfigError {
    fn from(e: regex::Error) -> Self {
        ConfigError::Pattern(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// This broker node
    pub node: NodeConfig,
    /// Backing store
    pub store: StoreConfig,
    /// Engine limits
    pub limits: LimitsConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Node identity
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node id used in the presence registry (default: host name)
    #[serde(default = "default_node_id")]
    pub id: String,
}

fn default_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "meshmq".to_string())
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
        }
    }
}

/// Store backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// In-process map, state is lost on exit
    #[default]
    Memory,
    /// Fjall (local LSM-tree storage)
    Fjall,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(1)
}

/// Store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend type
    pub backend: BackendType,

    /// Data directory path (for fjall)
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Journal sync interval (e.g., "100ms", "1s")
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Memory,
            path: default_store_path(),
            flush_interval: default_flush_interval(),
        }
    }
}

/// Engine limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum topic levels (0 = unlimited)
    pub max_topic_levels: usize,
    /// Page size when sweeping presence sets
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
    /// Maximum queued in-flight messages per client and scope (0 = unlimited)
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
}

fn default_scan_page_size() -> usize {
    100
}
fn default_max_inflight() -> usize {
    1000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_topic_levels: 0,
            scan_page_size: default_scan_page_size(),
            max_inflight: default_max_inflight(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether authentication is enabled
    pub enabled: bool,
    /// Allow anonymous connections when auth is enabled
    #[serde(default = "default_true")]
    pub allow_anonymous: bool,
    /// Static user list
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_anonymous: true,
            users: Vec::new(),
        }
    }
}

fn default_max_qos() -> u8 {
    2
}

/// User configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    /// Username
    pub username: String,
    /// Password (plaintext)
    #[serde(default)]
    pub password: String,
    /// Highest QoS this user may publish or subscribe with
    #[serde(default = "default_max_qos")]
    pub max_qos: u8,
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `MESHMQ__` prefix with double underscores for nesting:
    ///    - `MESHMQ__NODE__ID=node-a` overrides `node.id`
    ///    - `MESHMQ__STORE__BACKEND=fjall` overrides `store.backend`
    ///    - `MESHMQ__LIMITS__MAX_INFLIGHT=64` overrides `limits.max_inflight`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("node.id", default_node_id())?
            .set_default("store.backend", "memory")?
            .set_default("store.path", "./data")?
            .set_default("store.flush_interval", "1s")?
            .set_default("limits.max_topic_levels", 0)?
            .set_default("limits.scan_page_size", 100)?
            .set_default("limits.max_inflight", 1000)?
            .set_default("auth.enabled", false)?
            .set_default("auth.allow_anonymous", true)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content)?;
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("MESHMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "node.id must not be empty".to_string(),
            ));
        }

        if self.limits.scan_page_size == 0 {
            return Err(ConfigError::Validation(
                "limits.scan_page_size must be at least 1".to_string(),
            ));
        }

        for user in &self.auth.users {
            if user.max_qos > 2 {
                return Err(ConfigError::Validation(format!(
                    "User '{}' has max_qos {}, must be 0, 1, or 2",
                    user.username, user.max_qos
                )));
            }
            if self.auth.enabled && user.password.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "User '{}' has empty password",
                    user.username
                )));
            }
        }

        Ok(())
    }
}
