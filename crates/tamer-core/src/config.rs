//! Configuration parsing and management.
//!
//! The configuration file is TOML and every section is optional; a missing
//! file yields [`TamerConfig::default`]. Paths default to locations under
//! [`default_home_dir`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the tamer home directory.
pub const HOME_ENV: &str = "TAMER_HOME";

/// Default file name of the configuration inside the home directory.
pub const CONFIG_FILE_NAME: &str = "tamer.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TamerConfig {
    /// Endpoint registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Supervisor RPC and launch settings.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Watcher definition inputs.
    #[serde(default)]
    pub watchers: WatcherConfig,
}

impl TamerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from `path` if it exists, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read, parsed or
    /// validated.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let registry = &self.registry;
        if registry.base_port % 2 != 0 {
            return Err(ConfigError::Validation(format!(
                "registry.base_port must be even, got {}",
                registry.base_port
            )));
        }
        if registry.max_port < registry.base_port {
            return Err(ConfigError::Validation(format!(
                "registry.max_port ({}) is below registry.base_port ({})",
                registry.max_port, registry.base_port
            )));
        }
        if registry.max_port > u16::MAX - 2 {
            return Err(ConfigError::Validation(format!(
                "registry.max_port must leave room for a 3-port block, got {}",
                registry.max_port
            )));
        }
        if registry.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "registry.host must not be empty".to_string(),
            ));
        }
        if self.supervisor.timeout.is_zero() {
            return Err(ConfigError::Validation(
                "supervisor.timeout must be greater than zero".to_string(),
            ));
        }
        if self.watchers.daemon_command.trim().is_empty() {
            return Err(ConfigError::Validation(
                "watchers.daemon_command must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Endpoint registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Path to the YAML registry file.
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,

    /// Host recorded for newly allocated endpoints.
    #[serde(default = "default_host")]
    pub host: String,

    /// First port tried by the allocator. Must be even.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Last port (inclusive) the allocator may hand out.
    #[serde(default = "default_max_port")]
    pub max_port: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            host: default_host(),
            base_port: default_base_port(),
            max_port: default_max_port(),
        }
    }
}

/// Supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Bound on every connect, send and receive.
    #[serde(default = "default_timeout")]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// How long to wait for a freshly launched supervisor to answer.
    #[serde(default = "default_startup_timeout")]
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// Supervisor executable. When unset, `start` never launches one.
    #[serde(default)]
    pub command: Option<String>,

    /// Supervisor arguments.
    ///
    /// `{profile}`, `{endpoint}`, `{pubsub}` and `{stats}` are substituted
    /// with the profile name and its three endpoint strings.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            startup_timeout: default_startup_timeout(),
            command: None,
            args: Vec::new(),
        }
    }
}

/// Inputs for building watcher definitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Executable of the per-profile daemon.
    #[serde(default = "default_daemon_command")]
    pub daemon_command: String,

    /// Arguments placed before `--profile <name>`.
    #[serde(default = "default_daemon_args")]
    pub daemon_args: Vec<String>,

    /// Executable of the log relay.
    #[serde(default = "default_streamer_command")]
    pub streamer_command: String,

    /// Arguments placed before the stream tag.
    #[serde(default = "default_streamer_args")]
    pub streamer_args: Vec<String>,

    /// Virtual environment the supervisor should activate, if any.
    #[serde(default)]
    pub virtualenv: Option<PathBuf>,

    /// Working directory of managed processes.
    #[serde(default = "default_home_dir")]
    pub working_dir: PathBuf,

    /// Directory receiving per-watcher stdout/stderr files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Extra environment variables for every watcher.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            daemon_command: default_daemon_command(),
            daemon_args: default_daemon_args(),
            streamer_command: default_streamer_command(),
            streamer_args: default_streamer_args(),
            virtualenv: None,
            working_dir: default_home_dir(),
            log_dir: default_log_dir(),
            env: BTreeMap::new(),
        }
    }
}

/// Resolve the tamer home directory.
///
/// `$TAMER_HOME` wins, then `$HOME/.tamer`, then `/tmp/tamer`.
#[must_use]
pub fn default_home_dir() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }
    std::env::var("HOME").map_or_else(
        |_| PathBuf::from("/tmp/tamer"),
        |home| PathBuf::from(home).join(".tamer"),
    )
}

/// Default location of the configuration file.
#[must_use]
pub fn default_config_path() -> PathBuf {
    default_home_dir().join(CONFIG_FILE_NAME)
}

fn default_registry_path() -> PathBuf {
    default_home_dir().join("profiles.yaml")
}

fn default_log_dir() -> PathBuf {
    default_home_dir().join("log")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_base_port() -> u16 {
    6000
}

const fn default_max_port() -> u16 {
    6998
}

const fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

const fn default_startup_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_daemon_command() -> String {
    "verdi".to_string()
}

fn default_daemon_args() -> Vec<String> {
    vec!["devel".to_string(), "run_daemon".to_string()]
}

fn default_streamer_command() -> String {
    "verdi".to_string()
}

fn default_streamer_args() -> Vec<String> {
    vec!["devel".to_string(), "stream".to_string()]
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
