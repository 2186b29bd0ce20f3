//! Configuration management
//!
//! This module handles loading, saving, and migrating the arc configuration
//! file, and overlays `ARC_*` environment variables on top of it.
//! The configuration file is stored in TOML format at ~/.arc/config.toml.
//!
//! PROTECTED FILE: Changes to schema_version require migration support.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current configuration schema version
///
/// IMPORTANT: Bumping this version requires:
/// 1. Adding a migration in `ConfigManager::migrate`
/// 2. Updating migration tests
/// 3. Marking the change as BREAKING
pub const SCHEMA_VERSION: u32 = 1;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ARC_";

/// Default output format
const DEFAULT_OUTPUT: &str = "human";

/// Default color setting
const DEFAULT_COLOR: &str = "auto";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    pub schema_version: u32,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Transfer engine settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Configured providers
    #[serde(default)]
    pub providers: Vec<ProviderProfile>,
}

/// Default settings for CLI behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Output format: "human" or "json"
    #[serde(default = "default_output")]
    pub output: String,

    /// Color mode: "auto", "always", or "never"
    #[serde(default = "default_color")]
    pub color: String,

    /// Show progress bars
    #[serde(default = "default_true")]
    pub progress: bool,
}

fn default_output() -> String {
    DEFAULT_OUTPUT.to_string()
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            progress: true,
        }
    }
}

/// Settings for the transfer executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Number of parallel workers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum attempts per task, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Copy buffer size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Per-task timeout in seconds (none by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Verify size/checksum after each copy
    #[serde(default = "default_true")]
    pub verify: bool,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    10000
}

fn default_chunk_size() -> usize {
    256 * 1024
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            chunk_size: default_chunk_size(),
            timeout_secs: None,
            verify: true,
        }
    }
}

impl TransferConfig {
    /// Per-task timeout, if configured
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

/// A named provider and its backend-specific settings
///
/// Everything besides `name` and `kind` is kept as raw TOML and interpreted
/// by the backend's factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Provider id used in locations (`<name>:/path`)
    pub name: String,

    /// Backend kind: "local", "memory", "s3", ...
    pub kind: String,

    /// Backend-specific settings
    #[serde(flatten)]
    pub options: BTreeMap<String, toml::Value>,
}

impl ProviderProfile {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Deserialize the backend-specific settings into a typed struct
    pub fn settings<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let table: toml::Table = self.options.clone().into_iter().collect();
        toml::Value::Table(table).try_into().map_err(|e| {
            Error::Config(format!("Invalid settings for provider '{}': {e}", self.name))
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            defaults: Defaults::default(),
            transfer: TransferConfig::default(),
            providers: Vec::new(),
        }
    }
}

impl Config {
    /// Look up a provider profile by name
    pub fn provider(&self, name: &str) -> Option<&ProviderProfile> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Overlay `ARC_*` variables on top of the file values
    ///
    /// Unknown `ARC_*` variables are ignored; malformed values are errors.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            let key = key.as_ref();
            match name {
                "OUTPUT" => self.defaults.output = value.to_string(),
                "COLOR" => self.defaults.color = value.to_string(),
                "PROGRESS" => self.defaults.progress = parse_env(key, value)?,
                "TRANSFER_CONCURRENCY" => self.transfer.concurrency = parse_env(key, value)?,
                "TRANSFER_MAX_ATTEMPTS" => self.transfer.max_attempts = parse_env(key, value)?,
                "TRANSFER_INITIAL_BACKOFF_MS" => {
                    self.transfer.initial_backoff_ms = parse_env(key, value)?
                }
                "TRANSFER_MAX_BACKOFF_MS" => self.transfer.max_backoff_ms = parse_env(key, value)?,
                "TRANSFER_CHUNK_SIZE" => self.transfer.chunk_size = parse_env(key, value)?,
                "TRANSFER_TIMEOUT_SECS" => {
                    self.transfer.timeout_secs = Some(parse_env(key, value)?)
                }
                "TRANSFER_VERIFY" => self.transfer.verify = parse_env(key, value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.transfer.concurrency == 0 {
            return Err(Error::Config("transfer.concurrency must be at least 1".into()));
        }
        if self.transfer.max_attempts == 0 {
            return Err(Error::Config("transfer.max_attempts must be at least 1".into()));
        }
        if self.transfer.chunk_size == 0 {
            return Err(Error::Config("transfer.chunk_size must be at least 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(Error::Config(format!(
                    "Provider '{}' is defined more than once",
                    provider.name
                )));
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value '{value}' for {key}")))
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the default config path
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".into()))?;
        let config_path = home.join(".arc").join("config.toml");
        Ok(Self { config_path })
    }

    /// Create a ConfigManager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load the configuration file, then overlay the process environment
    pub fn load(&self) -> Result<Config> {
        let mut config = self.load_file()?;
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from disk only
    ///
    /// If the configuration file doesn't exist, returns a default configuration.
    /// If the schema version doesn't match, attempts migration.
    pub fn load_file(&self) -> Result<Config> {
        if !self.config_path.exists() {
            tracing::debug!(path = %self.config_path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %self.config_path.display(), "using config file");

        // Check schema version and migrate if necessary
        if config.schema_version < SCHEMA_VERSION {
            config = self.migrate(config)?;
        } else if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade arc.",
                config.schema_version, SCHEMA_VERSION
            )));
        }

        Ok(config)
    }

    /// Migrate configuration from older schema version
    fn migrate(&self, config: Config) -> Result<Config> {
        let mut config = config;

        // Schema 0 files predate versioning and need no field changes

        config.schema_version = SCHEMA_VERSION;
        Ok(config)
    }
}
