//! # roomlog-config
//!
//! Configuration management for roomlog.
//!
//! Loads configuration from:
//! 1. `~/.roomlog/config.toml` (global)
//! 2. `.roomlog/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! Configuration is best-effort: a bad retention or lock setting never fails
//! a load. It is replaced by its default and a warning is logged.

#[macro_use]
pub mod logging;
pub mod path;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Overrides the storage home directory
pub const ENV_HOME: &str = "ROOMLOG_HOME";
/// Overrides the retention ceiling (messages kept per room)
pub const ENV_MAX_MESSAGES: &str = "ROOMLOG_MAX_MESSAGES";
/// Overrides the lock staleness ceiling in seconds
pub const ENV_LOCK_STALE_SECS: &str = "ROOMLOG_LOCK_STALE_SECS";

/// Retention ceiling used when nothing valid is configured
pub const DEFAULT_MAX_MESSAGES: usize = 1000;
/// Smallest accepted configured retention ceiling
pub const MIN_MAX_MESSAGES: usize = 100;
/// Largest accepted configured retention ceiling
pub const MAX_MAX_MESSAGES: usize = 50_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid retention setting {raw:?}: {reason}")]
    InvalidRetention { raw: String, reason: String },
}

/// Validate a retention ceiling against the accepted range.
pub fn validate_max_messages(value: i64) -> Result<usize, ConfigError> {
    let accepted = MIN_MAX_MESSAGES as i64..=MAX_MAX_MESSAGES as i64;
    if accepted.contains(&value) {
        Ok(value as usize)
    } else {
        Err(ConfigError::InvalidRetention {
            raw: value.to_string(),
            reason: format!(
                "must be between {} and {}",
                MIN_MAX_MESSAGES, MAX_MAX_MESSAGES
            ),
        })
    }
}

/// Parse a textual retention ceiling (as found in the environment).
pub fn parse_max_messages(raw: &str) -> Result<usize, ConfigError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidRetention {
            raw: raw.to_string(),
            reason: "not an integer".to_string(),
        })?;
    validate_max_messages(value).map_err(|_| ConfigError::InvalidRetention {
        raw: raw.to_string(),
        reason: format!(
            "must be between {} and {}",
            MIN_MAX_MESSAGES, MAX_MAX_MESSAGES
        ),
    })
}

/// Resolve a textual retention ceiling, falling back to the default.
pub fn resolve_max_messages(raw: &str) -> usize {
    match parse_max_messages(raw) {
        Ok(n) => n,
        Err(e) => {
            log_config_warn!(
                "Ignoring retention setting, using default",
                error = tracing::field::display(&e),
                default = DEFAULT_MAX_MESSAGES,
            );
            DEFAULT_MAX_MESSAGES
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub lock: LockConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.roomlog/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        // 2. Load project config (.roomlog/config.toml) - overrides global
        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            config.merge_file(&project_path)?;
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a single config file without applying overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.roomlog/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".roomlog/config.toml"))
    }

    /// Project config path: .roomlog/config.toml (relative to cwd)
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".roomlog/config.toml")
    }

    /// Merge the config file at `path` over this one.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let present: toml::Table = toml::from_str(&contents)?;
        let other: Config = toml::from_str(&contents)?;
        self.merge(other, &present);
        Ok(())
    }

    /// Merge `other` over this one.
    ///
    /// A field is taken from `other` only if its key appears in `present`
    /// (the raw table `other` was parsed from), so a file can set a value
    /// back to its default.
    pub fn merge(&mut self, other: Config, present: &toml::Table) {
        let set = |section: &str, key: &str| {
            present
                .get(section)
                .and_then(|s| s.as_table())
                .is_some_and(|s| s.contains_key(key))
        };
        if set("storage", "home") {
            self.storage.home = other.storage.home;
        }
        if set("retention", "max_messages") {
            self.retention.max_messages = other.retention.max_messages;
        }
        if set("lock", "attempts") {
            self.lock.attempts = other.lock.attempts;
        }
        if set("lock", "min_backoff_ms") {
            self.lock.min_backoff_ms = other.lock.min_backoff_ms;
        }
        if set("lock", "max_backoff_ms") {
            self.lock.max_backoff_ms = other.lock.max_backoff_ms;
        }
        if set("lock", "stale_after_secs") {
            self.lock.stale_after_secs = other.lock.stale_after_secs;
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(home) = std::env::var(ENV_HOME) {
            if !home.trim().is_empty() {
                self.storage.home = PathBuf::from(home);
            }
        }
        if let Ok(raw) = std::env::var(ENV_MAX_MESSAGES) {
            self.retention.max_messages = resolve_max_messages(&raw) as i64;
        }
        if let Ok(raw) = std::env::var(ENV_LOCK_STALE_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.lock.stale_after_secs = secs,
                _ => log_config_warn!(
                    "Ignoring lock staleness setting",
                    raw = raw.as_str(),
                    default = self.lock.stale_after_secs,
                ),
            }
        }
    }

    /// Directory holding room logs
    pub fn rooms_dir(&self) -> PathBuf {
        path::rooms_dir(&self.storage.home)
    }

    /// Directory holding per-process identity records
    pub fn identities_dir(&self) -> PathBuf {
        path::identities_dir(&self.storage.home)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for room logs and identity records
    pub home: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            home: path::default_home(),
        }
    }
}

/// Retention configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum messages kept per room (oldest dropped first)
    #[serde(deserialize_with = "lenient_max_messages")]
    pub max_messages: i64,
}

/// Accept any TOML value for `max_messages`.
///
/// Integers are kept as written and range-checked at use time. Anything
/// else goes through [`resolve_max_messages`], so a non-numeric value falls
/// back to the default with a warning instead of failing the load.
fn lenient_max_messages<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = toml::Value::deserialize(deserializer)?;
    let resolved = match value {
        toml::Value::Integer(n) => return Ok(n),
        toml::Value::String(raw) => resolve_max_messages(&raw),
        other => resolve_max_messages(&other.to_string()),
    };
    Ok(resolved as i64)
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES as i64,
        }
    }
}

impl RetentionConfig {
    /// The ceiling to enforce, after range validation and fallback.
    pub fn effective_max_messages(&self) -> usize {
        match validate_max_messages(self.max_messages) {
            Ok(n) => n,
            Err(e) => {
                log_config_warn!(
                    "Ignoring retention setting, using default",
                    error = tracing::field::display(&e),
                    default = DEFAULT_MAX_MESSAGES,
                );
                DEFAULT_MAX_MESSAGES
            }
        }
    }
}

/// Cross-process lock tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Acquisition attempts before giving up with a timeout
    pub attempts: u32,
    /// First backoff delay
    pub min_backoff_ms: u64,
    /// Backoff cap
    pub max_backoff_ms: u64,
    /// Age after which a held lock is treated as abandoned
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            min_backoff_ms: 25,
            max_backoff_ms: 400,
            stale_after_secs: 10,
        }
    }
}

impl LockConfig {
    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.min_backoff_ms))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}
