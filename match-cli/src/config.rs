//! Configuration loading for rps-match.
//!
//! Configuration is loaded from a TOML file: `--config <path>`, or
//! `config.toml` in the platform config directory. A missing default file
//! means built-in defaults; a missing explicit file is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use match_client::ClientConfig;
use match_core::EngineConfig;
use serde::{Deserialize, Serialize};

/// Root configuration for rps-match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Timer budgets.
    #[serde(default)]
    pub timers: TimersConfig,
    /// Connection and pull settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Timer budgets, in ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimersConfig {
    /// Ticks a player has to move (default: 10).
    #[serde(default = "default_move_budget")]
    pub move_budget: u32,
    /// Remaining ticks at which the countdown turns urgent (default: 3).
    #[serde(default = "default_urgency_threshold")]
    pub urgency_threshold: u32,
    /// Ticks a rematch offer stays open (default: 30).
    #[serde(default = "default_rematch_budget")]
    pub rematch_budget: u32,
}

/// Connection and pull settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Authority address (default: 127.0.0.1:5000).
    #[serde(default = "default_address")]
    pub address: String,
    /// Length of one tick in milliseconds (default: 1000).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Pull every this many ticks; 0 disables periodic pulls (default: 5).
    #[serde(default = "default_pull_interval")]
    pub pull_interval: u32,
}

// Default value functions
fn default_move_budget() -> u32 {
    10
}

fn default_urgency_threshold() -> u32 {
    3
}

fn default_rematch_budget() -> u32 {
    30
}

fn default_address() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_pull_interval() -> u32 {
    5
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            move_budget: default_move_budget(),
            urgency_threshold: default_urgency_threshold(),
            rematch_budget: default_rematch_budget(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            tick_ms: default_tick_ms(),
            pull_interval: default_pull_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load from `explicit` if given, else from the default location if a
    /// file exists there, else use defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "loading default config");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Timer budgets for the engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_move_budget(self.timers.move_budget)
            .with_urgency_threshold(self.timers.urgency_threshold)
            .with_rematch_budget(self.timers.rematch_budget)
    }

    /// Session settings for the client runtime.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.sync.address)
            .with_tick(Duration::from_millis(self.sync.tick_ms.max(1)))
            .with_pull_interval(self.sync.pull_interval)
            .with_engine(self.engine_config())
    }
}

/// Default config file location for this platform.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "rps-match", "rps-match")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
