//! Daemon Configuration
//!
//! TOML configuration for the waba-connect daemon, loaded from the user's
//! config directory and created with defaults on first run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Provider API access
    #[serde(default)]
    pub api: ApiConfig,

    /// Synchronization tuning
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Provider API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the provider REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token for API calls
    #[serde(default)]
    pub api_key: String,

    /// Business phone number account this daemon syncs
    #[serde(default)]
    pub account_id: String,
}

/// Synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Delay before the reconciling refresh that follows a send, in
    /// milliseconds
    #[serde(default = "default_reconcile_delay")]
    pub reconcile_delay_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_poll_interval() -> u64 {
    10
}

fn default_reconcile_delay() -> u64 {
    2_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            account_id: String::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            reconcile_delay_ms: default_reconcile_delay(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_delay_ms)
    }
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("waba-connect")
            .join("daemon.toml")
    }

    /// Load configuration from file, creating default if not found
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        if path.exists() {
            let contents = fs::read_to_string(&path).context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Engine configuration derived from this daemon configuration
    pub fn engine_config(&self) -> waba_connect_engine::EngineConfig {
        waba_connect_engine::EngineConfig {
            poll_interval: self.sync.poll_interval(),
            reconcile_delay: self.sync.reconcile_delay(),
            default_account: if self.api.account_id.is_empty() {
                None
            } else {
                Some(self.api.account_id.clone())
            },
        }
    }
}
