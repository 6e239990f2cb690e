//! Configuration module for banksync.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation and defaults. The daemon binary layers
//! CLI overrides on top of the loaded file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for banksync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listener: ListenerConfig,
    pub schedule: ScheduleConfig,
    pub provider: ProviderConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

/// Callback-listener settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Fixed TCP port to listen on. When set, the operator is expected
    /// to have configured port forwarding manually; when unset a random
    /// port in the dynamic range is chosen and UPnP mapping attempted.
    pub port: Option<u16>,
}

/// Scheduler timing settings, all in minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Sync interval when no callback channel could be established.
    pub wait_minutes: u64,
    /// Sync interval while a callback channel is live.
    pub interval_minutes: u64,
    /// How often the callback channel setup is refreshed (port-mapping
    /// lease renewal, re-registration).
    pub refresh_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            wait_minutes: 60,
            interval_minutes: 240,
            refresh_minutes: 480,
        }
    }
}

impl ScheduleConfig {
    /// Poll-mode sync interval.
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_minutes * 60)
    }

    /// Sync interval with a live callback channel.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    /// Channel refresh period.
    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_minutes * 60)
    }
}

/// Banking-provider API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provider REST API.
    pub api_url: String,
    /// API token for the provider session.
    pub api_token: String,
    /// CIDR ranges notification connections may originate from.
    /// Connections from outside these ranges are treated as spurious.
    pub notification_ranges: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.bunq.com".to_string(),
            api_token: String::new(),
            notification_ranges: vec!["185.40.108.0/22".to_string()],
        }
    }
}

/// Budgeting-service (ledger write) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Base URL of the budgeting-service REST API.
    pub api_url: String,
    /// Personal access token for the budgeting service.
    pub access_token: String,
    /// Budget the transactions are written into.
    pub budget_id: String,
    /// How many days of transactions each pass re-reads.
    pub lookback_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.ynab.com/v1".to_string(),
            access_token: String::new(),
            budget_id: String::new(),
            lookback_days: 33,
        }
    }
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/banksync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("banksync")
            .join("config.yaml")
    }
}
