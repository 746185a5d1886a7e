//! Courier configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CourierError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            rules: RulesConfig::default(),
            gateway: GatewayConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl CourierConfig {
    /// Load config from the default path (~/.courier/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CourierError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CourierError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CourierError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Courier home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".courier")
    }
}

/// Behavior-rule thresholds, in minutes elapsed since delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_unread_nudge")]
    pub unread_nudge_minutes: i64,
    #[serde(default = "default_no_reply_reminder")]
    pub no_reply_reminder_minutes: i64,
    #[serde(default = "default_auto_followup")]
    pub auto_followup_minutes: i64,
    /// Corrected handling for active-hours windows that span midnight
    /// (start > end). Off by default: the legacy check rejects every hour
    /// of such a window.
    #[serde(default)]
    pub wraparound_windows: bool,
}

fn default_unread_nudge() -> i64 { 5 }
fn default_no_reply_reminder() -> i64 { 10 }
fn default_auto_followup() -> i64 { 15 }

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            unread_nudge_minutes: default_unread_nudge(),
            no_reply_reminder_minutes: default_no_reply_reminder(),
            auto_followup_minutes: default_auto_followup(),
            wraparound_windows: false,
        }
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 7310 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. Empty = ~/.courier/courier.db.
    #[serde(default)]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: String::new() }
    }
}

impl StorageConfig {
    /// Resolve the effective database path.
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            CourierConfig::home_dir().join("courier.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}
