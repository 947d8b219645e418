//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MILLBOOK_DEVICE_ID=abc-123                                         │
//! │     MILLBOOK_BATCH_SIZE=25                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/millbook/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/com.millbook.app/sync.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-generated device_id, batch_size 50                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Mill Office"
//!
//! [sync]
//! batch_size = 50
//! poll_interval_secs = 60
//! purge_synced_after_days = 7
//! pull_enabled = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncServiceResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Mill Office", "Gate Register").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "MillBook Device".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Maximum queue records drained per sync pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Interval between background sync passes (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Age at which Synced queue rows are purged (days).
    #[serde(default = "default_purge_days")]
    pub purge_synced_after_days: u32,

    /// Whether background passes also pull remote-side changes.
    #[serde(default = "default_true")]
    pub pull_enabled: bool,
}

fn default_batch_size() -> usize {
    50
}
fn default_poll_interval() -> u64 {
    60
}
fn default_purge_days() -> u32 {
    7
}
fn default_true() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval(),
            purge_synced_after_days: default_purge_days(),
            pull_enabled: default_true(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Sync behavior settings.
    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncServiceResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncServiceResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncServiceResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::InvalidConfig(
                "device id must not be empty".into(),
            ));
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("MILLBOOK_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("MILLBOOK_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(size) = std::env::var("MILLBOOK_BATCH_SIZE") {
            if let Ok(parsed) = size.parse::<usize>() {
                self.sync.batch_size = parsed;
            }
        }

        if let Ok(interval) = std::env::var("MILLBOOK_POLL_INTERVAL_SECS") {
            if let Ok(parsed) = interval.parse::<u64>() {
                self.sync.poll_interval_secs = parsed;
            }
        }

        if let Ok(enabled) = std::env::var("MILLBOOK_PULL_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.sync.pull_enabled = true,
                "0" | "false" | "no" => self.sync.pull_enabled = false,
                other => warn!(value = %other, "Unknown MILLBOOK_PULL_ENABLED value"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "millbook", "app")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }
}
