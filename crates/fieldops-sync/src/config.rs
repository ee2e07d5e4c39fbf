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
//! │     FIELDOPS_REMOTE_URL=https://api.example.org/rest/v1                │
//! │     FIELDOPS_DEVICE_ID=abc-123                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/fieldops/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/org.fieldops.agent/sync.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-generated device_id, no remote                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Truck 4 tablet"
//!
//! [remote]
//! url = "https://api.example.org/rest/v1"
//! api_key = "..."
//!
//! [sync]
//! max_attempts = 10
//! item_timeout_secs = 15
//! poll_interval_secs = 30
//!
//! [connectivity]
//! probe_interval_secs = 15
//!
//! [storage]
//! db_path = "/var/lib/fieldops/fieldops.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Warehouse 2 scanner").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Field Device".to_string()
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
// Remote Store Settings
// =============================================================================

/// Where queued writes go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the remote REST store, e.g. `https://host/rest/v1`.
    /// `None` keeps every write queued.
    #[serde(default)]
    pub url: Option<String>,

    /// API key sent as `apikey` and as a bearer token.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Column the remote store addresses records by.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    /// HTTP connect timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_primary_key() -> String {
    fieldops_core::PRIMARY_KEY_FIELD.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            url: None,
            api_key: None,
            primary_key: default_primary_key(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Drain and retry behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Rejections before an operation is dead-lettered.
    /// Set to 0 to retry forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Upper bound on a single remote write (seconds).
    #[serde(default = "default_item_timeout")]
    pub item_timeout_secs: u64,

    /// Interval between poll-triggered drains while online with pending
    /// work (seconds). Set to 0 to disable polling.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// First retry delay after a pass that left failures (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Longest retry delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_max_attempts() -> u32 {
    10
}
fn default_item_timeout() -> u64 {
    15
}
fn default_poll_interval() -> u64 {
    30
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            max_attempts: default_max_attempts(),
            item_timeout_secs: default_item_timeout(),
            poll_interval_secs: default_poll_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl SyncSettings {
    /// Per-item timeout as a Duration.
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    /// Poll interval, or `None` when polling is disabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }

    /// Initial retry delay.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Maximum retry delay.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

// =============================================================================
// Connectivity Settings
// =============================================================================

/// Reachability probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    /// Run the TCP reachability probe.
    #[serde(default = "default_true")]
    pub probe_enabled: bool,

    /// `host:port` to probe. Derived from the remote URL when unset.
    #[serde(default)]
    pub probe_addr: Option<String>,

    /// Seconds between probes.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Seconds before a probe counts as failed.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_probe_interval() -> u64 {
    15
}
fn default_probe_timeout() -> u64 {
    3
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        ConnectivitySettings {
            probe_enabled: true,
            probe_addr: None,
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl ConnectivitySettings {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Where the queue database lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Path of the SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
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

    /// Remote store settings.
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Drain and retry settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Reachability probe settings.
    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    /// Local storage settings.
    #[serde(default)]
    pub storage: StorageSettings,
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
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
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
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
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
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        if let Some(ref raw) = self.remote.url {
            let url = Url::parse(raw)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SyncError::InvalidUrl(format!(
                    "Remote URL must start with http:// or https://, got: {}",
                    raw
                )));
            }
        }

        if self.remote.primary_key.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "remote.primary_key must not be empty".into(),
            ));
        }

        if self.sync.item_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "item_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sync.initial_backoff_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "initial_backoff_ms must be greater than 0".into(),
            ));
        }

        if self.sync.max_backoff() < self.sync.initial_backoff() {
            return Err(SyncError::InvalidConfig(format!(
                "max_backoff_secs ({}s) must not be below initial_backoff_ms ({}ms)",
                self.sync.max_backoff_secs, self.sync.initial_backoff_ms
            )));
        }

        if self.connectivity.probe_interval_secs == 0 || self.connectivity.probe_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe interval and timeout must be greater than 0".into(),
            ));
        }

        if let Some(ref addr) = self.connectivity.probe_addr {
            if !addr.contains(':') {
                return Err(SyncError::InvalidUrl(format!(
                    "probe_addr must be host:port, got: {}",
                    addr
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("FIELDOPS_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("FIELDOPS_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(url) = std::env::var("FIELDOPS_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.url = Some(url);
        }

        if let Ok(key) = std::env::var("FIELDOPS_API_KEY") {
            self.remote.api_key = Some(key);
        }

        if let Ok(path) = std::env::var("FIELDOPS_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.db_path = Some(PathBuf::from(path));
        }

        if let Ok(value) = std::env::var("FIELDOPS_MAX_ATTEMPTS") {
            match value.parse::<u32>() {
                Ok(n) => self.sync.max_attempts = n,
                Err(_) => warn!(value = %value, "Ignoring invalid FIELDOPS_MAX_ATTEMPTS"),
            }
        }

        if let Ok(value) = std::env::var("FIELDOPS_POLL_INTERVAL_SECS") {
            match value.parse::<u64>() {
                Ok(n) => self.sync.poll_interval_secs = n,
                Err(_) => warn!(value = %value, "Ignoring invalid FIELDOPS_POLL_INTERVAL_SECS"),
            }
        }

        if let Ok(addr) = std::env::var("FIELDOPS_PROBE_ADDR") {
            self.connectivity.probe_addr = Some(addr);
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the remote URL if configured.
    pub fn remote_url(&self) -> Option<&str> {
        self.remote.url.as_deref()
    }

    /// Returns the queue database path.
    ///
    /// `storage.db_path` if set, otherwise `<data dir>/fieldops.db`, falling
    /// back to the working directory when no home directory is known.
    pub fn database_path(&self) -> PathBuf {
        if let Some(ref path) = self.storage.db_path {
            return path.clone();
        }

        project_dirs()
            .map(|dirs| dirs.data_dir().join("fieldops.db"))
            .unwrap_or_else(|| PathBuf::from("fieldops.db"))
    }

    /// Returns the `host:port` the reachability probe should dial.
    ///
    /// `connectivity.probe_addr` wins; otherwise derived from the remote URL.
    pub fn probe_address(&self) -> Option<String> {
        if let Some(ref addr) = self.connectivity.probe_addr {
            return Some(addr.clone());
        }

        let url = Url::parse(self.remote.url.as_deref()?).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(format!("{}:{}", host, port))
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "fieldops", "agent")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.device.id.is_empty());
        assert_eq!(config.sync.max_attempts, 10);
        assert_eq!(config.sync.item_timeout_secs, 15);
        assert_eq!(config.sync.poll_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.remote.primary_key, "id");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.device.id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::MissingDeviceId)));

        config.device.id = "tablet-1".to_string();
        config.remote.url = Some("ftp://example.org".to_string());
        assert!(config.validate().unwrap_err().is_config_error());

        config.remote.url = Some("not a url".to_string());
        assert!(config.validate().is_err());

        config.remote.url = Some("https://example.org/rest/v1".to_string());
        assert!(config.validate().is_ok());

        config.sync.item_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_validation() {
        let mut config = SyncConfig::default();
        assert!(config.validate().is_ok());

        config.sync.initial_backoff_ms = 0;
        assert!(config.validate().unwrap_err().is_config_error());

        config.sync.initial_backoff_ms = 5_000;
        config.sync.max_backoff_secs = 2;
        assert!(config.validate().unwrap_err().is_config_error());

        config.sync.max_backoff_secs = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_probe_address_derivation() {
        let mut config = SyncConfig::default();
        assert_eq!(config.probe_address(), None);

        config.remote.url = Some("https://example.org/rest/v1".to_string());
        assert_eq!(config.probe_address().as_deref(), Some("example.org:443"));

        config.remote.url = Some("http://10.0.0.5:3000".to_string());
        assert_eq!(config.probe_address().as_deref(), Some("10.0.0.5:3000"));

        config.connectivity.probe_addr = Some("1.1.1.1:53".to_string());
        assert_eq!(config.probe_address().as_deref(), Some("1.1.1.1:53"));
    }

    #[test]
    fn test_poll_interval_zero_disables() {
        let settings = SyncSettings {
            poll_interval_secs: 0,
            ..SyncSettings::default()
        };
        assert_eq!(settings.poll_interval(), None);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [device]
            id = "tablet-7"

            [sync]
            max_attempts = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.device.id, "tablet-7");
        assert_eq!(config.device.name, "Field Device");
        assert_eq!(config.sync.max_attempts, 0);
        assert_eq!(config.sync.item_timeout_secs, 15);
        assert!(config.connectivity.probe_enabled);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");

        let mut config = SyncConfig::default();
        config.remote.url = Some("https://example.org/rest/v1".to_string());
        config.storage.db_path = Some(dir.path().join("queue.db"));
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[device]"));
        assert!(contents.contains("[remote]"));

        let loaded: SyncConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.device.id, config.device.id);
        assert_eq!(loaded.database_path(), dir.path().join("queue.db"));
    }
}
