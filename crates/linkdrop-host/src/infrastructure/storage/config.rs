//! TOML-based configuration persistence for the host application.
//!
//! Reads and writes `HostConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\LinkDrop\config.toml`
//! - Linux:    `~/.config/linkdrop/config.toml`
//! - macOS:    `~/Library/Application Support/LinkDrop/config.toml`
//!
//! Every field carries a `#[serde(default = "…")]`, so a first run with
//! no file at all and an upgrade from an older file missing newer fields
//! both produce a working configuration.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use linkdrop_core::{Platform, DISCOVERY_PORT};

use crate::infrastructure::network::discovery::{DiscoveryConfig, LocalIdentity};
use crate::infrastructure::network::manager::ManagerConfig;
use crate::infrastructure::transfer::TransferConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    pub host: HostSection,
    pub network: NetworkSection,
    pub transfer: TransferSection,
}

/// Identity and general behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSection {
    /// Stable device id announced over discovery. Generated on first run
    /// and kept thereafter so peers recognise this host across restarts.
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Human-readable name shown on peers.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Which side of the desktop↔mobile pair this process plays.
    #[serde(default = "default_platform")]
    pub platform: Platform,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Discovery and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// UDP port for LAN device discovery broadcasts.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_broadcast_interval_secs")]
    pub broadcast_interval_secs: u64,
    /// Subnet-directed broadcast address used when 255.255.255.255 is
    /// rejected by the network stack.
    #[serde(default = "default_fallback_broadcast")]
    pub fallback_broadcast: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Deadline for connect handshakes and health probes.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Base delay for the exponential reconnect backoff.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

/// File transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    /// Where partial and finished transfers land. Absent means the
    /// system temp directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_device_id() -> String {
    Uuid::new_v4().to_string()
}
fn default_device_name() -> String {
    "LinkDrop Host".to_string()
}
fn default_platform() -> Platform {
    Platform::Windows
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}
fn default_broadcast_interval_secs() -> u64 {
    5
}
fn default_fallback_broadcast() -> String {
    "192.168.1.255".to_string()
}
fn default_max_connections() -> usize {
    100
}
fn default_connection_timeout_ms() -> u64 {
    5_000
}
fn default_health_check_interval_ms() -> u64 {
    30_000
}
fn default_reconnect_backoff_ms() -> u64 {
    1_000
}
fn default_max_reconnect_attempts() -> u32 {
    30
}
fn default_chunk_size() -> u64 {
    64 * 1024
}
fn default_max_concurrent_transfers() -> usize {
    5
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: HostSection::default(),
            network: NetworkSection::default(),
            transfer: TransferSection::default(),
        }
    }
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            device_name: default_device_name(),
            platform: default_platform(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            broadcast_interval_secs: default_broadcast_interval_secs(),
            fallback_broadcast: default_fallback_broadcast(),
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrent_transfers: default_max_concurrent_transfers(),
            staging_dir: None,
        }
    }
}

// ── Service config derivation ─────────────────────────────────────────────────

/// Capability tags announced over discovery. Peers use these to decide
/// which features to offer against this host.
const DEFAULT_CAPABILITIES: [&str; 5] = [
    "file_transfer",
    "screen_mirror",
    "remote_control",
    "notification",
    "clipboard_sync",
];

impl HostConfig {
    /// Identity announced over discovery.
    pub fn local_identity(&self) -> LocalIdentity {
        LocalIdentity {
            device_id: self.host.device_id.clone(),
            device_name: self.host.device_name.clone(),
            platform: self.host.platform,
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.network.discovery_port,
            broadcast_interval: Duration::from_secs(self.network.broadcast_interval_secs),
            fallback_broadcast: self
                .network
                .fallback_broadcast
                .parse::<Ipv4Addr>()
                .unwrap_or(Ipv4Addr::new(192, 168, 1, 255)),
            ..DiscoveryConfig::default()
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_connections: self.network.max_connections,
            connection_timeout: Duration::from_millis(self.network.connection_timeout_ms),
            health_check_interval: Duration::from_millis(self.network.health_check_interval_ms),
            reconnect_backoff: Duration::from_millis(self.network.reconnect_backoff_ms),
            max_reconnect_attempts: self.network.max_reconnect_attempts,
        }
    }

    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            staging_dir: self
                .transfer
                .staging_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("linkdrop")),
            chunk_size: self.transfer.chunk_size,
            max_concurrent: self.transfer.max_concurrent_transfers,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config
/// base directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `HostConfig` from disk, returning `HostConfig::default()` if
/// the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<HostConfig, ConfigError> {
    let path = config_file_path()?;

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: HostConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to disk, creating the config directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &HostConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LinkDrop"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("linkdrop"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LinkDrop")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_config_default_has_expected_network_settings() {
        // Arrange / Act
        let cfg = HostConfig::default();

        // Assert
        assert_eq!(cfg.network.discovery_port, 8190);
        assert_eq!(cfg.network.broadcast_interval_secs, 5);
        assert_eq!(cfg.network.max_connections, 100);
        assert_eq!(cfg.network.max_reconnect_attempts, 30);
    }

    #[test]
    fn test_host_config_default_transfer_settings() {
        let cfg = HostConfig::default();
        assert_eq!(cfg.transfer.chunk_size, 65_536);
        assert_eq!(cfg.transfer.max_concurrent_transfers, 5);
        assert!(cfg.transfer.staging_dir.is_none());
    }

    #[test]
    fn test_default_device_id_is_a_uuid_and_unique_per_generation() {
        let a = default_device_id();
        let b = default_device_id();
        assert!(Uuid::parse_str(&a).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        // Arrange
        let mut cfg = HostConfig::default();
        cfg.network.discovery_port = 9000;
        cfg.host.device_name = "Office PC".to_string();

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: HostConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_deserialize_minimal_toml_uses_defaults() {
        // Arrange: minimal TOML with only required sections
        let toml_str = r#"
[host]
[network]
[transfer]
"#;

        // Act
        let cfg: HostConfig = toml::from_str(toml_str).expect("deserialize minimal");

        // Assert
        assert_eq!(cfg.network.discovery_port, 8190);
        assert_eq!(cfg.host.log_level, "info");
        assert_eq!(cfg.host.platform, Platform::Windows);
    }

    #[test]
    fn test_deserialize_partial_network_overrides_defaults() {
        let toml_str = r#"
[host]
[network]
discovery_port = 9999
[transfer]
"#;
        let cfg: HostConfig = toml::from_str(toml_str).expect("deserialize partial");
        assert_eq!(cfg.network.discovery_port, 9999);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.network.connection_timeout_ms, 5_000);
    }

    #[test]
    fn test_platform_field_uses_lowercase_names() {
        let toml_str = r#"
[host]
platform = "android"
[network]
[transfer]
"#;
        let cfg: HostConfig = toml::from_str(toml_str).expect("deserialize");
        assert_eq!(cfg.host.platform, Platform::Android);
    }

    #[test]
    fn test_derived_manager_config_converts_units() {
        let mut cfg = HostConfig::default();
        cfg.network.reconnect_backoff_ms = 2_500;

        let mc = cfg.manager_config();
        assert_eq!(mc.reconnect_backoff, Duration::from_millis(2_500));
        assert_eq!(mc.connection_timeout, Duration::from_secs(5));
        assert_eq!(mc.max_connections, 100);
    }

    #[test]
    fn test_derived_discovery_config_parses_fallback_address() {
        let mut cfg = HostConfig::default();
        cfg.network.fallback_broadcast = "10.0.0.255".to_string();
        assert_eq!(
            cfg.discovery_config().fallback_broadcast,
            Ipv4Addr::new(10, 0, 0, 255)
        );

        // Garbage falls back to the default subnet broadcast rather than
        // failing startup.
        cfg.network.fallback_broadcast = "not-an-ip".to_string();
        assert_eq!(
            cfg.discovery_config().fallback_broadcast,
            Ipv4Addr::new(192, 168, 1, 255)
        );
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let bad_toml = "[[[ not valid toml";
        let result: Result<HostConfig, toml::de::Error> = toml::from_str(bad_toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"));
        }
        // NoPlatformConfigDir in a stripped CI env is also acceptable.
    }
}
