//! Application configuration
//!
//! Stored as TOML in the platform configuration directory. Passwords are
//! never persisted; the host supplies them at connect time.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::AccountType;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub control: ControlConfig,
    pub media: MediaConfig,
    pub audio: AudioConfig,
}

/// Control channel settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Device host name or address
    pub host: String,
    pub port: u16,
    /// Run the `##CN` / `##ID` handshake after connecting
    pub login: bool,
    pub account_type: AccountType,
    pub account: String,
    pub connect_timeout_ms: u64,
    pub auth_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: DEFAULT_CONTROL_PORT,
            login: true,
            account_type: AccountType::Administrator,
            account: String::new(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            auth_timeout_ms: DEFAULT_AUTH_TIMEOUT_MS,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
        }
    }
}

impl ControlConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

/// Media channel settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediaConfig {
    /// Local UDP port, also the device's media port
    pub port: u16,
    pub bind_address: IpAddr,
    /// Payload type stamped on outbound datagrams
    pub payload_type: u8,
    /// Stream identifier of outbound datagrams
    pub ssrc: u32,
    /// Outbound queue depth in 20 ms frames
    pub tx_queue_frames: usize,
    /// Silent frames synthesized per gap at most
    pub max_concealed_packets: usize,
    /// Playout and capture ring length
    pub ring_seconds: u32,
    /// Send a zero-payload datagram right after binding
    pub send_probe: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_MEDIA_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            payload_type: 96,
            ssrc: 0x0000_0001,
            tx_queue_frames: DEFAULT_TX_QUEUE_FRAMES,
            max_concealed_packets: DEFAULT_MAX_CONCEALED_PACKETS,
            ring_seconds: DEFAULT_RING_SECONDS,
            send_probe: true,
        }
    }
}

impl MediaConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Audio device selection for the bundled binary
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name, `None` for the system default
    pub playout_device: Option<String>,
    /// Input device name, `None` for the system default
    pub capture_device: Option<String>,
}

impl AppConfig {
    const FILE_NAME: &'static str = "config.toml";

    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rig-remote").map(|dirs| dirs.config_dir().join(Self::FILE_NAME))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.control.port, 60000);
        assert_eq!(config.media.port, 60001);
        assert_eq!(config.control.keepalive_interval(), Duration::from_secs(5));
        assert!(config.control.keepalive_interval_ms * 2 < 10_000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [control]
            host = "10.0.0.5"
            account_type = "user"

            [media]
            tx_queue_frames = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.control.host, "10.0.0.5");
        assert_eq!(config.control.account_type, AccountType::User);
        assert_eq!(config.control.auth_timeout_ms, DEFAULT_AUTH_TIMEOUT_MS);
        assert_eq!(config.media.tx_queue_frames, 3);
        assert_eq!(config.media.max_concealed_packets, 10);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("rig-remote-test-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut config = AppConfig::default();
        config.control.account = "operator".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("rig-remote-does-not-exist/config.toml");
        assert_eq!(AppConfig::load_or_default(&path).unwrap(), AppConfig::default());
    }
}
