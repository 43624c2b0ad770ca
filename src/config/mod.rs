//! # Configuration Management Module
//!
//! TOML configuration for the panel link, frame markers, storage and logging,
//! plus [`ConfigService`], a watch-channel holder that lets a running poller
//! pick up a new controller address without restarting.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use firewatch::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("Panel: {}", config.panel.base_url());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [panel]
//! ip_address = "192.168.43.246"
//! port = 80
//! timeout_ms = 5000
//! monitoring_interval_ms = 30000
//! baud_rate = 38400
//!
//! [frame]
//! start_marker = "<STX>"
//! end_marker = "<ETX>"
//!
//! [storage]
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every section and field has a default, so a partial file is fine.

use anyhow::{anyhow, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;
use tokio::sync::watch;

use crate::protocol::FrameMarkers;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub frame: FrameConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub monitor: MonitorSection,
}

/// Connection settings for the panel controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub ip_address: String,
    pub port: u16,
    pub timeout_ms: u64,
    /// Poll period of the HTTP frame source.
    pub monitoring_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_port: Option<String>,
    pub baud_rate: u32,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            ip_address: "192.168.43.246".to_string(),
            port: 80,
            timeout_ms: 5000,
            monitoring_interval_ms: 30000,
            serial_port: None,
            baud_rate: 38400,
        }
    }
}

impl PanelConfig {
    pub fn base_url(&self) -> String {
        if self.port == 80 {
            format!("http://{}", self.ip_address)
        } else {
            format!("http://{}:{}", self.ip_address, self.port)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.monitoring_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_ipv4(&self.ip_address) {
            return Err(anyhow!("Invalid IP address format: {}", self.ip_address));
        }
        if self.port == 0 {
            return Err(anyhow!("Panel port must be non-zero"));
        }
        if self.timeout_ms == 0 {
            return Err(anyhow!("Panel timeout must be non-zero"));
        }
        if self.monitoring_interval_ms < 1000 {
            return Err(anyhow!(
                "Monitoring interval {}ms is below the 1000ms minimum",
                self.monitoring_interval_ms
            ));
        }
        Ok(())
    }
}

/// Dotted quad with 1-3 digits per octet, each 0..=255.
pub fn is_valid_ipv4(ip: &str) -> bool {
    let parts: Vec<&str> = ip.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|p| {
            (1..=3).contains(&p.len())
                && p.bytes().all(|b| b.is_ascii_digit())
                && p.parse::<u16>().map_or(false, |n| n <= 255)
        })
}

/// Wire marker tokens; see [`FrameMarkers`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub start_marker: String,
    pub end_marker: String,
    pub noise_chars: Vec<char>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        let m = FrameMarkers::default();
        Self {
            start_marker: m.start,
            end_marker: m.end,
            noise_chars: m.noise,
        }
    }
}

impl FrameConfig {
    pub fn to_markers(&self) -> FrameMarkers {
        FrameMarkers {
            start: self.start_marker.clone(),
            end: self.end_marker.clone(),
            noise: self.noise_chars.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_marker.is_empty() {
            return Err(anyhow!("Frame start marker must not be empty"));
        }
        if self.start_marker == self.end_marker {
            return Err(anyhow!("Frame start and end markers must differ"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    /// Period of the monitor's stats log line; 0 disables it.
    pub stats_interval_ms: u64,
    /// Also write change events to the `log` output.
    pub log_events: bool,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            stats_interval_ms: 60000,
            log_events: true,
        }
    }
}

impl MonitorSection {
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_ms > 0).then(|| Duration::from_millis(self.stats_interval_ms))
    }
}

impl Config {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.panel.validate()?;
        self.frame.validate()?;
        Ok(())
    }
}

/// Current configuration plus change notification.
///
/// Consumers hold a [`watch::Receiver`] from [`ConfigService::subscribe`]
/// and react to `changed()`; nothing reads configuration from globals.
pub struct ConfigService {
    tx: watch::Sender<Config>,
}

impl ConfigService {
    pub fn new(config: Config) -> Self {
        let (tx, _rx) = watch::channel(config);
        Self { tx }
    }

    pub fn current(&self) -> Config {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.tx.subscribe()
    }

    /// Apply `f` to a copy of the current config; the result is validated
    /// before any subscriber sees it.
    pub fn update<F: FnOnce(&mut Config)>(&self, f: F) -> Result<Config> {
        let mut next = self.current();
        f(&mut next);
        next.validate()?;
        self.tx.send_replace(next.clone());
        info!("Configuration updated (panel {})", next.panel.base_url());
        Ok(next)
    }

    pub fn set_ip_address(&self, ip: &str) -> Result<Config> {
        if !is_valid_ipv4(ip) {
            return Err(anyhow!("Invalid IP address format: {}", ip));
        }
        self.update(|c| c.panel.ip_address = ip.to_string())
    }

    pub fn reset_to_defaults(&self) -> Config {
        let defaults = Config::default();
        self.tx.send_replace(defaults.clone());
        defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_validation() {
        assert!(is_valid_ipv4("192.168.43.246"));
        assert!(is_valid_ipv4("0.0.0.0"));
        assert!(!is_valid_ipv4("256.1.1.1"));
        assert!(!is_valid_ipv4("1.2.3"));
        assert!(!is_valid_ipv4("1.2.3.4.5"));
        assert!(!is_valid_ipv4("a.b.c.d"));
        assert!(!is_valid_ipv4("1.2.3.0004"));
        assert!(!is_valid_ipv4("1..3.4"));
    }

    #[test]
    fn base_url_omits_default_port() {
        let mut panel = PanelConfig::default();
        assert_eq!(panel.base_url(), "http://192.168.43.246");
        panel.port = 8080;
        assert_eq!(panel.base_url(), "http://192.168.43.246:8080");
    }

    #[test]
    fn partial_file_uses_defaults() {
        let cfg: Config = toml::from_str("[panel]\nip_address = \"10.0.0.5\"\n").unwrap();
        assert_eq!(cfg.panel.ip_address, "10.0.0.5");
        assert_eq!(cfg.panel.baud_rate, 38400);
        assert_eq!(cfg.frame.to_markers(), FrameMarkers::default());
        assert_eq!(cfg.storage.data_dir, "./data");
    }

    #[test]
    fn default_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, Config::default());
    }

    #[tokio::test]
    async fn load_rejects_bad_address() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[panel]\nip_address = \"300.1.1.1\"\n").unwrap();
        let err = Config::load(path.to_str().unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid IP address"));
    }

    #[tokio::test]
    async fn create_default_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let cfg = Config::load(path).await.unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[tokio::test]
    async fn service_notifies_subscribers() {
        let svc = ConfigService::new(Config::default());
        let mut rx = svc.subscribe();
        svc.set_ip_address("10.1.2.3").unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().panel.ip_address, "10.1.2.3");

        assert!(svc.set_ip_address("10.1.2").is_err());
        assert!(svc.update(|c| c.panel.timeout_ms = 0).is_err());
        assert_eq!(svc.current().panel.ip_address, "10.1.2.3");

        svc.reset_to_defaults();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().panel, PanelConfig::default());
    }
}
