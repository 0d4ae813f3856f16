// src/config.rs

//! Manages client configuration: loading from a TOML file and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;

/// Settings for the gateway connection itself.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GatewayConfig {
    /// The websocket endpoint, including the encoding, version and
    /// compression query parameters the server negotiates on.
    #[serde(default = "default_gateway_url")]
    pub url: String,
    /// The credential token sent in the identify handshake.
    #[serde(default)]
    pub token: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: String::new(),
        }
    }
}

/// Static client descriptors carried in the identify handshake.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IdentifyConfig {
    #[serde(default = "default_identify_os")]
    pub os: String,
    #[serde(default = "default_identify_browser")]
    pub browser: String,
    #[serde(default = "default_identify_device")]
    pub device: String,
    /// Capability bitfield advertised to the server.
    #[serde(default = "default_identify_capabilities")]
    pub capabilities: i64,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            os: default_identify_os(),
            browser: default_identify_browser(),
            device: default_identify_device(),
            capabilities: default_identify_capabilities(),
        }
    }
}

/// Settings for the oversized-payload archiver.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ArchiveConfig {
    /// Directory payload files are written into.
    #[serde(default = "default_archive_dir")]
    pub dir: String,
    /// Payloads whose JSON rendering exceeds this length are persisted.
    /// `0` archives every payload.
    #[serde(default = "default_archive_min_len")]
    pub min_len: usize,
    /// Maximum number of characters of a payload echoed into the log.
    #[serde(default = "default_archive_preview_len")]
    pub preview_len: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: default_archive_dir(),
            min_len: default_archive_min_len(),
            preview_len: default_archive_preview_len(),
        }
    }
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?encoding=etf&v=9&compress=zstd-stream".to_string()
}
fn default_identify_os() -> String {
    "Windows".to_string()
}
fn default_identify_browser() -> String {
    "Discord Client".to_string()
}
fn default_identify_device() -> String {
    "desktop".to_string()
}
fn default_identify_capabilities() -> i64 {
    8193
}
fn default_archive_dir() -> String {
    "logs".to_string()
}
fn default_archive_min_len() -> usize {
    300
}
fn default_archive_preview_len() -> usize {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}

/// The root configuration structure, loaded from a TOML file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Default log filter, overridable with `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub identify: IdentifyConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            gateway: GatewayConfig::default(),
            identify: IdentifyConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration from the given TOML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that serde defaults alone cannot enforce.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.token.trim().is_empty() {
            return Err(anyhow!("'gateway.token' must be set"));
        }
        if self.gateway.url.is_empty() {
            return Err(anyhow!("'gateway.url' must not be empty"));
        }
        Ok(())
    }

    /// The token with surrounding whitespace removed, as it is sent on the wire.
    pub fn token(&self) -> &str {
        self.gateway.token.trim()
    }
}
