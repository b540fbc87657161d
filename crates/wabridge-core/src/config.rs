//! Configuration system for wabridge.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $WABRIDGE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/wabridge/config.toml
//!   3. ~/.config/wabridge/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WabridgeConfig {
    pub network: NetworkConfig,
    pub bridge: BridgeConfig,
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the HTTP API binds to.
    pub bind_addr: String,
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket base URL of the protocol sidecar.
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// One subdirectory per owner holds its auth state.
    pub auth_dir: PathBuf,
    /// Session metadata records. Empty = in-memory only.
    pub meta_path: PathBuf,
    /// How long a QR code stays valid after it was issued.
    pub qr_ttl_secs: u64,
    /// Deadline for every call into the socket library.
    pub operation_timeout_secs: u64,
    /// How long POST /initialize waits for the first QR or connection.
    pub initial_qr_wait_ms: u64,
    /// Re-initialize owners with persisted auth state at startup.
    pub restore_on_startup: bool,
    /// Failed/closed sessions are dropped from the registry after this long.
    pub terminal_retention_secs: u64,
    pub reconnect: ReconnectConfig,
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Transient disconnects retried at most this many times in a row.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Random extra delay added to each retry. 0 = none.
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Per-owner channel depth before slow subscribers start lagging.
    pub channel_capacity: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            api_port: 9210,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9220".to_string(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            auth_dir: data_dir().join("auth"),
            meta_path: data_dir().join("sessions.json"),
            qr_ttl_secs: 60,
            operation_timeout_secs: 30,
            initial_qr_wait_ms: 3_000,
            restore_on_startup: true,
            terminal_retention_secs: 3_600,
            reconnect: ReconnectConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            jitter_ms: 500,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("wabridge")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("wabridge")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl WabridgeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            WabridgeConfig::default()
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("WABRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&WabridgeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply WABRIDGE_* overrides. `lookup` abstracts the environment so
    /// tests don't have to mutate the process env.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WABRIDGE_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(p) = lookup("WABRIDGE_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(v) = lookup("WABRIDGE_BRIDGE__URL") {
            self.bridge.url = v;
        }
        if let Some(v) = lookup("WABRIDGE_SESSIONS__AUTH_DIR") {
            self.sessions.auth_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("WABRIDGE_SESSIONS__META_PATH") {
            self.sessions.meta_path = PathBuf::from(v);
        }
        if let Some(n) = lookup("WABRIDGE_SESSIONS__QR_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.sessions.qr_ttl_secs = n;
        }
        if let Some(n) =
            lookup("WABRIDGE_SESSIONS__OPERATION_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.sessions.operation_timeout_secs = n;
        }
        if let Some(v) = lookup("WABRIDGE_SESSIONS__RESTORE_ON_STARTUP") {
            self.sessions.restore_on_startup = v == "true" || v == "1";
        }
        if let Some(n) = parsed(&lookup, "WABRIDGE_SESSIONS__INITIAL_QR_WAIT_MS") {
            self.sessions.initial_qr_wait_ms = n;
        }
        if let Some(n) = parsed(&lookup, "WABRIDGE_SESSIONS__TERMINAL_RETENTION_SECS") {
            self.sessions.terminal_retention_secs = n;
        }

        let reconnect = &mut self.sessions.reconnect;
        if let Some(n) = parsed(&lookup, "WABRIDGE_SESSIONS__RECONNECT__MAX_RETRIES") {
            reconnect.max_retries = n;
        }
        if let Some(n) = parsed(&lookup, "WABRIDGE_SESSIONS__RECONNECT__BASE_DELAY_MS") {
            reconnect.base_delay_ms = n;
        }
        if let Some(n) = parsed(&lookup, "WABRIDGE_SESSIONS__RECONNECT__MAX_DELAY_MS") {
            reconnect.max_delay_ms = n;
        }
        if let Some(n) = parsed(&lookup, "WABRIDGE_SESSIONS__RECONNECT__JITTER_MS") {
            reconnect.jitter_ms = n;
        }

        if let Some(n) = parsed(&lookup, "WABRIDGE_SESSIONS__BROADCAST__CHANNEL_CAPACITY") {
            self.sessions.broadcast.channel_capacity = n;
        }
    }
}

/// Parsed env value; unparsable values are ignored.
fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    lookup(name).and_then(|v| v.parse().ok())
}
