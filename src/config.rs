//! # Settings File
//!
//! Loads and writes the TOML settings file that drives the bridge. The file is
//! split into four sections so each collaborator only reads what it owns:
//!
//! ```text
//! bridge.toml
//! ├── [broker]       - connection identity, topics, publish options
//! ├── [control]      - control mode and its defaults
//! ├── [diagnostics]  - console / network diagnostics delivery
//! └── [transport]    - keep-alive, reconnect period, queue capacity
//! ```
//!
//! Every section carries `#[serde(default)]`, so a partial file still loads
//! and missing keys fall back to the defaults below.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::bridge::staging::ControlMode;
use crate::mqtt::config::Scheme;

const CONFIG_DIR: &str = "control-bridge";
const CONFIG_FILE: &str = "bridge.toml";

/// Complete settings file
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub control: ControlSettings,
    pub diagnostics: DiagnosticsSettings,
    pub transport: TransportSettings,
}

/// Broker connection and topic settings as written by the user.
///
/// These are raw values; [`crate::mqtt::config::ConnectionConfig::from_settings`]
/// normalizes them into a connection configuration.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerSettings {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Websocket path, `/` is prepended when missing
    pub path: String,
    pub subscribe_topic: String,
    pub publish_topic: String,
    /// Optional path-query expression applied to JSON payloads
    pub transform: String,
    pub qos: u8,
    pub retain: bool,
    pub receive_only: bool,
    pub auth: Option<AuthSettings>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            scheme: Scheme::Ws,
            host: "localhost".to_string(),
            port: 9001,
            path: String::new(),
            subscribe_topic: "control-bridge/state".to_string(),
            publish_topic: "control-bridge/set".to_string(),
            transform: String::new(),
            qos: 0,
            retain: false,
            receive_only: false,
            auth: None,
        }
    }
}

/// Basic authentication credentials
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AuthSettings {
    pub username: String,
    pub password: String,
}

/// Control mode and the per-mode defaults used to seed the staged value
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ControlSettings {
    pub mode: ControlMode,
    /// Label shown next to the control
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    /// Slider seed; `min` is used when absent
    pub default_number: Option<f64>,
    /// Switch seed
    pub default_switch: bool,
    pub on_value: String,
    pub off_value: String,
    /// Fixed payload sent by the button
    pub button_payload: String,
    /// Let slider/switch staged values follow incoming messages
    pub live_follow: bool,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            mode: ControlMode::Text,
            label: "Send".to_string(),
            min: 0.0,
            max: 100.0,
            step: 1.0,
            default_number: None,
            default_switch: false,
            on_value: "true".to_string(),
            off_value: "false".to_string(),
            button_payload: String::new(),
            live_follow: false,
        }
    }
}

/// Diagnostics delivery settings
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsSettings {
    /// Emit diagnostics through the log
    pub console: bool,
    /// HTTP endpoint receiving `{ timestamp, kind, payload }` POSTs
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            console: true,
            endpoint: None,
            timeout_ms: 2000,
        }
    }
}

/// Tuning knobs handed to the transport
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct TransportSettings {
    pub keep_alive_secs: u64,
    /// Delay before the transport retries after an error
    pub reconnect_period_ms: u64,
    /// Capacity of the transport event queue
    pub event_capacity: usize,
    pub client_id_prefix: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            keep_alive_secs: 30,
            reconnect_period_ms: 1000,
            event_capacity: 100,
            client_id_prefix: "control-bridge".to_string(),
        }
    }
}

impl Settings {
    /// Default settings location: `<config dir>/control-bridge/bridge.toml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Reads and parses a settings file
    pub async fn load(path: &Path) -> Result<Self> {
        debug!("Loading settings from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read settings file {}: {}", path.display(), e))?;
        let settings: Settings = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse settings file {}: {}", path.display(), e))?;
        Ok(settings)
    }

    /// Serializes and writes the settings, creating parent directories
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| eyre!("Failed to create settings directory: {}", e))?;
            }
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize settings: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write settings file {}: {}", path.display(), e))?;
        Ok(())
    }

    /// Writes a default settings file if none exists yet
    pub async fn ensure_default(path: &Path) -> Result<()> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if settings file exists: {}", e))?
        {
            info!("Creating default settings at {}", path.display());
            Settings::default().save(path).await?;
        }
        Ok(())
    }
}
