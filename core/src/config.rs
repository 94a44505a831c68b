use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::framing::DEFAULT_MAX_FRAME_BYTES;
use crate::timeout::Timeout;
use crate::{Result, ShuttleError};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1100;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 1000;
/// Prefix of generated gateway names.
pub const NAME_PREFIX: &str = "RustGW-";

const CONFIG_PATH_VAR: &str = "SHUTTLE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "shuttle.toml";

/// Connection settings for a [`Gateway`](crate::Gateway).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Agent name on the bus; generated when absent.
    pub name: Option<String>,
    /// Wait applied by directory queries when the caller gives none.
    pub default_timeout_ms: u64,
    /// How long the duplicate-name check may wait for the master.
    pub handshake_timeout_ms: u64,
    pub max_frame_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            name: None,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl GatewayConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Defaults overridden by `SHUTTLE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        if let Some(host) = var("SHUTTLE_HOST") {
            config.host = host;
        }
        if let Some(port) = var("SHUTTLE_PORT").and_then(|v| v.trim().parse().ok()) {
            config.port = port;
        }
        config.name = var("SHUTTLE_NAME");
        if let Some(ms) = var("SHUTTLE_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            config.default_timeout_ms = ms;
        }
        if let Some(ms) = var("SHUTTLE_HANDSHAKE_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            config.handshake_timeout_ms = ms;
        }
        config
    }

    /// Overlays the TOML document `s` onto `base`. Keys absent from the
    /// document keep their value from `base`.
    pub fn from_toml_str(s: &str, base: Self) -> Result<Self> {
        let overlay: GatewayToml =
            toml::from_str(s).map_err(|e| ShuttleError::ConfigError(e.to_string()))?;
        Ok(overlay.overlay(base))
    }

    /// Environment settings overlaid with the TOML file at `path`.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            ShuttleError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw, Self::from_env())
    }

    /// Loads from `SHUTTLE_CONFIG` (or `./shuttle.toml`) over the
    /// environment, falling back to the environment alone when the file is
    /// missing or invalid.
    pub fn load() -> Self {
        let base = Self::from_env();
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        if !Path::new(&path).exists() {
            tracing::info!(target = "shuttle", path = %path, "No TOML config found; using defaults/env");
            return base;
        }
        match fs::read_to_string(&path) {
            Ok(s) => match Self::from_toml_str(&s, base.clone()) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(target = "shuttle", error = %e, "Failed to parse TOML; using defaults/env");
                    base
                }
            },
            Err(e) => {
                tracing::warn!(target = "shuttle", error = %e, "Failed to read TOML; using defaults/env");
                base
            }
        }
    }

    /// Configured name, or a fresh `RustGW-<uuid>`.
    pub fn agent_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{NAME_PREFIX}{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn default_timeout(&self) -> Timeout {
        Timeout::millis(self.default_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GatewayToml {
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
    default_timeout_ms: Option<u64>,
    handshake_timeout_ms: Option<u64>,
    max_frame_bytes: Option<usize>,
}

impl GatewayToml {
    fn overlay(self, mut base: GatewayConfig) -> GatewayConfig {
        if let Some(v) = self.host {
            base.host = v;
        }
        if let Some(v) = self.port {
            base.port = v;
        }
        if let Some(v) = self.name {
            base.name = Some(v);
        }
        if let Some(v) = self.default_timeout_ms {
            base.default_timeout_ms = v;
        }
        if let Some(v) = self.handshake_timeout_ms {
            base.handshake_timeout_ms = v;
        }
        if let Some(v) = self.max_frame_bytes {
            base.max_frame_bytes = v;
        }
        base
    }
}
