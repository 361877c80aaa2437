//! Gateway settings
//!
//! These are the warden process's own knobs, separate from the two provider
//! documents. They are layered with figment:
//! 1. Environment variables (`WARDEN__*`, nested keys split on `__`)
//! 2. `<config root>/warden.toml`, when present
//! 3. Default values

use crate::documents::ConfigDir;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use warden_foundation::{WardenError, WardenResult};

/// Default period between reconciliation ticks
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
/// Default time limit for one request to a provider
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Default upper bound on undecoded bytes buffered per provider
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 10 * 1024 * 1024;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Log output format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format for development
    #[default]
    Pretty,
    /// Structured JSON format
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format of the stderr layer
    pub format: LogFormat,
    /// Also append JSON logs to `<config root>/logs/warden.log`
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: true,
        }
    }
}

/// Gateway settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Period between reconciliation ticks
    pub poll_interval_ms: u64,
    /// Time limit for catalog and invocation requests to a provider
    pub request_timeout_ms: u64,
    /// Time limit for the initialize exchange after a provider starts
    pub handshake_timeout_ms: u64,
    /// Undecoded bytes a provider may accumulate before its pending requests fail
    pub max_buffer_bytes: usize,
    /// Copy each provider's raw stdout into its log sink
    pub mirror_stdout: bool,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            mirror_stdout: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load settings for a config root, in priority order
    /// `WARDEN__*` env > `<root>/warden.toml` > defaults.
    pub fn load(config_dir: &ConfigDir) -> WardenResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        let settings_path = config_dir.settings_path();
        if settings_path.exists() {
            tracing::debug!(path = %settings_path.display(), "Loading gateway settings");
            figment = figment.merge(Toml::file(&settings_path));
        }

        Self::extract(figment.merge(Env::prefixed("WARDEN__").split("__")))
    }

    fn extract(figment: Figment) -> WardenResult<Self> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| WardenError::config(format!("Failed to load settings: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the settings
    pub fn validate(&self) -> WardenResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(WardenError::config("poll_interval_ms cannot be 0"));
        }
        if self.request_timeout_ms == 0 {
            return Err(WardenError::config("request_timeout_ms cannot be 0"));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(WardenError::config("handshake_timeout_ms cannot be 0"));
        }
        if self.max_buffer_bytes == 0 {
            return Err(WardenError::config("max_buffer_bytes cannot be 0"));
        }
        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(WardenError::config(format!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
