//! Centralized logging initialization with environment variable support

use crate::config::{LogFormat, LoggingConfig};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use warden_foundation::WardenResult;

/// File name of the gateway's own log inside the log directory
pub const GATEWAY_LOG_FILE: &str = "warden.log";

/// Initialize the tracing subscriber
///
/// Environment variables (in priority order):
/// - `RUST_LOG`: Standard Rust log filter (takes precedence over all)
/// - `LOG_LEVEL`: Set log level (trace, debug, info, warn, error)
/// - `LOG_FORMAT`: Override format (json, pretty)
///
/// Console output always goes to stderr: stdout carries the upstream JSON-RPC
/// stream. When `log_file` is given, JSON lines are also appended to it.
///
/// ```bash
/// # Module-specific filtering
/// RUST_LOG=warden_proxy=debug,warden_transport=info warden start
/// ```
pub fn initialize(config: &LoggingConfig, log_file: Option<&Path>) -> WardenResult<()> {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| config.level.clone());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));

    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|f| parse_format(&f))
        .unwrap_or_else(|| config.format.clone());

    let console = match format {
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_writer(std::io::stderr).boxed(),
    };

    let file_layer = match log_file {
        Some(path) => Some(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Mutex::new(open_append(path)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file_layer)
        .init();
    Ok(())
}

fn parse_format(value: &str) -> Option<LogFormat> {
    match value.to_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" | "human" => Some(LogFormat::Pretty),
        _ => None,
    }
}

/// Open a file for appending, creating it and its parent directory as needed
pub fn open_append(path: &Path) -> WardenResult<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
