//! Process settings for the gateway.
//!
//! Everything except the listener section is fixed for the life of the
//! process and read from the environment. The listener section is
//! reconfigurable and lives in a JSON file that is re-read on `SIGHUP`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use domino_lifecycle::ConfigValue;
use serde_json::json;

use crate::recovery::RestartBackoff;

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address of the upstream the gateway keeps a connection to.
    pub upstream_addr: SocketAddr,

    /// How long a single upstream connect attempt may take.
    pub connect_timeout: Duration,

    /// Interval between heartbeat log lines.
    pub heartbeat_interval: Duration,

    /// Delays between restarts of a failed gateway.
    pub restart_backoff: RestartBackoff,

    /// JSON file holding the listener section.
    pub listener_config_path: Option<PathBuf>,

    /// Bind address used when no listener file is configured.
    pub default_listen_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Settings {
    /// Load settings from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let upstream_addr = parse_var(&lookup, "DOMINO_UPSTREAM_ADDR", "127.0.0.1:5432")?;
        let connect_timeout_ms: u64 = parse_var(&lookup, "DOMINO_CONNECT_TIMEOUT_MS", "2000")?;
        let heartbeat_interval_secs: u64 = parse_var(&lookup, "DOMINO_HEARTBEAT_INTERVAL", "10")?;
        let default_listen_addr = parse_var(&lookup, "DOMINO_LISTEN_ADDR", "127.0.0.1:8080")?;
        let backoff_ms: u64 = parse_var(&lookup, "DOMINO_RESTART_BACKOFF_MS", "500")?;
        let backoff_max_ms: u64 = parse_var(&lookup, "DOMINO_RESTART_BACKOFF_MAX_MS", "30000")?;

        if heartbeat_interval_secs == 0 {
            anyhow::bail!("DOMINO_HEARTBEAT_INTERVAL must be at least 1 second");
        }
        if backoff_ms == 0 || backoff_max_ms < backoff_ms {
            anyhow::bail!(
                "DOMINO_RESTART_BACKOFF_MS must be positive and at most DOMINO_RESTART_BACKOFF_MAX_MS"
            );
        }

        let listener_config_path = lookup("DOMINO_LISTENER_CONFIG").map(PathBuf::from);
        let log_level = lookup("DOMINO_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            upstream_addr,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            heartbeat_interval: Duration::from_secs(heartbeat_interval_secs),
            restart_backoff: RestartBackoff::new(
                Duration::from_millis(backoff_ms),
                Duration::from_millis(backoff_max_ms),
            ),
            listener_config_path,
            default_listen_addr,
            log_level,
        })
    }

    /// The current listener section.
    ///
    /// Read from the listener file when one is configured, otherwise a
    /// section bound to `default_listen_addr` with the default body.
    pub fn load_listener_section(&self) -> Result<ConfigValue> {
        match &self.listener_config_path {
            Some(path) => read_section(path),
            None => Ok(json!({ "bind_addr": self.default_listen_addr })),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.parse()
        .with_context(|| format!("invalid value for {key}: {raw:?}"))
}

fn read_section(path: &Path) -> Result<ConfigValue> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read listener config {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("listener config {} is not valid JSON", path.display()))
}
