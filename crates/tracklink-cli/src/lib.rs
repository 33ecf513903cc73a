//! Shared plumbing for the `tracklink-converter` and `tracklink-simulator`
//! binaries: logging setup, JSON config loading and Ctrl-C handling.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracklink_network::ServerConfig;
use tracklink_translator::DEFAULT_TOPIC_PREFIX;

/// Config file read when none is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `-v`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Load a JSON config.
///
/// An explicit path must exist and parse. Without one, `config.json` in the
/// working directory is used if present; a broken default file is logged
/// and ignored.
pub fn load_config<T>(explicit: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if let Some(path) = explicit {
        let config = read_json(path)?;
        info!(path = %path.display(), "Loaded configuration");
        return Ok(config);
    }

    let path = PathBuf::from(DEFAULT_CONFIG_FILE);
    if !path.exists() {
        info!("Using default configuration");
        return Ok(T::default());
    }
    match read_json(&path) {
        Ok(config) => {
            info!(path = %path.display(), "Loaded configuration");
            Ok(config)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable configuration");
            Ok(T::default())
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// Token cancelled on the first Ctrl-C.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C, shutting down"),
        }
        trigger.cancel();
    });
    token
}

/// Converter settings as found in `config.json`.
///
/// Keys follow the converter's historical file format, so one file can
/// carry both converter and simulator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub jt808_host: String,
    pub jt808_port: u16,
    pub mqtt_topic_prefix: String,
    pub max_connections: usize,
    /// Seconds
    pub heartbeat_interval: u64,
    /// Seconds
    pub idle_timeout: u64,
    /// Seconds
    pub subpackage_timeout: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            jt808_host: server.bind_addr.ip().to_string(),
            jt808_port: server.bind_addr.port(),
            mqtt_topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            max_connections: server.max_connections,
            heartbeat_interval: server.heartbeat_period.as_secs(),
            idle_timeout: server.idle_timeout.as_secs(),
            subpackage_timeout: server.subpackage_timeout.as_secs(),
        }
    }
}

impl ConverterConfig {
    pub fn server_config(&self) -> Result<ServerConfig> {
        let ip: IpAddr = self
            .jt808_host
            .parse()
            .with_context(|| format!("invalid jt808_host {:?}", self.jt808_host))?;
        let config = ServerConfig {
            bind_addr: SocketAddr::new(ip, self.jt808_port),
            max_connections: self.max_connections,
            heartbeat_period: Duration::from_secs(self.heartbeat_interval),
            idle_timeout: Duration::from_secs(self.idle_timeout),
            subpackage_timeout: Duration::from_secs(self.subpackage_timeout),
            ..ServerConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
