//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - built-in defaults
//! - a TOML file (`PARLEY_CONFIG`, or the first of `parley.toml`,
//!   `/etc/parley/parley.toml`, `~/.config/parley/parley.toml`)
//! - environment variables (`PARLEY__PORT`, `PARLEY__TYPING__STALENESS_MS`, ...)

use anyhow::{Context, Result};
use parley_core::HubConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "PARLEY_CONFIG";

const CONFIG_PATHS: [&str; 3] = [
    "parley.toml",
    "/etc/parley/parley.toml",
    "~/.config/parley/parley.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportConfig,

    /// Queue sizes.
    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub typing: TypingConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Users loaded into the in-memory store at startup.
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Frames buffered per connection before fan-out drops.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Chat messages buffered ahead of the router.
    #[serde(default = "default_chat_queue_capacity")]
    pub chat_queue_capacity: usize,
}

/// Typing indicator sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Idle time after which an indicator expires.
    #[serde(default = "default_staleness")]
    pub staleness_ms: u64,
}

/// Where the upstream session layer puts the authenticated identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedUser {
    pub identity: String,
    pub nickname: String,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    parley_protocol::MAX_FRAME_SIZE
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_chat_queue_capacity() -> usize {
    1024
}

fn default_sweep_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_staleness() -> u64 {
    15_000 // 15 seconds
}

fn default_identity_header() -> String {
    "x-parley-identity".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            typing: TypingConfig::default(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
            users: Vec::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            chat_queue_capacity: default_chat_queue_capacity(),
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
            staleness_ms: default_staleness(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_header: default_identity_header(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix("PARLEY")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    /// Load configuration from the first config file found, overlaid with
    /// `PARLEY__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(find_config_file);
        Self::build(path.as_deref(), environment())
    }

    fn build(path: Option<&Path>, env: ::config::Environment) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            tracing::info!("Loading config from {}", path.display());
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }

        builder
            .add_source(env)
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Engine settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_capacity: self.limits.outbound_queue_capacity,
            chat_queue_capacity: self.limits.chat_queue_capacity,
            typing_sweep_interval: Duration::from_millis(self.typing.sweep_interval_ms),
            typing_staleness: Duration::from_millis(self.typing.staleness_ms),
            max_frame_size: self.transport.max_message_size,
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    CONFIG_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}
