//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (CHATLINE_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind both listeners to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the HTTP API.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Port of the live-update line protocol.
    #[serde(default = "default_live_port")]
    pub live_port: u16,

    /// Delivery configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Rate limiting for the HTTP API.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Live delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// How long a client has to acknowledge a push, in milliseconds.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Maximum inbound line length in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// HTTP rate limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per client IP within the window.
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
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

// Default value functions
fn default_host() -> String {
    std::env::var("CHATLINE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn env_port(name: &str, fallback: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(fallback)
}

fn default_api_port() -> u16 {
    env_port("CHATLINE_API_PORT", 8080)
}

fn default_live_port() -> u16 {
    env_port("CHATLINE_LIVE_PORT", 9435)
}

fn default_true() -> bool {
    true
}

fn default_ack_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_max_line_length() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_requests() -> usize {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_port: default_api_port(),
            live_port: default_live_port(),
            delivery: DeliveryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
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

impl DeliveryConfig {
    /// The ack timeout as a duration.
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl RateLimitConfig {
    /// The window as a duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// `CHATLINE_CONFIG` names an explicit file; otherwise the default
    /// locations are searched in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("CHATLINE_CONFIG") {
            let expanded = shellexpand::tilde(&path);
            return Self::from_file(expanded.as_ref());
        }

        let config_paths = [
            "chatline.toml",
            "/etc/chatline/chatline.toml",
            "~/.config/chatline/chatline.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Address of the HTTP API listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid IP address.
    pub fn api_addr(&self) -> Result<SocketAddr> {
        self.addr(self.api_port)
    }

    /// Address of the live-update listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid IP address.
    pub fn live_addr(&self) -> Result<SocketAddr> {
        self.addr(self.live_port)
    }

    fn addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, port))
    }
}
