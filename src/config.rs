//! Configuration module for the SSL-VPN client
//!
//! TOML-based configuration parsing and validation. Every section except
//! `[server]` and `[auth]` falls back to defaults when omitted.

use crate::error::{Result, VpnError};
use crate::protocol::constants::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Server configuration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Gateway hostname or IP address
    pub hostname: String,
    /// Gateway port (usually 443)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Skip certificate validation. Insecure; only for lab gateways.
    #[serde(default)]
    pub ignore_cert_errors: bool,
    /// Extra PEM bundle trusted in addition to the webpki roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    /// Per-attempt connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u32,
}

/// Authentication configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Username sent in the auth frame
    pub username: String,
    /// Password; prompted for when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Reconnect policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Retry failed connections and reconnect dropped tunnels
    #[serde(default)]
    pub auto_reconnect: bool,
    /// Maximum reconnect attempts per logical session
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: false,
            max_retries: 3,
            retry_delay: 5,
        }
    }
}

/// Local network settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Name of the TUN interface to create
    #[serde(default = "default_interface_name")]
    pub interface_name: String,
    /// MTU value
    #[serde(default = "default_mtu")]
    pub mtu: u16,
    /// Resolver configuration file overwritten while the tunnel is up
    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface_name: default_interface_name(),
            mtu: default_mtu(),
            resolv_conf: default_resolv_conf(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Reconnect policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Minimal configuration for a gateway and user; everything else defaulted
    pub fn new(hostname: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                hostname: hostname.into(),
                port,
                ignore_cert_errors: false,
                ca_file: None,
                timeout: default_timeout(),
            },
            auth: AuthConfig {
                username: username.into(),
                password: None,
            },
            reconnect: ReconnectConfig::default(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| VpnError::Config(format!("Failed to read config file: {e}")))?;

        <Self as FromStr>::from_str(&contents)
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| VpnError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.hostname.is_empty() {
            return Err(VpnError::Config(
                "Server hostname cannot be empty".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(VpnError::Config("Server port cannot be zero".to_string()));
        }

        if self.server.timeout == 0 {
            return Err(VpnError::Config(
                "Connection timeout must be at least one second".to_string(),
            ));
        }

        if self.auth.username.is_empty() {
            return Err(VpnError::Config("Username cannot be empty".to_string()));
        }

        if self.network.mtu < 576 || self.network.mtu > 9000 {
            return Err(VpnError::Config(
                "MTU must be between 576 and 9000".to_string(),
            ));
        }

        // IFNAMSIZ includes the trailing NUL
        if self.network.interface_name.is_empty() || self.network.interface_name.len() >= 16 {
            return Err(VpnError::Config(
                "Interface name must be 1 to 15 bytes long".to_string(),
            ));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = VpnError;

    fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| VpnError::Config(format!("Failed to parse TOML: {e}")))
    }
}

// Default value functions for serde
fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> u32 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u32 {
    5
}

fn default_interface_name() -> String {
    "tun0".to_string()
}

fn default_mtu() -> u16 {
    1500
}

fn default_resolv_conf() -> String {
    "/etc/resolv.conf".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
