//! Configuration management for the SEP gateway

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Configuration for the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Kubo RPC API address: a multiaddr such as `/ip4/127.0.0.1/tcp/5001`
    /// or an `http(s)://` URL
    pub backend_address: String,

    /// Number of standard records kept in the descriptor cache (required, > 0)
    pub cache_capacity: usize,

    /// Listening port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Listening address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Deadline for a whole request in seconds (default: 10)
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Deadline for a single backend call in seconds (default: 10)
    #[serde(default = "default_timeout_secs")]
    pub backend_timeout_secs: u64,

    /// Files larger than this are never read as descriptors (default: 1MB)
    #[serde(default = "default_max_descriptor_bytes")]
    pub max_descriptor_bytes: u64,
}

// Default value functions for serde
fn default_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_descriptor_bytes() -> u64 {
    1024 * 1024 // 1MB
}

/// Environment variables read by [`GatewayConfig::from_env`]
pub mod env_vars {
    pub const BACKEND_ADDRESS: &str = "IPFS_API";
    pub const CACHE_CAPACITY: &str = "LRU_CACHE_SIZE";
    pub const PORT: &str = "NODE_PORT";
    pub const BIND_ADDRESS: &str = "BIND_ADDRESS";
    pub const REQUEST_TIMEOUT_SECS: &str = "REQUEST_TIMEOUT_SECS";
    pub const BACKEND_TIMEOUT_SECS: &str = "BACKEND_TIMEOUT_SECS";
    pub const MAX_DESCRIPTOR_BYTES: &str = "MAX_DESCRIPTOR_BYTES";
}

impl GatewayConfig {
    /// Create a config with the required settings and defaults for the rest
    pub fn new(backend_address: impl Into<String>, cache_capacity: usize) -> Result<Self> {
        let config = GatewayConfig {
            backend_address: backend_address.into(),
            cache_capacity,
            port: default_port(),
            bind_address: default_bind_address(),
            request_timeout_secs: default_timeout_secs(),
            backend_timeout_secs: default_timeout_secs(),
            max_descriptor_bytes: default_max_descriptor_bytes(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(GatewayConfig)` if loading and validation succeed
    /// * `Err(GatewayError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: GatewayConfig = serde_yaml::from_str(&content).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    ///
    /// Unset and empty variables take their defaults; the backend address
    /// and cache capacity are required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let backend_address = get(env_vars::BACKEND_ADDRESS).ok_or_else(|| {
            GatewayError::ConfigError(format!("{} must be set", env_vars::BACKEND_ADDRESS))
        })?;
        let cache_capacity = get(env_vars::CACHE_CAPACITY).ok_or_else(|| {
            GatewayError::ConfigError(format!("{} must be set", env_vars::CACHE_CAPACITY))
        })?;

        let config = GatewayConfig {
            backend_address,
            cache_capacity: parse_var(env_vars::CACHE_CAPACITY, &cache_capacity)?,
            port: match get(env_vars::PORT) {
                Some(value) => parse_var(env_vars::PORT, &value)?,
                None => default_port(),
            },
            bind_address: get(env_vars::BIND_ADDRESS).unwrap_or_else(default_bind_address),
            request_timeout_secs: match get(env_vars::REQUEST_TIMEOUT_SECS) {
                Some(value) => parse_var(env_vars::REQUEST_TIMEOUT_SECS, &value)?,
                None => default_timeout_secs(),
            },
            backend_timeout_secs: match get(env_vars::BACKEND_TIMEOUT_SECS) {
                Some(value) => parse_var(env_vars::BACKEND_TIMEOUT_SECS, &value)?,
                None => default_timeout_secs(),
            },
            max_descriptor_bytes: match get(env_vars::MAX_DESCRIPTOR_BYTES) {
                Some(value) => parse_var(env_vars::MAX_DESCRIPTOR_BYTES, &value)?,
                None => default_max_descriptor_bytes(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - cache_capacity must be > 0
    /// - both timeouts must be > 0
    /// - max_descriptor_bytes must be > 0
    /// - bind_address must be an IP address
    /// - backend_address must be a supported multiaddr or an http(s) URL
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(GatewayError::ConfigError(
                "cache_capacity must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 || self.backend_timeout_secs == 0 {
            return Err(GatewayError::ConfigError(
                "timeouts must be greater than 0".to_string(),
            ));
        }

        if self.max_descriptor_bytes == 0 {
            return Err(GatewayError::ConfigError(
                "max_descriptor_bytes must be greater than 0".to_string(),
            ));
        }

        self.listen_addr()?;
        self.backend_url()?;
        Ok(())
    }

    /// Base URL of the Kubo RPC API
    ///
    /// Multiaddrs of the form `/{ip4,ip6,dns,dns4,dns6}/<host>/tcp/<port>`
    /// are accepted, optionally followed by `/http` or `/https`.
    pub fn backend_url(&self) -> Result<String> {
        let address = self.backend_address.trim();

        if address.starts_with("http://") || address.starts_with("https://") {
            return Ok(address.trim_end_matches('/').to_string());
        }

        let invalid = || {
            GatewayError::ConfigError(format!("Unsupported backend address '{}'", address))
        };

        let parts: Vec<&str> = address.split('/').collect();
        // leading empty segment from the initial '/'
        let (proto, host, tcp, port, rest) = match parts.as_slice() {
            ["", proto, host, tcp, port, rest @ ..] => (*proto, *host, *tcp, *port, rest),
            _ => return Err(invalid()),
        };

        if tcp != "tcp" || host.is_empty() {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;

        let host = match proto {
            "ip4" => {
                let ip: std::net::Ipv4Addr = host.parse().map_err(|_| invalid())?;
                ip.to_string()
            }
            "ip6" => {
                let ip: std::net::Ipv6Addr = host.parse().map_err(|_| invalid())?;
                format!("[{}]", ip)
            }
            "dns" | "dns4" | "dns6" => host.to_string(),
            _ => return Err(invalid()),
        };

        let scheme = match rest {
            [] | ["http"] => "http",
            ["https"] | ["tls", "http"] => "https",
            _ => return Err(invalid()),
        };

        Ok(format!("{}://{}:{}", scheme, host, port))
    }

    /// Socket address the HTTP server binds to
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bind_address.parse().map_err(|e| {
            GatewayError::ConfigError(format!(
                "Invalid bind_address '{}': {}",
                self.bind_address, e
            ))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        GatewayError::ConfigError(format!("Invalid value '{}' for {}: {}", value, name, e))
    })
}
