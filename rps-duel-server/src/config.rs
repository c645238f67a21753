//! Server Configuration
//!
//! Loaded from environment variables; anything unset keeps its default.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::network::auth::AuthConfig;

/// Runtime configuration for the duel server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Close a connection that sends nothing for this long.
    pub idle_timeout: Duration,
    /// Per-connection outbound queue length.
    pub outbound_buffer: usize,
    /// Session hub command queue length.
    pub command_buffer: usize,
    /// Period of the session stats log. Zero disables it.
    pub stats_interval: Duration,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Token validation. Disabled unless a key is set.
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7777)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            outbound_buffer: 64,
            command_buffer: 1024,
            stats_interval: Duration::from_secs(60),
            log_level: "info".to_string(),
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            bind_addr: parse_var(&lookup, "RPS_BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            max_connections: parse_var(&lookup, "RPS_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            idle_timeout: positive(&lookup, "RPS_IDLE_TIMEOUT_SECS")?
                .map(|secs| Duration::from_secs(secs as u64))
                .unwrap_or(defaults.idle_timeout),
            outbound_buffer: positive(&lookup, "RPS_OUTBOUND_BUFFER")?
                .unwrap_or(defaults.outbound_buffer),
            command_buffer: positive(&lookup, "RPS_COMMAND_BUFFER")?
                .unwrap_or(defaults.command_buffer),
            stats_interval: parse_var(&lookup, "RPS_STATS_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stats_interval),
            log_level: lookup("RPS_LOG_LEVEL").unwrap_or(defaults.log_level),
            auth: AuthConfig::from_lookup(&lookup),
        })
    }

    /// Stats period, or `None` if disabled.
    pub fn stats_period(&self) -> Option<Duration> {
        (!self.stats_interval.is_zero()).then_some(self.stats_interval)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn positive<F>(lookup: &F, var: &'static str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var::<usize, F>(lookup, var)? {
        Some(0) => Err(ConfigError::Invalid { var, value: "0".to_string() }),
        other => Ok(other),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}
