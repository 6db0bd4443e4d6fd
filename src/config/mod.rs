//! Configuration module - environment variable parsing

pub mod session;
pub mod settings;

pub use session::SessionConfig;
pub use settings::{MemorySettingsStore, PlayerSettings, SettingsStore};

use std::env;
use std::net::SocketAddr;

use crate::game::{MAX_PLAYERS, MIN_PLAYERS};

/// Relay server configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,
    /// Peers allowed in one lobby
    pub lobby_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8765".to_string()),
        };

        let lobby_capacity = match lookup("LOBBY_CAPACITY") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| (MIN_PLAYERS..=MAX_PLAYERS).contains(n))
                .ok_or(ConfigError::Invalid("LOBBY_CAPACITY"))?,
            None => MAX_PLAYERS,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            lobby_capacity,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
