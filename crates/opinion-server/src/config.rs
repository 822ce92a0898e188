//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use opinion_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket listener.
    /// Env: `HTTP_ADDR`, or `PORT` to change only the port
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Maximum number of messages retained per room (0 = unlimited).
    /// Env: `HISTORY_LIMIT`
    /// Default: `0`
    pub history_limit: usize,

    /// Human-readable name reported by `/info`.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Second Opinion"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            history_limit: 0,
            instance_name: APP_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        // PORT wins over the port in HTTP_ADDR, like most PaaS hosts expect.
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(e) => tracing::warn!(value = %port, error = %e, "Invalid PORT, ignoring"),
            }
        }

        if let Some(val) = lookup("HISTORY_LIMIT") {
            match val.trim().parse::<usize>() {
                Ok(n) => config.history_limit = n,
                Err(_) => tracing::warn!(value = %val, "Invalid HISTORY_LIMIT, keeping unlimited"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            if !name.is_empty() {
                config.instance_name = name;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}
