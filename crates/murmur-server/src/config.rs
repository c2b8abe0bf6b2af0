//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development. A `.env` file in the working
//! directory is honoured (loaded by `main` before this runs).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use murmur_shared::constants::{CHANNEL_BUFFER, DEFAULT_HTTP_PORT, MAX_BODY_BYTES};

pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5001`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: none, meaning the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Browser origin allowed to call the API with credentials.
    /// Env: `CORS_ORIGIN`
    /// Default: `http://localhost:5173`
    pub cors_origin: String,

    /// Outbound event queue depth per realtime connection. A push to a
    /// full queue fails instead of waiting.
    /// Env: `CHANNEL_BUFFER`
    /// Default: `64`
    pub channel_buffer: usize,

    /// Maximum request body size in bytes (inline images are large).
    /// Env: `MAX_BODY_BYTES`
    /// Default: 10 MiB
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            channel_buffer: CHANNEL_BUFFER,
            max_body_bytes: MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(origin) = lookup("CORS_ORIGIN").filter(|o| !o.is_empty()) {
            config.cors_origin = origin;
        }

        parse_into(&lookup, "CHANNEL_BUFFER", &mut config.channel_buffer);
        if config.channel_buffer == 0 {
            tracing::warn!("CHANNEL_BUFFER must be positive, using default");
            config.channel_buffer = CHANNEL_BUFFER;
        }

        parse_into(&lookup, "MAX_BODY_BYTES", &mut config.max_body_bytes);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}
