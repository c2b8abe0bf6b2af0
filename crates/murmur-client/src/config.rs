//! Client configuration loaded from environment variables.

use std::time::Duration;

use reqwest::Url;

use murmur_shared::constants::{CHANNEL_PATH, DEFAULT_HTTP_PORT, TOKEN_QUERY_PARAM};

use crate::error::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Murmur server.
    /// Env: `MURMUR_SERVER_URL`
    /// Default: `http://localhost:5001`
    pub server_url: Url,

    /// Session token issued at login.
    /// Env: `MURMUR_TOKEN`
    pub token: Option<String>,

    /// Per-request HTTP timeout.
    /// Env: `MURMUR_REQUEST_TIMEOUT_SECS`
    /// Default: 10 seconds
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_url: Url, token: impl Into<String>) -> Self {
        Self {
            server_url,
            token: Some(token.into()),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw_url = lookup("MURMUR_SERVER_URL")
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("http://localhost:{DEFAULT_HTTP_PORT}"));
        let server_url = Url::parse(&raw_url)
            .map_err(|e| ClientError::Config(format!("MURMUR_SERVER_URL '{raw_url}': {e}")))?;

        let mut request_timeout = Duration::from_secs(10);
        if let Some(raw) = lookup("MURMUR_REQUEST_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %raw, "Invalid MURMUR_REQUEST_TIMEOUT_SECS, using default"),
            }
        }

        Ok(Self {
            server_url,
            token: lookup("MURMUR_TOKEN").filter(|t| !t.is_empty()),
            request_timeout,
        })
    }

    pub fn require_token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| ClientError::Auth("no session token configured".into()))
    }

    /// WebSocket URL of the realtime channel, carrying the session token.
    pub fn channel_url(&self) -> Result<Url> {
        let mut url = self.server_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Config(format!("{} cannot be a base URL", self.server_url)))?
            .pop_if_empty()
            .push(CHANNEL_PATH.trim_start_matches('/'));

        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Config(format!("cannot derive channel URL from {}", self.server_url)))?;

        url.query_pairs_mut()
            .clear()
            .append_pair(TOKEN_QUERY_PARAM, self.require_token()?);
        Ok(url)
    }
}
