//! Client configuration.

use crate::error::ClientError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Endpoints and timings for the live-update client.
///
/// Durations are plain milliseconds so the struct maps directly onto a TOML
/// table. Unset fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `http://` or `https://` URL of the backend. Endpoint paths are
    /// resolved against it.
    pub base_url: String,
    pub socket_path: String,
    pub event_stream_path: String,
    pub poll_path: String,
    pub action_path: String,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
    pub max_reconnect_attempts: u32,
    pub toast_ms: u64,
    pub banner_ms: u64,
    /// Per-attempt timeout. `None` waits for the transport indefinitely.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            socket_path: "/api/live-updates".to_string(),
            event_stream_path: "/api/live-updates-sse".to_string(),
            poll_path: "/api/updates".to_string(),
            action_path: "/api/user-action".to_string(),
            poll_interval_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            reconnect_base_ms: 1_000,
            reconnect_cap_ms: 30_000,
            max_reconnect_attempts: 5,
            toast_ms: 5_000,
            banner_ms: 10_000,
            connect_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Parsed base URL. Only `http` and `https` are accepted.
    pub fn base(&self) -> Result<Url, ClientError> {
        let base = Url::parse(self.base_url.trim())
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        match base.scheme() {
            "http" | "https" => Ok(base),
            other => Err(ClientError::InvalidUrl(format!(
                "{}: unsupported scheme '{}'",
                self.base_url, other
            ))),
        }
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<(), ClientError> {
        self.base()?;
        if self.poll_interval_ms == 0 {
            return Err(ClientError::InvalidConfig("poll_interval_ms must be > 0".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "heartbeat_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Absolute HTTP URL for `path`.
    pub fn http_url(&self, path: &str) -> Result<Url, ClientError> {
        let base = self.base()?;
        base.join(path)
            .map_err(|e| ClientError::InvalidUrl(format!("{}{}: {}", base, path, e)))
    }

    /// Socket URL, with the scheme switched to `ws`/`wss`.
    pub fn socket_url(&self) -> Result<Url, ClientError> {
        let mut url = self.http_url(&self.socket_path)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::InvalidUrl(format!("cannot use {} for a socket", url)))?;
        url.set_fragment(None);
        Ok(url)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_ms)
    }

    pub fn banner_duration(&self) -> Duration {
        Duration::from_millis(self.banner_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}
