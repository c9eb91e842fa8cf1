//! Client configuration
//!
//! Resolves where the live channel and the snapshot endpoint live. Values come
//! from the environment (with `.env` support) or from a TOML file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::RetryPolicy;

/// Connection settings for a retrospective backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend host, with optional port (e.g. `retro.example.com` or `localhost:3000`)
    pub host: String,

    /// Use `wss`/`https` instead of `ws`/`http`
    pub secure: bool,

    /// Path prefix of the websocket hello endpoint
    pub hello_path: String,

    /// Path prefix of the snapshot (REST) endpoint
    pub snapshot_path: String,

    /// Close events tolerated before the channel is abandoned
    pub max_retries: u32,

    /// Lower bound for a reconnect delay
    pub retry_floor_ms: u64,

    /// Reconnect delay added per retry already spent
    pub retry_step_ms: u64,

    /// Timeout for snapshot requests
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            host: "localhost:3000".to_string(),
            secure: false,
            hello_path: "/socket/hello".to_string(),
            snapshot_path: "/retrospective".to_string(),
            max_retries: retry.max_retries,
            retry_floor_ms: retry.floor.as_millis() as u64,
            retry_step_ms: retry.step.as_millis() as u64,
            request_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(host) = std::env::var("RETRO_API_HOST") {
            config.host = host;
        }
        if let Ok(secure) = std::env::var("RETRO_SECURE") {
            config.secure = parse_flag(&secure).context("RETRO_SECURE must be a boolean")?;
        }
        if let Ok(path) = std::env::var("RETRO_SOCKET_HELLO_PATH") {
            config.hello_path = path;
        }
        if let Ok(path) = std::env::var("RETRO_SNAPSHOT_PATH") {
            config.snapshot_path = path;
        }
        if let Ok(value) = std::env::var("RETRO_MAX_RETRIES") {
            config.max_retries = value.parse().context("RETRO_MAX_RETRIES must be an integer")?;
        }
        if let Ok(value) = std::env::var("RETRO_RETRY_FLOOR_MS") {
            config.retry_floor_ms = value
                .parse()
                .context("RETRO_RETRY_FLOOR_MS must be an integer")?;
        }
        if let Ok(value) = std::env::var("RETRO_RETRY_STEP_MS") {
            config.retry_step_ms = value
                .parse()
                .context("RETRO_RETRY_STEP_MS must be an integer")?;
        }
        if let Ok(value) = std::env::var("RETRO_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = value
                .parse()
                .context("RETRO_REQUEST_TIMEOUT_SECS must be an integer")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file; missing keys keep their defaults
    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("config: host must not be empty");
        }
        if self.host.contains("://") {
            bail!("config: host must not carry a scheme (use `secure` instead)");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            floor: Duration::from_millis(self.retry_floor_ms),
            step: Duration::from_millis(self.retry_step_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Websocket endpoint for a session: `ws[s]://host/<hello-path>/<session>`
    pub fn socket_url(&self, session_id: &str) -> Result<Url> {
        let scheme = if self.secure { "wss" } else { "ws" };
        self.session_url(scheme, &self.hello_path, session_id)
    }

    /// Snapshot endpoint for a session: `http[s]://host/<snapshot-path>/<session>`
    pub fn snapshot_url(&self, session_id: &str) -> Result<Url> {
        let scheme = if self.secure { "https" } else { "http" };
        self.session_url(scheme, &self.snapshot_path, session_id)
    }

    fn session_url(&self, scheme: &str, prefix: &str, session_id: &str) -> Result<Url> {
        if session_id.trim().is_empty() {
            bail!("session id must not be empty");
        }

        let mut url = Url::parse(&format!("{}://{}/", scheme, self.host))
            .with_context(|| format!("invalid host '{}'", self.host))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow::anyhow!("host '{}' cannot carry a path", self.host))?;
            segments.clear();
            for part in prefix.split('/').filter(|s| !s.is_empty()) {
                segments.push(part);
            }
            segments.push(session_id);
        }
        Ok(url)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("not a boolean: {other}"),
    }
}
