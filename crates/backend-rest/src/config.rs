//! Endpoint configuration shared by the REST pipeline and the chat socket.

use std::{env, time::Duration};

use backend_core::{BackendError, BackendErrorCategory};
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 5_000;

pub const REISSUE_PATH: &str = "/reissue";
pub const HEALTH_PATH: &str = "/api/health";
pub const CONNECT_PATH: &str = "/api/connect";
/// The public demo room is served outside the `/api` prefix.
pub const DEMO_CONNECT_PATH: &str = "/connect";

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where the API lives and how long its calls may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    base_url: Url,
    /// Client-side timeout for every pipeline request, reissue included.
    pub request_timeout: Duration,
    /// Abort deadline for the pre-flight health probe.
    pub health_timeout: Duration,
}

impl EndpointConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            health_timeout: Duration::from_millis(DEFAULT_HEALTH_TIMEOUT_MS),
        }
    }

    /// Parse from `BOARDCHAT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let raw_base = lookup("BOARDCHAT_API_BASE_URL")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_owned());
        let base_url = parse_base_url("BOARDCHAT_API_BASE_URL", &raw_base)?;

        let request_timeout_ms = parse_timeout_ms(
            "BOARDCHAT_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;
        let health_timeout_ms = parse_timeout_ms(
            "BOARDCHAT_HEALTH_TIMEOUT_MS",
            DEFAULT_HEALTH_TIMEOUT_MS,
            &mut lookup,
        )?;

        Ok(Self {
            base_url,
            request_timeout: Duration::from_millis(request_timeout_ms),
            health_timeout: Duration::from_millis(health_timeout_ms),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for an API path such as `/chat/history/7`.
    ///
    /// The base may carry its own path prefix; `path` is appended to it.
    pub fn url(&self, path: &str) -> Result<Url, BackendError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let joined = if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        };
        Url::parse(&joined).map_err(|err| {
            BackendError::new(
                BackendErrorCategory::Config,
                "invalid_url",
                format!("cannot build request URL from '{joined}': {err}"),
            )
        })
    }

    pub fn reissue_url(&self) -> Result<Url, BackendError> {
        self.url(REISSUE_PATH)
    }

    pub fn health_url(&self) -> Result<Url, BackendError> {
        self.url(HEALTH_PATH)
    }

    /// SockJS endpoint the chat session connects to.
    pub fn connect_url(&self) -> Result<Url, BackendError> {
        self.url(CONNECT_PATH)
    }

    /// SockJS endpoint of the public demo room.
    pub fn demo_connect_url(&self) -> Result<Url, BackendError> {
        self.url(DEMO_CONNECT_PATH)
    }

    /// Host label used to scope stored credentials per API server.
    pub fn credential_scope(&self) -> String {
        match (self.base_url.host_str(), self.base_url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_owned(),
            _ => "default".to_owned(),
        }
    }
}

fn parse_base_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|err| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
            reason: "scheme must be http or https".to_owned(),
        });
    }
    Ok(url)
}

fn parse_timeout_ms<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    let parsed = value
        .trim()
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value: value.clone(),
            reason: err.to_string(),
        })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(parsed)
}
