use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Coarse grouping that drives retry decisions and what the UI shows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendErrorCategory {
    /// Bad endpoint settings or a request the server refused as malformed.
    Config,
    /// Missing, expired or rejected credentials.
    Auth,
    /// Connection refused, reset, or a 5xx from the API.
    Network,
    /// Throttled or timed out.
    RateLimited,
    /// Broken STOMP framing or an ERROR frame from the broker.
    Protocol,
    /// Rejected locally before any request went out.
    Validation,
    /// Credential store read/write failure.
    Storage,
    /// JSON body could not be encoded or decoded.
    Serialization,
    /// Should not happen; indicates a bug.
    Internal,
}

/// Error value shared by the REST pipeline, the chat session and frontends.
///
/// `code` is stable and meant for matching; `message` is for humans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct BackendError {
    pub category: BackendErrorCategory,
    pub code: String,
    pub message: String,
    /// Server-provided backoff (`Retry-After`), in milliseconds.
    pub retry_after_ms: Option<u64>,
    /// Status of the failed response, if the failure came from HTTP.
    pub http_status: Option<u16>,
}

impl BackendError {
    pub fn new(
        category: BackendErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
            http_status: None,
        }
    }

    pub fn with_retry_after(self, retry_after: Duration) -> Self {
        let millis = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
        Self {
            retry_after_ms: Some(millis),
            ..self
        }
    }

    /// Error for a non-success HTTP response, categorized by status.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            http_status: Some(status),
            ..Self::new(classify_http_status(status), "http_status", message)
        }
    }

    /// The refresh cookie was rejected; only a fresh login can recover.
    pub fn auth_expired() -> Self {
        Self {
            http_status: Some(401),
            ..Self::new(
                BackendErrorCategory::Auth,
                "auth_expired",
                "authentication expired, please log in again",
            )
        }
    }

    pub fn invalid_state(current: ConnectionState, action: impl Into<String>) -> Self {
        Self::new(
            BackendErrorCategory::Internal,
            "invalid_state_transition",
            format!(
                "'{}' is not allowed while the chat session is {current:?}",
                action.into()
            ),
        )
    }

    pub fn is_unauthorized(&self) -> bool {
        self.category == BackendErrorCategory::Auth && self.http_status == Some(401)
    }

    /// Retrying the same call later has a chance of succeeding.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            BackendErrorCategory::Network | BackendErrorCategory::RateLimited
        )
    }
}

/// Category for a non-success HTTP status.
pub fn classify_http_status(status: u16) -> BackendErrorCategory {
    use BackendErrorCategory::*;

    match status {
        401 | 403 => Auth,
        408 | 429 => RateLimited,
        500..=599 => Network,
        400..=499 => Config,
        _ => Internal,
    }
}
