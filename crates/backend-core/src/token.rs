//! Unverified access-token payload inspection.
//!
//! The signature is the server's business; the client only peeks at the claims
//! to learn the role, email and expiry it was issued with.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendErrorCategory};

/// Claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccessClaims {
    /// Token kind, `access_token` or `refresh_token`.
    pub category: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    /// Expiry in epoch seconds.
    pub exp: Option<u64>,
}

impl AccessClaims {
    /// Decode the payload segment of a compact JWS.
    pub fn decode(token: &str) -> Result<Self, BackendError> {
        let payload = token.split('.').nth(1).ok_or_else(|| {
            BackendError::new(
                BackendErrorCategory::Serialization,
                "token_malformed",
                "access token has no payload segment",
            )
        })?;

        // Some issuers keep the padding; strip it so one engine handles both.
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|err| {
                BackendError::new(
                    BackendErrorCategory::Serialization,
                    "token_malformed",
                    format!("access token payload is not base64url: {err}"),
                )
            })?;

        serde_json::from_slice(&bytes).map_err(|err| {
            BackendError::new(
                BackendErrorCategory::Serialization,
                "token_malformed",
                format!("access token payload is not JSON: {err}"),
            )
        })
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.exp
    }

    /// Whether the token is past its expiry at `now_secs`.
    ///
    /// Tokens without an `exp` claim are treated as not expired.
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.exp.is_some_and(|exp| exp <= now_secs)
    }

    /// Email fallback for OAuth accounts without an email claim.
    pub fn email_or_oauth_alias(&self) -> Option<String> {
        self.email.clone().or_else(|| {
            self.username
                .as_ref()
                .map(|name| format!("{}@oauth.user", name.replacen(' ', ".", 1)))
        })
    }
}

#[cfg(test)]
pub(crate) fn encode_test_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}
