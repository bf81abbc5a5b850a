//! Refresh-cookie exchange for a new access token, shared by concurrent callers.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use backend_core::{BackendError, RetryPolicy};
use backend_platform::AuthStore;
use http::StatusCode;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::REISSUE_PATH,
    transport::{ApiRequest, HttpTransport},
};

/// Response header carrying the fresh access token.
pub const ACCESS_TOKEN_HEADER: &str = "access_token";

/// Single-flight reissue coordinator.
///
/// Every finished exchange bumps a generation counter. A caller that saw a 401
/// for a request sent under generation `g` only runs a new exchange when no
/// exchange finished since `g`; otherwise it takes the outcome of the one that
/// did. Concurrent 401s therefore queue on the lock and share one exchange.
pub struct Reissuer {
    transport: Arc<dyn HttpTransport>,
    auth: AuthStore,
    policy: RetryPolicy,
    generation: AtomicU64,
    last_outcome: Mutex<Option<Result<(), BackendError>>>,
}

impl Reissuer {
    pub fn new(transport: Arc<dyn HttpTransport>, auth: AuthStore) -> Self {
        Self::with_policy(transport, auth, RetryPolicy::reissue())
    }

    pub fn with_policy(transport: Arc<dyn HttpTransport>, auth: AuthStore, policy: RetryPolicy) -> Self {
        Self {
            transport,
            auth,
            policy,
            generation: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
        }
    }

    /// Number of exchanges finished so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Run an exchange now, unless one is already in flight, in which case
    /// wait for it and share its outcome.
    pub async fn reissue(&self) -> Result<(), BackendError> {
        self.reissue_after(self.generation()).await
    }

    /// Reissue on behalf of a request sent under `seen_generation`.
    pub async fn reissue_after(&self, seen_generation: u64) -> Result<(), BackendError> {
        let mut last_outcome = self.last_outcome.lock().await;

        let current = self.generation();
        if current != seen_generation
            && let Some(outcome) = last_outcome.as_ref()
        {
            debug!(
                seen_generation,
                current, "sharing outcome of a reissue that finished meanwhile"
            );
            return outcome.clone();
        }

        let outcome = self.exchange().await;
        *last_outcome = Some(outcome.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn exchange(&self) -> Result<(), BackendError> {
        let mut retries = 0_u32;
        loop {
            match self.attempt().await {
                Ok(token) => {
                    match token {
                        Some(token) => self.auth.set_access_token(&token)?,
                        None => warn!("reissue succeeded without an access token header"),
                    }
                    info!(attempt = retries + 1, "access token reissued");
                    return Ok(());
                }
                Err(err) if self.policy.allows(retries) => {
                    let delay = self.policy.delay_for_attempt(retries);
                    warn!(
                        attempt = retries + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        code = %err.code,
                        error = %err.message,
                        "reissue attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(err) => {
                    warn!(
                        attempts = retries + 1,
                        code = %err.code,
                        error = %err.message,
                        "reissue failed; clearing access token"
                    );
                    if let Err(clear_err) = self.auth.clear_access_token() {
                        warn!(code = %clear_err.code, "failed to clear access token after reissue failure");
                    }
                    return Err(BackendError::auth_expired());
                }
            }
        }
    }

    /// One exchange. The refresh credential travels as a cookie, so no
    /// `Authorization` header is attached.
    async fn attempt(&self) -> Result<Option<String>, BackendError> {
        let response = self
            .transport
            .execute(&ApiRequest::post(REISSUE_PATH))
            .await?;
        if response.status != StatusCode::OK {
            return Err(response.into_error());
        }
        Ok(response.header_str(ACCESS_TOKEN_HEADER).map(str::to_owned))
    }
}
