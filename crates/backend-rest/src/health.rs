//! Pre-flight reachability probe run before opening a chat session.

use std::{sync::Arc, time::Duration};

use backend_core::{BackendError, BackendErrorCategory};
use http::{
    HeaderValue,
    header::{AUTHORIZATION, CACHE_CONTROL, PRAGMA},
};
use tracing::{debug, warn};

use crate::{
    config::HEALTH_PATH,
    transport::{ApiRequest, HttpTransport},
};

#[derive(Clone)]
pub struct HealthProbe {
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(transport: Arc<dyn HttpTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// `GET /api/health` with caching disabled, aborted after the probe timeout.
    ///
    /// The probe bypasses the reissue pipeline; the bearer is optional.
    pub async fn check(&self, bearer: Option<&str>) -> Result<(), BackendError> {
        let mut request = ApiRequest::get(HEALTH_PATH)
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .header(PRAGMA, HeaderValue::from_static("no-cache"));
        if let Some(token) = bearer
            && let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {token}"))
        {
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
        }

        let response = match tokio::time::timeout(self.timeout, self.transport.execute(&request)).await {
            Ok(result) => result.map_err(|err| health_failed(err.message))?,
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms, "health probe timed out");
                return Err(health_failed(format!("no answer within {timeout_ms} ms")));
            }
        };

        if !response.is_success() {
            warn!(status = response.status.as_u16(), "health probe rejected");
            return Err(health_failed(format!(
                "health endpoint answered {}",
                response.status
            )));
        }
        debug!("health probe passed");
        Ok(())
    }
}

fn health_failed(detail: impl Into<String>) -> BackendError {
    BackendError::new(
        BackendErrorCategory::Network,
        "health_check_failed",
        detail,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedTransport, status};

    #[tokio::test(start_paused = true)]
    async fn passes_on_200_and_sends_no_cache_headers() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_response(Ok(status(200)));
        let probe = HealthProbe::new(transport.clone(), Duration::from_secs(5));

        probe.check(Some("abc")).await.expect("probe should pass");

        let requests = transport.requests();
        let headers = &requests[0].headers;
        assert_eq!(requests[0].path, HEALTH_PATH);
        assert_eq!(headers.get(CACHE_CONTROL).expect("cache-control"), "no-cache");
        assert_eq!(headers.get(PRAGMA).expect("pragma"), "no-cache");
        assert_eq!(headers.get(AUTHORIZATION).expect("auth"), "Bearer abc");
    }

    #[tokio::test(start_paused = true)]
    async fn fails_on_server_error() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_response(Ok(status(503)));
        let probe = HealthProbe::new(transport, Duration::from_secs(5));

        let err = probe.check(None).await.expect_err("503 should fail");
        assert_eq!(err.code, "health_check_failed");
        assert!(err.is_recoverable());
    }

    struct HangingTransport;

    #[async_trait::async_trait]
    impl HttpTransport for HangingTransport {
        async fn execute(
            &self,
            _request: &ApiRequest,
        ) -> Result<crate::transport::ApiResponse, BackendError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn aborts_after_timeout() {
        let probe = HealthProbe::new(Arc::new(HangingTransport), Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        let err = probe.check(None).await.expect_err("hanging probe must abort");
        assert_eq!(err.code, "health_check_failed");
        assert!(err.message.contains("5000 ms"), "{}", err.message);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
