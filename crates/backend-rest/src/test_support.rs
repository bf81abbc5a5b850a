//! Scripted in-process transport for unit tests.

use std::{
    collections::VecDeque,
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use backend_core::BackendError;
use bytes::Bytes;
use http::{HeaderValue, StatusCode, header::AUTHORIZATION};

use crate::{
    config::REISSUE_PATH,
    reissue::ACCESS_TOKEN_HEADER,
    transport::{ApiRequest, ApiResponse, HttpTransport},
};

pub(crate) fn status(code: u16) -> ApiResponse {
    ApiResponse::new(StatusCode::from_u16(code).expect("valid status"))
}

pub(crate) fn ok_with_token(token: &str) -> ApiResponse {
    let mut response = status(200);
    response.headers.insert(
        ACCESS_TOKEN_HEADER,
        HeaderValue::from_str(token).expect("valid header"),
    );
    response
}

pub(crate) fn ok_json(body: serde_json::Value) -> ApiResponse {
    let mut response = status(200);
    response.body = Bytes::from(body.to_string());
    response
}

/// Reissue calls pop from their own queue. Other calls pop queued responses
/// first; with an empty queue they answer 200 when the bearer matches the
/// accepted token and 401 otherwise.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    reissue_queue: Mutex<VecDeque<Result<ApiResponse, BackendError>>>,
    response_queue: Mutex<VecDeque<Result<ApiResponse, BackendError>>>,
    accepted_token: Mutex<Option<String>>,
    reissue_delay: Mutex<Duration>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn push_reissue(&self, outcome: Result<ApiResponse, BackendError>) {
        self.reissue_queue.lock().expect("lock").push_back(outcome);
    }

    pub(crate) fn push_response(&self, outcome: Result<ApiResponse, BackendError>) {
        self.response_queue.lock().expect("lock").push_back(outcome);
    }

    pub(crate) fn accept_token(&self, token: &str) {
        *self.accepted_token.lock().expect("lock") = Some(token.to_owned());
    }

    pub(crate) fn set_reissue_delay(&self, delay: Duration) {
        *self.reissue_delay.lock().expect("lock") = delay;
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub(crate) fn reissue_calls(&self) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.path == REISSUE_PATH)
            .count()
    }

    pub(crate) fn api_calls(&self) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.path != REISSUE_PATH)
            .count()
    }

    /// `Authorization` header of every non-reissue call, in order.
    pub(crate) fn authorization_headers(&self) -> Vec<Option<String>> {
        self.requests()
            .iter()
            .filter(|request| request.path != REISSUE_PATH)
            .map(|request| {
                request
                    .headers
                    .get(AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned)
            })
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError> {
        self.requests.lock().expect("lock").push(request.clone());

        if request.path == REISSUE_PATH {
            let delay = *self.reissue_delay.lock().expect("lock");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let next = self.reissue_queue.lock().expect("lock").pop_front();
            return next.unwrap_or_else(|| Ok(status(401)));
        }

        if let Some(next) = self.response_queue.lock().expect("lock").pop_front() {
            return next;
        }

        let accepted = self.accepted_token.lock().expect("lock").clone();
        let presented = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_owned);
        match (accepted, presented) {
            (Some(accepted), Some(presented)) if accepted == presented => Ok(ok_json(
                serde_json::json!({"ok": true}),
            )),
            _ => Ok(status(401)),
        }
    }
}
