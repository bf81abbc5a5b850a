//! Authenticated request pipeline: bearer attachment, 401 recovery and replay.

use std::sync::Arc;

use backend_core::BackendError;
use backend_platform::AuthStore;
use http::{
    HeaderValue, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    reissue::Reissuer,
    transport::{ApiRequest, ApiResponse, HttpTransport, RequestBody},
};

/// Outbound request plus how many times it was already sent after an
/// authorization failure.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    request: ApiRequest,
    attempt: u32,
    issued_under: u64,
}

impl PendingRequest {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            attempt: 0,
            issued_under: 0,
        }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether this is the one replay allowed after a reissue.
    pub fn is_replay(&self) -> bool {
        self.attempt > 0
    }

    /// Reissue generation observed when the credential was attached.
    pub fn issued_under(&self) -> u64 {
        self.issued_under
    }

    fn into_replay(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

/// What to do after a response came back.
#[derive(Debug)]
pub enum ResponseStep {
    Complete(ApiResponse),
    /// Credential was reissued; send this descriptor once more.
    Replay(PendingRequest),
}

/// REST client every authenticated call goes through.
#[derive(Clone)]
pub struct AuthenticatedClient {
    transport: Arc<dyn HttpTransport>,
    auth: AuthStore,
    reissuer: Arc<Reissuer>,
}

impl AuthenticatedClient {
    pub fn new(transport: Arc<dyn HttpTransport>, auth: AuthStore) -> Self {
        let reissuer = Arc::new(Reissuer::new(transport.clone(), auth.clone()));
        Self::with_reissuer(transport, auth, reissuer)
    }

    pub fn with_reissuer(
        transport: Arc<dyn HttpTransport>,
        auth: AuthStore,
        reissuer: Arc<Reissuer>,
    ) -> Self {
        Self {
            transport,
            auth,
            reissuer,
        }
    }

    pub fn auth(&self) -> &AuthStore {
        &self.auth
    }

    pub fn reissuer(&self) -> &Arc<Reissuer> {
        &self.reissuer
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Set the bearer header from the token stored right now.
    ///
    /// JSON bodies get a JSON content type; multipart bodies never carry a
    /// preset content type so the transport can add its boundary.
    pub fn attach(&self, pending: &mut PendingRequest) {
        pending.issued_under = self.reissuer.generation();
        let request = &mut pending.request;

        request.headers.remove(AUTHORIZATION);
        if let Some(token) = self.auth.access_token() {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!(
                    path = %request.path,
                    "stored access token is not a valid header value; sending unauthenticated"
                ),
            }
        }

        match request.body {
            RequestBody::Json(_) => {
                request
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            RequestBody::Multipart(_) => {
                request.headers.remove(CONTENT_TYPE);
            }
            RequestBody::Empty | RequestBody::Form(_) => {}
        }
    }

    /// Decide between completing, replaying after a reissue, or failing.
    pub async fn handle_response(
        &self,
        pending: PendingRequest,
        response: ApiResponse,
    ) -> Result<ResponseStep, BackendError> {
        if response.is_success() {
            return Ok(ResponseStep::Complete(response));
        }

        if response.status != StatusCode::UNAUTHORIZED {
            return Err(response.into_error());
        }

        if pending.is_replay() {
            debug!(
                path = %pending.request.path,
                "replay was rejected again; not reissuing twice"
            );
            return Err(response.into_error());
        }

        let replay = pending.into_replay();
        match self.reissuer.reissue_after(replay.issued_under).await {
            Ok(()) => {
                debug!(path = %replay.request.path, "replaying request with reissued token");
                Ok(ResponseStep::Replay(replay))
            }
            Err(err) => {
                warn!(
                    path = %replay.request.path,
                    code = %err.code,
                    "reissue failed; rejecting request"
                );
                Err(BackendError::auth_expired())
            }
        }
    }

    /// Send a request, recovering once from an expired credential.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, BackendError> {
        let mut pending = PendingRequest::new(request);
        loop {
            self.attach(&mut pending);
            debug!(
                method = %pending.request.method,
                path = %pending.request.path,
                attempt = pending.attempt,
                "sending request"
            );
            let response = self.transport.execute(&pending.request).await?;
            match self.handle_response(pending, response).await? {
                ResponseStep::Complete(response) => return Ok(response),
                ResponseStep::Replay(next) => pending = next,
            }
        }
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, BackendError> {
        self.send(request).await?.json()
    }

    /// Send a request whose success body carries nothing of interest.
    pub async fn send_unit(&self, request: ApiRequest) -> Result<(), BackendError> {
        self.send(request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_support::{ScriptedTransport, ok_with_token, status},
        transport::MultipartPart,
    };
    use backend_core::BackendErrorCategory;
    use bytes::Bytes;

    fn client_with(transport: &Arc<ScriptedTransport>, token: Option<&str>) -> AuthenticatedClient {
        let auth = AuthStore::in_memory();
        if let Some(token) = token {
            auth.set_access_token(token).expect("seed token");
        }
        AuthenticatedClient::new(transport.clone(), auth)
    }

    #[test]
    fn attach_sets_bearer_and_json_content_type() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client_with(&transport, Some("abc"));
        let mut pending = PendingRequest::new(
            ApiRequest::post("/chat/room/group/create")
                .json(&serde_json::json!({"name": "dev"}))
                .expect("encode"),
        );

        client.attach(&mut pending);
        let headers = &pending.request().headers;
        assert_eq!(
            headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer abc")
        );
        assert_eq!(
            headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
    }

    #[test]
    fn attach_leaves_multipart_content_type_to_the_transport() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client_with(&transport, Some("abc"));
        let mut pending = PendingRequest::new(
            ApiRequest::post("/upload")
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .multipart(vec![MultipartPart {
                    name: "file".into(),
                    file_name: Some("a.png".into()),
                    content_type: Some("image/png".into()),
                    data: Bytes::from_static(b"\x89PNG"),
                }]),
        );

        client.attach(&mut pending);
        assert!(pending.request().headers.get(CONTENT_TYPE).is_none());
        assert!(pending.request().headers.get(AUTHORIZATION).is_some());
    }

    #[test]
    fn attach_without_token_sends_unauthenticated() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client_with(&transport, None);
        let mut pending = PendingRequest::new(
            ApiRequest::get("/chat/my/rooms").header(AUTHORIZATION, HeaderValue::from_static("Bearer stale")),
        );

        client.attach(&mut pending);
        assert!(pending.request().headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn success_passes_through_without_reissue() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.accept_token("abc");
        let client = client_with(&transport, Some("abc"));

        let response = client
            .send(ApiRequest::get("/chat/history/7"))
            .await
            .expect("request should succeed");
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.reissue_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_is_reissued_and_request_replayed_once() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.accept_token("new-token");
        transport.push_reissue(Ok(ok_with_token("new-token")));
        let client = client_with(&transport, Some("old-token"));

        let response = client
            .send(ApiRequest::get("/chat/history/7"))
            .await
            .expect("replay should succeed");

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.reissue_calls(), 1);
        assert_eq!(
            transport.authorization_headers(),
            vec![
                Some("Bearer old-token".to_owned()),
                Some("Bearer new-token".to_owned())
            ]
        );
        assert_eq!(client.auth().access_token().as_deref(), Some("new-token"));
    }

    #[tokio::test(start_paused = true)]
    async fn replay_rejected_again_does_not_reissue_twice() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.accept_token("never-matches");
        transport.push_reissue(Ok(ok_with_token("new-token")));
        let client = client_with(&transport, Some("old-token"));

        let err = client
            .send(ApiRequest::get("/chat/my/rooms"))
            .await
            .expect_err("second 401 must be rejected");

        assert!(err.is_unauthorized());
        assert_eq!(err.code, "http_status");
        assert_eq!(transport.reissue_calls(), 1);
        assert_eq!(transport.api_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reissue_rejects_with_auth_expired_without_replay() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.accept_token("new-token");
        for _ in 0..3 {
            transport.push_reissue(Ok(status(401)));
        }
        let client = client_with(&transport, Some("old-token"));

        let err = client
            .send(ApiRequest::post("/chat/room/7/read"))
            .await
            .expect_err("reissue failure is terminal");

        assert_eq!(err.code, "auth_expired");
        assert_eq!(transport.api_calls(), 1);
        assert_eq!(transport.reissue_calls(), 3);
        assert_eq!(client.auth().access_token(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn other_failures_pass_through_unchanged() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_response(Ok(status(404)));
        let client = client_with(&transport, Some("abc"));

        let err = client
            .send(ApiRequest::get("/chat/history/404"))
            .await
            .expect_err("404 should fail");
        assert_eq!(err.http_status, Some(404));
        assert_eq!(err.category, BackendErrorCategory::Config);
        assert_eq!(transport.reissue_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_flag_is_set_before_replay() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_reissue(Ok(ok_with_token("new-token")));
        let client = client_with(&transport, Some("old-token"));

        let mut pending = PendingRequest::new(ApiRequest::get("/chat/my/rooms"));
        client.attach(&mut pending);
        assert_eq!(pending.attempt(), 0);

        match client
            .handle_response(pending, status(401))
            .await
            .expect("reissue should succeed")
        {
            ResponseStep::Replay(replay) => {
                assert!(replay.is_replay());
                assert_eq!(replay.attempt(), 1);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_401s_share_one_reissue() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.accept_token("new-token");
        transport.set_reissue_delay(std::time::Duration::from_millis(300));
        transport.push_reissue(Ok(ok_with_token("new-token")));
        let client = client_with(&transport, Some("old-token"));

        let calls = (0..4).map(|room| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .send(ApiRequest::get(format!("/chat/history/{room}")))
                    .await
            })
        });
        for handle in calls.collect::<Vec<_>>() {
            handle
                .await
                .expect("task should not panic")
                .expect("every caller should see the replay succeed");
        }

        assert_eq!(transport.reissue_calls(), 1);
        assert_eq!(transport.api_calls(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_response(Err(BackendError::new(
            BackendErrorCategory::Network,
            "transport_error",
            "request timed out",
        )));
        let client = client_with(&transport, Some("abc"));

        let err = client
            .send(ApiRequest::get("/chat/my/rooms"))
            .await
            .expect_err("timeout should surface");
        assert_eq!(err.code, "transport_error");
        assert_eq!(transport.api_calls(), 1);
    }
}
