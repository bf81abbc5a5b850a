//! HTTP transport seam: request/response values plus the reqwest implementation.

use async_trait::async_trait;
use backend_core::{BackendError, BackendErrorCategory};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::EndpointConfig;

/// Outbound request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
    /// Multipart upload. The transport chooses the content type and boundary.
    Multipart(Vec<MultipartPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// One API call, relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, BackendError> {
        let value = serde_json::to_value(body).map_err(|err| {
            BackendError::new(
                BackendErrorCategory::Serialization,
                "request_encode_failed",
                err.to_string(),
            )
        })?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.body = RequestBody::Form(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    pub fn multipart(mut self, parts: Vec<MultipartPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, RequestBody::Multipart(_))
    }
}

/// Buffered response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Header value as text; non-UTF-8 and empty values read as absent.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, BackendError> {
        serde_json::from_slice(&self.body).map_err(|err| {
            BackendError::new(
                BackendErrorCategory::Serialization,
                "response_decode_failed",
                format!("unexpected response body: {err}"),
            )
        })
    }

    /// Best human-readable reason for a failed response.
    pub fn error_message(&self) -> String {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&self.body)
            && let Some(message) = value.get("message").and_then(|m| m.as_str())
        {
            return message.to_owned();
        }
        self.status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_owned()
    }

    /// Turn a non-success response into the stable error payload.
    pub fn into_error(self) -> BackendError {
        let retry_after = self
            .header_str(header::RETRY_AFTER.as_str())
            .and_then(|value| value.parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        let mut err = BackendError::http_status(self.status.as_u16(), self.error_message());
        if let Some(retry_after) = retry_after {
            err = err.with_retry_after(retry_after);
        }
        err
    }
}

/// Sends one request and buffers the response.
///
/// Non-success statuses are returned as responses; only failures to get any
/// response at all (connect errors, timeouts) are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError>;
}

/// `reqwest` transport with a cookie store, so the HTTP-only refresh cookie set
/// at login is sent back on the reissue exchange.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    endpoints: EndpointConfig,
}

impl ReqwestTransport {
    pub fn new(endpoints: EndpointConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("boardchat/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .timeout(endpoints.request_timeout)
            .build()
            .map_err(|err| {
                BackendError::new(
                    BackendErrorCategory::Config,
                    "http_client_build_failed",
                    err.to_string(),
                )
            })?;
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }

    fn build(&self, request: &ApiRequest) -> Result<reqwest::RequestBuilder, BackendError> {
        let url = self.endpoints.url(&request.path)?;
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(pairs) => builder.form(pairs),
            RequestBody::Multipart(parts) => builder.multipart(multipart_form(parts)?),
        };
        Ok(builder)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError> {
        let response = self
            .build(request)?
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

fn multipart_form(parts: &[MultipartPart]) -> Result<reqwest::multipart::Form, BackendError> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        let mut body = reqwest::multipart::Part::bytes(part.data.to_vec());
        if let Some(file_name) = &part.file_name {
            body = body.file_name(file_name.clone());
        }
        if let Some(content_type) = &part.content_type {
            body = body.mime_str(content_type).map_err(|err| {
                BackendError::new(
                    BackendErrorCategory::Validation,
                    "invalid_content_type",
                    format!("part '{}': {err}", part.name),
                )
            })?;
        }
        form = form.part(part.name.clone(), body);
    }
    Ok(form)
}

fn map_reqwest_error(err: reqwest::Error) -> BackendError {
    let detail = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    };
    BackendError::new(BackendErrorCategory::Network, "transport_error", detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_server_message() {
        let mut response = ApiResponse::new(StatusCode::BAD_REQUEST);
        response.body = Bytes::from_static(br#"{"message":"room name required"}"#);
        assert_eq!(response.error_message(), "room name required");

        let bare = ApiResponse::new(StatusCode::NOT_FOUND);
        assert_eq!(bare.error_message(), "Not Found");
    }

    #[test]
    fn into_error_carries_status_and_retry_hint() {
        let mut response = ApiResponse::new(StatusCode::TOO_MANY_REQUESTS);
        response
            .headers
            .insert(header::RETRY_AFTER, HeaderValue::from_static("3"));
        let err = response.into_error();
        assert_eq!(err.http_status, Some(429));
        assert_eq!(err.category, BackendErrorCategory::RateLimited);
        assert_eq!(err.retry_after_ms, Some(3_000));
    }

    #[test]
    fn blank_headers_read_as_absent() {
        let mut response = ApiResponse::new(StatusCode::OK);
        response
            .headers
            .insert("access_token", HeaderValue::from_static(""));
        assert_eq!(response.header_str("access_token"), None);
    }

    #[test]
    fn builder_collects_query_and_form() {
        let request = ApiRequest::get("/chat/room/group/list")
            .query("page", 0)
            .query("size", 10);
        assert_eq!(
            request.query,
            vec![
                ("page".to_owned(), "0".to_owned()),
                ("size".to_owned(), "10".to_owned())
            ]
        );

        let login = ApiRequest::post("/login").form([("email", "a@example.com"), ("password", "pw")]);
        assert!(matches!(login.body, RequestBody::Form(ref pairs) if pairs.len() == 2));
        assert!(!login.is_multipart());
    }
}
