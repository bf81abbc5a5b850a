//! REST side of the client: the authenticated request pipeline with
//! single-flight token reissue, the health probe, and typed endpoints.

pub mod api;
pub mod config;
pub mod health;
pub mod pipeline;
pub mod reissue;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use api::{ChatApi, DEFAULT_PAGE_SIZE, OAuthRedirect, SessionApi, missing_access_token};
pub use config::{ConfigError, EndpointConfig};
pub use health::HealthProbe;
pub use pipeline::{AuthenticatedClient, PendingRequest, ResponseStep};
pub use reissue::{ACCESS_TOKEN_HEADER, Reissuer};
pub use transport::{
    ApiRequest, ApiResponse, HttpTransport, MultipartPart, RequestBody, ReqwestTransport,
};
