//! Typed endpoints used by the chat views and the login flow.

use std::sync::Arc;

use backend_core::{
    AccessClaims, BackendError, BackendErrorCategory, ChatMessage, ChatRoomPage, CredentialPair,
};
use backend_platform::AuthStore;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    pipeline::AuthenticatedClient,
    reissue::ACCESS_TOKEN_HEADER,
    transport::{ApiRequest, HttpTransport},
};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Chat REST endpoints. Every call goes through the authenticated pipeline.
#[derive(Clone)]
pub struct ChatApi {
    client: AuthenticatedClient,
}

impl ChatApi {
    pub fn new(client: AuthenticatedClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    /// Stored messages of a room, oldest first.
    pub async fn history(&self, room_id: i64) -> Result<Vec<ChatMessage>, BackendError> {
        self.require_token()?;
        let messages: Vec<ChatMessage> = self
            .client
            .send_json(ApiRequest::get(format!("/chat/history/{room_id}")))
            .await?;
        debug!(room_id, count = messages.len(), "loaded chat history");
        Ok(messages)
    }

    pub async fn mark_read(&self, room_id: i64) -> Result<(), BackendError> {
        self.require_token()?;
        self.client
            .send_unit(ApiRequest::post(format!("/chat/room/{room_id}/read")))
            .await
    }

    pub async fn group_rooms(
        &self,
        page: u32,
        size: u32,
        keyword: Option<&str>,
    ) -> Result<ChatRoomPage, BackendError> {
        let request = with_keyword(
            ApiRequest::get("/chat/room/group/list")
                .query("page", page)
                .query("size", size),
            keyword,
        );
        self.client.send_json(request).await
    }

    /// Rooms the member takes part in, with unread counts.
    pub async fn my_rooms(
        &self,
        page: u32,
        size: u32,
        keyword: Option<&str>,
    ) -> Result<ChatRoomPage, BackendError> {
        let request = with_keyword(
            ApiRequest::get("/chat/my/rooms")
                .query("page", page)
                .query("size", size),
            keyword,
        );
        self.client.send_json(request).await
    }

    pub async fn create_group_room(&self, room_name: &str) -> Result<(), BackendError> {
        let room_name = room_name.trim();
        if room_name.is_empty() {
            return Err(BackendError::new(
                BackendErrorCategory::Validation,
                "empty_room_name",
                "room name must not be empty",
            ));
        }
        self.client
            .send_unit(ApiRequest::post("/chat/room/group/create").query("roomName", room_name))
            .await
    }

    pub async fn join_group_room(&self, room_id: i64) -> Result<(), BackendError> {
        self.client
            .send_unit(ApiRequest::post(format!("/chat/room/group/{room_id}/join")))
            .await
    }

    pub async fn leave_group_room(&self, room_id: i64) -> Result<(), BackendError> {
        self.client
            .send_unit(ApiRequest::delete(format!("/chat/room/group/{room_id}/leave")))
            .await
    }

    /// Open (or find) the one-to-one room with another member; returns its id.
    pub async fn create_private_room(&self, other_member_id: i64) -> Result<i64, BackendError> {
        self.client
            .send_json(
                ApiRequest::post("/chat/room/private/create").query("otherMemberId", other_member_id),
            )
            .await
    }

    fn require_token(&self) -> Result<(), BackendError> {
        if self.client.auth().access_token().is_some() {
            return Ok(());
        }
        Err(missing_access_token())
    }
}

/// Error for calls that need a credential when none is stored.
pub fn missing_access_token() -> BackendError {
    let mut err = BackendError::new(
        BackendErrorCategory::Auth,
        "missing_access_token",
        "no access token stored, please log in",
    );
    err.http_status = Some(401);
    err
}

fn with_keyword(request: ApiRequest, keyword: Option<&str>) -> ApiRequest {
    match keyword.map(str::trim).filter(|keyword| !keyword.is_empty()) {
        Some(keyword) => request.query("keyword", keyword),
        None => request,
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoginResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    email: Option<String>,
    role: Option<String>,
}

/// Query parameters the OAuth provider redirect lands with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthRedirect {
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Credential lifecycle: login, OAuth completion and logout.
///
/// These calls talk to the transport directly; a 401 here means bad
/// credentials, not an expired token.
#[derive(Clone)]
pub struct SessionApi {
    transport: Arc<dyn HttpTransport>,
    auth: AuthStore,
}

impl SessionApi {
    pub fn new(transport: Arc<dyn HttpTransport>, auth: AuthStore) -> Self {
        Self { transport, auth }
    }

    /// Form login. Persists and returns the credential pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<CredentialPair, BackendError> {
        let request = ApiRequest::post("/login").form([("email", email), ("password", password)]);
        let response = self.transport.execute(&request).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }

        let body: LoginResponse = if response.body.is_empty() {
            LoginResponse::default()
        } else {
            response.json()?
        };
        let access_token = body
            .access_token
            .or_else(|| response.header_str(ACCESS_TOKEN_HEADER).map(str::to_owned))
            .ok_or_else(|| {
                BackendError::new(
                    BackendErrorCategory::Protocol,
                    "login_token_missing",
                    "login succeeded but no access token was returned",
                )
            })?;

        let credentials = CredentialPair {
            role: body.role.or_else(|| role_claim(&access_token)),
            email: body.email.or_else(|| Some(email.to_owned())),
            refresh_token: body.refresh_token,
            access_token: Some(access_token),
        };
        self.auth.set_credentials(credentials.clone())?;
        info!(role = credentials.role.as_deref().unwrap_or("-"), "logged in");
        Ok(credentials)
    }

    /// Trade the post-OAuth cookie for an access token header.
    pub async fn complete_oauth(&self, redirect: &OAuthRedirect) -> Result<CredentialPair, BackendError> {
        let response = self
            .transport
            .execute(&ApiRequest::post("/oauth2-jwt-header"))
            .await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        let token = response
            .header_str(ACCESS_TOKEN_HEADER)
            .map(str::to_owned)
            .ok_or_else(|| {
                BackendError::new(
                    BackendErrorCategory::Protocol,
                    "oauth_token_missing",
                    "server did not return an access token",
                )
            })?;

        let claims = match AccessClaims::decode(&token) {
            Ok(claims) => Some(claims),
            Err(err) => {
                warn!(code = %err.code, "could not decode OAuth access token claims");
                None
            }
        };
        let email = redirect
            .email
            .clone()
            .or_else(|| claims.as_ref().and_then(AccessClaims::email_or_oauth_alias))
            .or_else(|| {
                redirect
                    .name
                    .as_ref()
                    .map(|name| format!("{}@oauth.user", name.replacen(' ', ".", 1)))
            });
        let role = claims
            .and_then(|claims| claims.role)
            .or_else(|| Some("USER".to_owned()));

        let credentials = CredentialPair {
            access_token: Some(token),
            refresh_token: None,
            email,
            role,
        };
        self.auth.set_credentials(credentials.clone())?;
        info!("completed OAuth login");
        Ok(credentials)
    }

    /// Invalidate the refresh cookie server-side. Local credentials are
    /// cleared whatever the server answers.
    pub async fn logout(&self) -> Result<(), BackendError> {
        let outcome = match self.transport.execute(&ApiRequest::post("/auth/logout")).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(response.into_error()),
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            warn!(code = %err.code, "server logout failed; clearing local credentials anyway");
        }
        self.auth.clear()?;
        info!("logged out");
        outcome
    }
}

fn role_claim(token: &str) -> Option<String> {
    AccessClaims::decode(token).ok().and_then(|claims| claims.role)
}
