use crate::{error::BackendError, types::ChatEvent};

/// Where the UI should send the user after an unrecoverable auth failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    /// View the user was on, restored after re-authenticating.
    pub return_to: String,
}

/// Map a failed request to a login redirect when the failure is an
/// authorization error that survived the reissue-and-replay step.
pub fn normalize_auth_failure(error: &BackendError, origin_path: &str) -> Option<LoginRedirect> {
    if !error.is_unauthorized() {
        return None;
    }
    Some(LoginRedirect {
        return_to: origin_path.to_owned(),
    })
}

/// Convert an error into a user-facing `Error` event.
pub fn normalize_error_event(error: BackendError) -> ChatEvent {
    let recoverable = error.is_recoverable();
    ChatEvent::Error {
        code: error.code,
        message: error.message,
        recoverable,
    }
}

/// Convert an error into the event the chat view should react to.
///
/// Auth failures become `LoginRequired`, everything else a plain `Error`.
pub fn normalize_session_error(error: BackendError, origin_path: &str) -> ChatEvent {
    match normalize_auth_failure(&error, origin_path) {
        Some(redirect) => ChatEvent::LoginRequired {
            return_to: redirect.return_to,
        },
        None => normalize_error_event(error),
    }
}
