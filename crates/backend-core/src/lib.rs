//! Core client contract shared between the session runtimes and frontend consumers.
//!
//! This crate defines the chat command/event protocol, the connection
//! lifecycle model, retry and message-log helpers, and the common
//! error/channel abstractions. It performs no I/O.

/// Async command/event channel primitives.
pub mod channel;
/// Stable backend error types and HTTP classification helpers.
pub mod error;
/// Error-to-event normalization helpers (for example login redirects).
pub mod normalization;
/// Backoff policy used by retry loops.
pub mod retry;
/// Chat connection state machine.
pub mod state_machine;
/// Append-only message log.
pub mod timeline;
/// Access-token claim inspection.
pub mod token;
/// Frontend-facing protocol types (commands, events, payloads).
pub mod types;

pub use channel::{BackendChannelError, BackendChannels, EventEmitter, EventStream};
pub use error::{BackendError, BackendErrorCategory, classify_http_status};
pub use normalization::{
    LoginRedirect, normalize_auth_failure, normalize_error_event, normalize_session_error,
};
pub use retry::RetryPolicy;
pub use state_machine::{ChatStateMachine, CloseOutcome};
pub use timeline::MessageLog;
pub use token::AccessClaims;
pub use types::{
    ChatCommand, ChatEvent, ChatMessage, ChatMessageType, ChatRoomPage, ChatRoomSummary,
    ConnectionState, CredentialPair, OutgoingChatMessage, PageInfo,
};
