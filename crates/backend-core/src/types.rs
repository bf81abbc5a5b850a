use serde::{Deserialize, Serialize};

/// Connection state of one chat room session reported to the frontend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// Pre-flight health probe is running.
    Checking,
    /// Transport is open (or opening) and the STOMP handshake is pending.
    Connecting,
    /// STOMP session is established and the room topic is subscribed.
    Connected,
    /// Last probe, handshake or transport failed.
    Error,
    /// Session was torn down on request.
    Disconnected,
}

/// Credential fields persisted in the durable key-value store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CredentialPair {
    /// Short-lived bearer credential.
    pub access_token: Option<String>,
    /// Refresh credential when the login response exposes it.
    ///
    /// The reissue exchange itself relies on the HTTP-only cookie.
    pub refresh_token: Option<String>,
    /// Email of the logged-in member.
    pub email: Option<String>,
    /// Role claim of the logged-in member, for example `ROLE_USER`.
    pub role: Option<String>,
}

impl CredentialPair {
    /// Access token, ignoring empty values.
    pub fn bearer(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }

    /// Whether a non-empty access token is present.
    pub fn is_logged_in(&self) -> bool {
        self.bearer().is_some()
    }
}

/// Chat message kind carried by the broker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChatMessageType {
    Enter,
    Talk,
    Leave,
}

/// Message delivered by the room subscription or loaded from history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<ChatMessageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
    pub sender_email: String,
    pub message: String,
    /// Server-assigned timestamp, left as the raw string the server sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

/// Body published to a room destination. The server fills in the timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingChatMessage {
    pub sender_email: String,
    pub message: String,
    /// Only the demo room expects the room id inside the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
}

/// Commands accepted by a chat session runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatCommand {
    /// Run the probe/connect sequence. No-op when already connected.
    Connect,
    /// Publish a message to the room.
    Send {
        /// Raw input text; trimmed emptiness is rejected locally.
        body: String,
    },
    /// Mark the room read (best effort) and tear the session down.
    Disconnect,
    /// User-requested restart of the full sequence with a fresh attempt budget.
    RetryConnection,
}

/// Events emitted by a chat session runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatEvent {
    /// Connection state transition.
    StateChanged {
        state: ConnectionState,
        reconnect_attempt: u32,
    },
    /// History replaced the message log.
    HistoryLoaded { messages: Vec<ChatMessage> },
    /// A subscription delivery was appended to the message log.
    MessageReceived(ChatMessage),
    /// A message was handed to the transport; the input may be cleared.
    MessageSent { body: String },
    /// A send request was rejected before reaching the network.
    SendRejected { code: String },
    /// A reconnect attempt was scheduled.
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    /// Automatic reconnection gave up; only `RetryConnection` restarts it.
    ReconnectExhausted { attempts: u32 },
    /// The session needs a fresh login; `return_to` is the originating view.
    LoginRequired { return_to: String },
    /// Error surfaced to the user.
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
}

/// Page metadata returned by paginated list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub size: u32,
    pub total_pages: u32,
    pub total: u64,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub has_previous: bool,
}

/// Lightweight chat room row for room lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomSummary {
    pub room_id: i64,
    pub room_name: Option<String>,
    /// `Y` for group rooms, `N` for private ones. Absent in public listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_group_chat: Option<String>,
    #[serde(default, alias = "unReadCount")]
    pub unread_count: u64,
}

impl ChatRoomSummary {
    pub fn is_group(&self) -> bool {
        self.is_group_chat.as_deref() != Some("N")
    }
}

/// One page of chat rooms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomPage {
    #[serde(default)]
    pub rooms: Vec<ChatRoomSummary>,
    #[serde(default)]
    pub page_info: PageInfo,
}
