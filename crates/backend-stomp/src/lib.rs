//! Realtime side of the client: STOMP 1.2 framing over a WebSocket link and
//! the per-room chat session runtime with capped exponential reconnects.

pub mod frame;
pub mod session;
pub mod transport;

pub use frame::{ACCEPT_VERSION, Command, Frame, FrameError, decode_all};
pub use session::{
    ChatSessionConfig, ChatSessionHandle, DEFAULT_MESSAGE_LOG_MAX, RestRoomServices,
    RoomServices, SessionDeps, SessionSnapshot, spawn_chat_session,
};
pub use transport::{Connector, RemoteEnd, TransportEvent, TransportLink, WebSocketConnector};
