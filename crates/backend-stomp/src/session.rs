//! Realtime chat session for one room.
//!
//! The session runs as a spawned task that owns the STOMP link, the
//! connection state machine and the message log. Frontends drive it through
//! [`ChatSessionHandle`] and observe it through the event stream.

use std::{future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use backend_core::{
    AccessClaims, BackendChannelError, BackendChannels, BackendError, BackendErrorCategory,
    ChatCommand, ChatEvent, ChatMessage, ChatStateMachine, CloseOutcome, ConnectionState,
    EventEmitter, EventStream, MessageLog, OutgoingChatMessage, RetryPolicy,
    normalize_session_error,
};
use backend_platform::AuthStore;
use backend_rest::{ChatApi, HealthProbe};
use tokio::{
    sync::{mpsc, oneshot},
    time::Sleep,
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    frame::{Command, Frame, decode_all},
    transport::{Connector, TransportEvent},
};

pub const DEFAULT_MESSAGE_LOG_MAX: usize = 1_000;
const DEMO_ROOM_ID: i64 = 1;
const SUBSCRIPTION_ID: &str = "sub-0";
const GUEST_SENDER: &str = "guest";

/// Per-room session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSessionConfig {
    pub room_id: i64,
    pub max_reconnect_attempts: u32,
    pub message_log_max: usize,
    /// Demo rooms skip the health probe, the history preload and the token
    /// requirement.
    pub demo_mode: bool,
    /// View to return to after a forced re-login.
    pub origin_path: String,
    /// Value of the STOMP `host` header.
    pub host: String,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl ChatSessionConfig {
    pub fn for_room(room_id: i64) -> Self {
        Self {
            room_id,
            max_reconnect_attempts: RetryPolicy::reconnect().max_attempts(),
            message_log_max: DEFAULT_MESSAGE_LOG_MAX,
            demo_mode: false,
            origin_path: format!("/chat/{room_id}"),
            host: "localhost".to_owned(),
            command_buffer: 64,
            event_buffer: 256,
        }
    }

    pub fn demo() -> Self {
        Self {
            demo_mode: true,
            origin_path: "/simple-chat".to_owned(),
            ..Self::for_room(DEMO_ROOM_ID)
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn topic(&self) -> String {
        format!("/topic/{}", self.room_id)
    }

    pub fn publish_destination(&self) -> String {
        format!("/publish/{}", self.room_id)
    }
}

/// REST calls the session makes around the socket.
#[async_trait]
pub trait RoomServices: Send + Sync {
    async fn probe_health(&self, bearer: Option<&str>) -> Result<(), BackendError>;
    async fn load_history(&self, room_id: i64) -> Result<Vec<ChatMessage>, BackendError>;
    async fn mark_read(&self, room_id: i64) -> Result<(), BackendError>;
}

/// [`RoomServices`] backed by the health probe and the authenticated pipeline.
#[derive(Clone)]
pub struct RestRoomServices {
    probe: HealthProbe,
    api: ChatApi,
}

impl RestRoomServices {
    pub fn new(probe: HealthProbe, api: ChatApi) -> Self {
        Self { probe, api }
    }
}

#[async_trait]
impl RoomServices for RestRoomServices {
    async fn probe_health(&self, bearer: Option<&str>) -> Result<(), BackendError> {
        self.probe.check(bearer).await
    }

    async fn load_history(&self, room_id: i64) -> Result<Vec<ChatMessage>, BackendError> {
        self.api.history(room_id).await
    }

    async fn mark_read(&self, room_id: i64) -> Result<(), BackendError> {
        self.api.mark_read(room_id).await
    }
}

/// Collaborators injected into a session runtime.
#[derive(Clone)]
pub struct SessionDeps {
    pub services: Arc<dyn RoomServices>,
    pub connector: Arc<dyn Connector>,
    pub auth: AuthStore,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub reconnect_attempt: u32,
    pub messages: Vec<ChatMessage>,
}

enum SessionCommand {
    Chat(ChatCommand),
    DisconnectAndWait { done: oneshot::Sender<()> },
    Snapshot { reply: oneshot::Sender<SessionSnapshot> },
}

/// Cloneable handle to a running chat session.
///
/// The runtime stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct ChatSessionHandle {
    channels: BackendChannels<SessionCommand>,
    _shutdown: Arc<DropGuard>,
}

impl ChatSessionHandle {
    pub async fn send(&self, command: ChatCommand) -> Result<(), BackendChannelError> {
        self.channels.send_command(SessionCommand::Chat(command)).await
    }

    pub async fn connect(&self) -> Result<(), BackendChannelError> {
        self.send(ChatCommand::Connect).await
    }

    pub async fn send_message(&self, body: impl Into<String>) -> Result<(), BackendChannelError> {
        self.send(ChatCommand::Send { body: body.into() }).await
    }

    pub async fn retry(&self) -> Result<(), BackendChannelError> {
        self.send(ChatCommand::RetryConnection).await
    }

    /// Mark the room read, close the link and wait until both are done.
    pub async fn disconnect(&self) -> Result<(), BackendChannelError> {
        let (done, finished) = oneshot::channel();
        self.channels
            .send_command(SessionCommand::DisconnectAndWait { done })
            .await?;
        finished
            .await
            .map_err(|_| BackendChannelError::CommandChannelClosed)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, BackendChannelError> {
        let (reply, answer) = oneshot::channel();
        self.channels
            .send_command(SessionCommand::Snapshot { reply })
            .await?;
        answer
            .await
            .map_err(|_| BackendChannelError::CommandChannelClosed)
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }
}

/// Spawn a session runtime on the current tokio runtime.
///
/// The session stays idle in `Checking` until it receives `Connect`.
pub fn spawn_chat_session(config: ChatSessionConfig, deps: SessionDeps) -> ChatSessionHandle {
    let (channels, command_rx) = BackendChannels::new(config.command_buffer, config.event_buffer);
    let shutdown = CancellationToken::new();
    let runtime = ChatSessionRuntime::new(
        config,
        deps,
        channels.emitter(),
        command_rx,
        shutdown.clone(),
    );
    tokio::spawn(async move {
        runtime.run().await;
    });

    ChatSessionHandle {
        channels,
        _shutdown: Arc::new(shutdown.drop_guard()),
    }
}

struct ActiveLink {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<TransportEvent>,
    /// CONNECTED was received on this link.
    session_open: bool,
}

struct ChatSessionRuntime {
    config: ChatSessionConfig,
    services: Arc<dyn RoomServices>,
    connector: Arc<dyn Connector>,
    auth: AuthStore,
    events: EventEmitter,
    command_rx: mpsc::Receiver<SessionCommand>,
    shutdown: CancellationToken,
    machine: ChatStateMachine,
    log: MessageLog,
    link: Option<ActiveLink>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
}

impl ChatSessionRuntime {
    fn new(
        config: ChatSessionConfig,
        deps: SessionDeps,
        events: EventEmitter,
        command_rx: mpsc::Receiver<SessionCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        let policy = RetryPolicy::reconnect().with_max_attempts(config.max_reconnect_attempts);
        Self {
            machine: ChatStateMachine::new(policy),
            log: MessageLog::new(config.message_log_max),
            config,
            services: deps.services,
            connector: deps.connector,
            auth: deps.auth,
            events,
            command_rx,
            shutdown,
            link: None,
            reconnect_timer: None,
        }
    }

    async fn run(mut self) {
        loop {
            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = next_link_event(&mut self.link) => self.handle_link_event(event).await,
                _ = reconnect_due(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.open_transport().await
                }
            };
            if let Err(err) = result {
                warn!(room_id = self.config.room_id, code = %err.code, "chat session error");
                self.events
                    .emit(normalize_session_error(err, &self.config.origin_path));
            }
        }
        self.teardown().await;
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Result<(), BackendError> {
        match command {
            SessionCommand::Chat(ChatCommand::Connect) => self.connect().await,
            SessionCommand::Chat(ChatCommand::Send { body }) => self.send_message(body).await,
            SessionCommand::Chat(ChatCommand::Disconnect) => self.disconnect().await,
            SessionCommand::Chat(ChatCommand::RetryConnection) => self.retry().await,
            SessionCommand::DisconnectAndWait { done } => {
                let result = self.disconnect().await;
                let _ = done.send(());
                result
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(SessionSnapshot {
                    state: self.machine.state(),
                    reconnect_attempt: self.machine.reconnect_attempt(),
                    messages: self.log.items().to_vec(),
                });
                Ok(())
            }
        }
    }

    async fn connect(&mut self) -> Result<(), BackendError> {
        match self.machine.state() {
            ConnectionState::Checking | ConnectionState::Disconnected => {
                self.run_connect_sequence().await
            }
            state => {
                debug!(room_id = self.config.room_id, ?state, "connect ignored");
                Ok(())
            }
        }
    }

    async fn retry(&mut self) -> Result<(), BackendError> {
        info!(room_id = self.config.room_id, "retrying chat connection");
        self.reconnect_timer = None;
        self.close_link().await;
        self.machine.retry();
        self.run_connect_sequence().await
    }

    /// Probe, preload history, then open the transport.
    async fn run_connect_sequence(&mut self) -> Result<(), BackendError> {
        let bearer = self.auth.access_token();
        if bearer.is_none() && !self.config.demo_mode {
            return self.require_login("no access token stored");
        }

        let event = self.machine.begin_check()?;
        self.events.emit(event);

        if !self.config.demo_mode {
            let probe = self.services.probe_health(bearer.as_deref());
            let Some(probed) = or_shutdown(&self.shutdown, probe).await else {
                return Ok(());
            };
            if let Err(err) = probed {
                warn!(room_id = self.config.room_id, error = %err.message, "health probe failed");
                let event = self.machine.on_health_result(false)?;
                self.events.emit(event);
                self.events.emit(ChatEvent::Error {
                    code: "health_check_failed".to_owned(),
                    message: err.message,
                    recoverable: true,
                });
                return Ok(());
            }
        }
        let event = self.machine.on_health_result(true)?;
        self.events.emit(event);

        if !self.config.demo_mode {
            let history = self.services.load_history(self.config.room_id);
            match or_shutdown(&self.shutdown, history).await {
                None => return Ok(()),
                Some(Ok(messages)) => {
                    debug!(room_id = self.config.room_id, count = messages.len(), "history loaded");
                    self.log.replace_all(messages);
                    self.events.emit(ChatEvent::HistoryLoaded {
                        messages: self.log.items().to_vec(),
                    });
                }
                Some(Err(err)) if err.is_unauthorized() => {
                    let event = self.machine.on_fatal();
                    self.events.emit(event);
                    self.events
                        .emit(normalize_session_error(err, &self.config.origin_path));
                    return Ok(());
                }
                Some(Err(err)) => {
                    warn!(room_id = self.config.room_id, code = %err.code, "history preload failed");
                    self.log.clear();
                }
            }
        }

        self.open_transport().await
    }

    /// Open a fresh link and send CONNECT. The session is established once
    /// the broker answers CONNECTED.
    async fn open_transport(&mut self) -> Result<(), BackendError> {
        self.reconnect_timer = None;
        self.close_link().await;

        if self.machine.state() != ConnectionState::Connecting {
            let event = self.machine.begin_connect()?;
            self.events.emit(event);
        }

        let bearer = self.auth.access_token();
        if bearer.is_none() && !self.config.demo_mode {
            return self.require_login("access token cleared before connect");
        }

        info!(
            room_id = self.config.room_id,
            attempt = self.machine.reconnect_attempt(),
            "opening chat transport"
        );
        let Some(opened) = or_shutdown(&self.shutdown, self.connector.open()).await else {
            return Ok(());
        };
        let link = match opened {
            Ok(link) => link,
            Err(err) => {
                warn!(room_id = self.config.room_id, error = %err.message, "chat transport failed to open");
                return self.on_transport_lost(Some(err.message));
            }
        };

        let handshake = Frame::connect(&self.config.host, bearer.as_deref()).encode();
        if link.outbound.send(handshake).await.is_err() {
            return self.on_transport_lost(Some("socket closed before handshake".to_owned()));
        }
        self.link = Some(ActiveLink {
            outbound: link.outbound,
            inbound: link.inbound,
            session_open: false,
        });
        Ok(())
    }

    async fn handle_link_event(&mut self, event: TransportEvent) -> Result<(), BackendError> {
        match event {
            TransportEvent::Text(text) => {
                let frames = decode_all(&text).map_err(|err| {
                    BackendError::new(BackendErrorCategory::Protocol, "invalid_frame", err.to_string())
                })?;
                for frame in frames {
                    self.handle_frame(frame).await?;
                }
                Ok(())
            }
            TransportEvent::Closed { reason } => {
                debug!(room_id = self.config.room_id, ?reason, "chat transport closed");
                self.on_transport_lost(reason)
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), BackendError> {
        match frame.command {
            Command::Connected => self.on_session_open().await,
            Command::Message => {
                self.on_delivery(&frame);
                Ok(())
            }
            Command::Error => {
                let message = frame.get("message").unwrap_or("broker error").to_owned();
                warn!(room_id = self.config.room_id, %message, "broker sent ERROR frame");
                self.events.emit(ChatEvent::Error {
                    code: "stomp_error".to_owned(),
                    message: message.clone(),
                    recoverable: true,
                });
                self.on_transport_lost(Some(message))
            }
            Command::Receipt => {
                debug!(room_id = self.config.room_id, receipt = ?frame.get("receipt-id"), "receipt");
                Ok(())
            }
            other => {
                debug!(room_id = self.config.room_id, command = %other, "ignoring frame");
                Ok(())
            }
        }
    }

    async fn on_session_open(&mut self) -> Result<(), BackendError> {
        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };
        if link.session_open {
            return Ok(());
        }
        link.session_open = true;
        let outbound = link.outbound.clone();

        let event = self.machine.on_connected()?;
        self.events.emit(event);

        let topic = self.config.topic();
        let bearer = self.auth.access_token();
        let subscribe = Frame::subscribe(SUBSCRIPTION_ID, &topic, bearer.as_deref()).encode();
        if outbound.send(subscribe).await.is_err() {
            return self.on_transport_lost(Some("socket closed before subscribe".to_owned()));
        }
        info!(room_id = self.config.room_id, %topic, "chat session established");
        Ok(())
    }

    fn on_delivery(&mut self, frame: &Frame) {
        if let Some(destination) = frame.get("destination")
            && destination != self.config.topic()
        {
            debug!(room_id = self.config.room_id, %destination, "delivery for another destination");
            return;
        }
        match serde_json::from_str::<ChatMessage>(&frame.body) {
            Ok(message) => {
                self.log.append(message.clone());
                self.events.emit(ChatEvent::MessageReceived(message));
            }
            Err(err) => {
                warn!(room_id = self.config.room_id, error = %err, "dropping undecodable chat message");
            }
        }
    }

    /// The link is gone (or never came up): count the attempt and schedule
    /// the next one while the budget lasts.
    fn on_transport_lost(&mut self, reason: Option<String>) -> Result<(), BackendError> {
        self.link = None;
        if self.machine.state() == ConnectionState::Disconnected {
            return Ok(());
        }

        let (event, outcome) = self.machine.on_transport_closed()?;
        self.events.emit(event);
        match outcome {
            CloseOutcome::Reconnect { attempt, delay } => {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                info!(room_id = self.config.room_id, attempt, delay_ms, ?reason, "reconnect scheduled");
                self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
                self.events
                    .emit(ChatEvent::ReconnectScheduled { attempt, delay_ms });
            }
            CloseOutcome::Exhausted { attempts } => {
                warn!(room_id = self.config.room_id, attempts, ?reason, "reconnect attempts exhausted");
                self.reconnect_timer = None;
                self.events.emit(ChatEvent::ReconnectExhausted { attempts });
                self.events.emit(ChatEvent::Error {
                    code: "reconnect_exhausted".to_owned(),
                    message: format!("gave up after {attempts} reconnect attempts"),
                    recoverable: false,
                });
            }
        }
        Ok(())
    }

    async fn send_message(&mut self, body: String) -> Result<(), BackendError> {
        if body.trim().is_empty() {
            self.reject_send("empty_message");
            return Ok(());
        }
        if !self.machine.can_send() {
            self.reject_send("not_connected");
            return self.connect_on_demand().await;
        }

        let bearer = self.auth.access_token();
        if bearer.is_none() && !self.config.demo_mode {
            self.reject_send("missing_access_token");
            self.events.emit(ChatEvent::LoginRequired {
                return_to: self.config.origin_path.clone(),
            });
            return Ok(());
        }
        let Some(outbound) = self.link.as_ref().map(|link| link.outbound.clone()) else {
            self.reject_send("not_connected");
            return Ok(());
        };

        let payload = OutgoingChatMessage {
            sender_email: self.sender_email(bearer.as_deref()),
            message: body.clone(),
            room_id: self.config.demo_mode.then_some(self.config.room_id),
        };
        let json = serde_json::to_string(&payload).map_err(|err| {
            BackendError::new(BackendErrorCategory::Serialization, "serialize_failed", err.to_string())
        })?;
        let frame = Frame::send_json(&self.config.publish_destination(), bearer.as_deref(), json);
        if outbound.send(frame.encode()).await.is_err() {
            self.reject_send("transport_error");
            return self.on_transport_lost(Some("socket closed during send".to_owned()));
        }

        debug!(room_id = self.config.room_id, "message published");
        self.events.emit(ChatEvent::MessageSent { body });
        Ok(())
    }

    /// A send arrived while not connected: start an attempt now instead.
    async fn connect_on_demand(&mut self) -> Result<(), BackendError> {
        if self.link.is_some() {
            debug!(room_id = self.config.room_id, "connect already in progress");
            return Ok(());
        }
        match self.machine.state() {
            ConnectionState::Checking | ConnectionState::Disconnected => {
                self.run_connect_sequence().await
            }
            ConnectionState::Error if self.machine.requires_retry() => {
                warn!(room_id = self.config.room_id, "chat session halted; retry required");
                Ok(())
            }
            _ => self.open_transport().await,
        }
    }

    async fn disconnect(&mut self) -> Result<(), BackendError> {
        self.reconnect_timer = None;
        if self.machine.state() == ConnectionState::Disconnected {
            return Ok(());
        }

        if self.link.is_some()
            && !self.config.demo_mode
            && let Err(err) = self.services.mark_read(self.config.room_id).await
        {
            warn!(room_id = self.config.room_id, code = %err.code, "mark read failed");
        }
        self.close_link().await;

        let event = self.machine.on_disconnect();
        self.events.emit(event);
        info!(room_id = self.config.room_id, "chat session disconnected");
        Ok(())
    }

    async fn teardown(&mut self) {
        self.reconnect_timer = None;
        self.close_link().await;
        if self.machine.state() != ConnectionState::Disconnected {
            let event = self.machine.on_disconnect();
            self.events.emit(event);
        }
        debug!(room_id = self.config.room_id, "chat session runtime stopped");
    }

    /// Say goodbye on an established session; dropping the link closes the socket.
    async fn close_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        if link.session_open {
            let receipt = format!("disconnect-{}", Uuid::new_v4());
            if link
                .outbound
                .send(Frame::disconnect(&receipt).encode())
                .await
                .is_err()
            {
                debug!(room_id = self.config.room_id, "socket already closed");
            }
        }
    }

    fn require_login(&mut self, reason: &str) -> Result<(), BackendError> {
        warn!(room_id = self.config.room_id, reason, "login required");
        let event = self.machine.on_fatal();
        self.events.emit(event);
        self.events.emit(ChatEvent::LoginRequired {
            return_to: self.config.origin_path.clone(),
        });
        Ok(())
    }

    fn reject_send(&self, code: &str) {
        debug!(room_id = self.config.room_id, code, "send rejected");
        self.events.emit(ChatEvent::SendRejected {
            code: code.to_owned(),
        });
    }

    fn sender_email(&self, bearer: Option<&str>) -> String {
        self.auth
            .email()
            .or_else(|| {
                bearer
                    .and_then(|token| AccessClaims::decode(token).ok())
                    .and_then(|claims| claims.email_or_oauth_alias())
            })
            .unwrap_or_else(|| GUEST_SENDER.to_owned())
    }
}

async fn next_link_event(link: &mut Option<ActiveLink>) -> TransportEvent {
    match link {
        Some(link) => link
            .inbound
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed { reason: None }),
        None => std::future::pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn or_shutdown<T>(shutdown: &CancellationToken, work: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        output = work => Some(output),
    }
}
