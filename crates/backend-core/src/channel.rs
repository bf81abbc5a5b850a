use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{ChatCommand, ChatEvent};

/// Receiver end handed to each frontend that wants session events.
pub type EventStream = broadcast::Receiver<ChatEvent>;

#[derive(Debug, Error)]
pub enum BackendChannelError {
    /// The session runtime has stopped reading commands.
    #[error("chat session is no longer accepting commands")]
    CommandChannelClosed,
}

/// Bounded command queue into a session runtime plus the event fan-out
/// coming back from it.
pub struct BackendChannels<C = ChatCommand> {
    command_tx: mpsc::Sender<C>,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl<C> Clone for BackendChannels<C> {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<C> std::fmt::Debug for BackendChannels<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendChannels")
            .field("command_tx", &self.command_tx)
            .field("event_tx", &self.event_tx)
            .finish()
    }
}

impl<C> BackendChannels<C> {
    /// Zero buffer sizes are bumped to one.
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<C>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Clone the command sender.
    pub fn command_sender(&self) -> mpsc::Sender<C> {
        self.command_tx.clone()
    }

    /// New receiver for events emitted from now on.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Waits for queue space when the runtime is behind.
    pub async fn send_command(&self, command: C) -> Result<(), BackendChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| BackendChannelError::CommandChannelClosed)
    }

    /// Having no subscribers is not an error.
    pub fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Emit side only. Holding it does not keep the command queue open, so
    /// the runtime sees `None` once every handle is dropped.
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            event_tx: self.event_tx.clone(),
        }
    }
}

/// Emit half of [`BackendChannels`], held by the session runtime.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    event_tx: broadcast::Sender<ChatEvent>,
}

impl EventEmitter {
    /// Broadcast to current subscribers, if any.
    pub fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }

    /// New receiver for events emitted from now on.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionState;

    #[tokio::test]
    async fn commands_arrive_in_order() {
        let (channels, mut rx) = BackendChannels::<ChatCommand>::new(8, 8);
        channels.send_command(ChatCommand::Connect).await.unwrap();
        channels
            .send_command(ChatCommand::Send { body: "hi".into() })
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(ChatCommand::Connect)));
        match rx.recv().await {
            Some(ChatCommand::Send { body }) => assert_eq!(body, "hi"),
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn emitter_reaches_handle_subscribers() {
        let (channels, _rx) = BackendChannels::<ChatCommand>::new(4, 16);
        let mut ui = channels.subscribe();
        let emitter = channels.emitter();

        let event = ChatEvent::ReconnectScheduled {
            attempt: 2,
            delay_ms: 2_000,
        };
        emitter.emit(event.clone());
        assert_eq!(ui.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn receiver_closes_when_only_the_emitter_remains() {
        let (channels, mut rx) = BackendChannels::<ChatCommand>::new(1, 1);
        let emitter = channels.emitter();
        drop(channels);

        assert!(rx.recv().await.is_none());
        emitter.emit(ChatEvent::StateChanged {
            state: ConnectionState::Disconnected,
            reconnect_attempt: 0,
        });
    }

    #[tokio::test]
    async fn stopped_runtime_rejects_commands() {
        let (channels, rx) = BackendChannels::<ChatCommand>::new(1, 1);
        drop(rx);
        let err = channels.send_command(ChatCommand::RetryConnection).await.unwrap_err();
        assert!(matches!(err, BackendChannelError::CommandChannelClosed));
    }
}
