use std::time::Duration;

use crate::{
    error::BackendError,
    retry::RetryPolicy,
    types::{ChatEvent, ConnectionState},
};

/// What the runtime should do after the transport went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Schedule a new connect attempt after `delay`.
    Reconnect { attempt: u32, delay: Duration },
    /// The attempt budget is spent; wait for an explicit retry.
    Exhausted { attempts: u32 },
}

/// Connection lifecycle of one chat room session.
#[derive(Debug, Clone)]
pub struct ChatStateMachine {
    state: ConnectionState,
    reconnect_attempt: u32,
    policy: RetryPolicy,
    /// Set when the health check failed or a fresh login is needed; only
    /// a new check clears it.
    halted: bool,
}

impl Default for ChatStateMachine {
    fn default() -> Self {
        Self::new(RetryPolicy::reconnect())
    }
}

impl ChatStateMachine {
    /// Fresh machine in `Checking` with a full attempt budget.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Checking,
            reconnect_attempt: 0,
            policy,
            halted: false,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnects counted since the last successful connect.
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Backoff policy in use.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Publishing is only allowed on an established session.
    pub fn can_send(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether automatic reconnection gave up.
    pub fn is_exhausted(&self) -> bool {
        !self.policy.allows(self.reconnect_attempt)
    }

    /// In `Error` with nothing left to do on its own: the health check failed, a
    /// login is needed, or the budget is spent. Only `retry` moves on.
    pub fn requires_retry(&self) -> bool {
        self.state == ConnectionState::Error && (self.halted || self.is_exhausted())
    }

    /// Start (or restart) the pre-flight health check.
    pub fn begin_check(&mut self) -> Result<ChatEvent, BackendError> {
        let event = self.transition_from_any_of(
            &[
                ConnectionState::Checking,
                ConnectionState::Error,
                ConnectionState::Disconnected,
            ],
            ConnectionState::Checking,
            "begin_check",
        )?;
        self.halted = false;
        Ok(event)
    }

    /// Leave `Checking`: on to `Connecting`, or halt in `Error`.
    pub fn on_health_result(&mut self, healthy: bool) -> Result<ChatEvent, BackendError> {
        let next = if healthy {
            ConnectionState::Connecting
        } else {
            ConnectionState::Error
        };
        let event =
            self.transition_from_any_of(&[ConnectionState::Checking], next, "on_health_result")?;
        self.halted = !healthy;
        Ok(event)
    }

    /// Enter `Connecting` for a first attempt or a scheduled reconnect.
    ///
    /// Refused while halted: the health check has to pass again first.
    pub fn begin_connect(&mut self) -> Result<ChatEvent, BackendError> {
        if self.halted {
            return Err(BackendError::invalid_state(self.state, "begin_connect"));
        }
        self.transition_from_any_of(
            &[
                ConnectionState::Checking,
                ConnectionState::Connecting,
                ConnectionState::Error,
            ],
            ConnectionState::Connecting,
            "begin_connect",
        )
    }

    /// The broker accepted the session.
    pub fn on_connected(&mut self) -> Result<ChatEvent, BackendError> {
        if self.state != ConnectionState::Connecting {
            return Err(BackendError::invalid_state(self.state, "on_connected"));
        }
        self.reconnect_attempt = 0;
        Ok(self.set_state(ConnectionState::Connected))
    }

    /// Record a transport close (or failed handshake) and decide on a reconnect.
    ///
    /// The counter grows on every close. The delay uses the counter value from
    /// before the increment, so the first reconnect waits one base delay.
    pub fn on_transport_closed(&mut self) -> Result<(ChatEvent, CloseOutcome), BackendError> {
        if self.state == ConnectionState::Disconnected {
            return Err(BackendError::invalid_state(self.state, "on_transport_closed"));
        }

        let previous = self.reconnect_attempt;
        self.reconnect_attempt = previous.saturating_add(1);
        let event = self.set_state(ConnectionState::Error);

        let outcome = if self.policy.allows(self.reconnect_attempt) {
            CloseOutcome::Reconnect {
                attempt: self.reconnect_attempt,
                delay: self.policy.delay_for_attempt(previous),
            }
        } else {
            CloseOutcome::Exhausted {
                attempts: self.reconnect_attempt,
            }
        };
        Ok((event, outcome))
    }

    /// Halt in `Error` without touching the attempt counter.
    pub fn on_fatal(&mut self) -> ChatEvent {
        self.halted = true;
        self.set_state(ConnectionState::Error)
    }

    /// Explicit user retry: fresh attempt budget, back to `Checking`.
    ///
    /// Emits nothing; the `begin_check` that follows announces the state.
    pub fn retry(&mut self) {
        self.reconnect_attempt = 0;
        self.halted = false;
        self.state = ConnectionState::Checking;
    }

    /// Session torn down on request.
    pub fn on_disconnect(&mut self) -> ChatEvent {
        self.set_state(ConnectionState::Disconnected)
    }

    fn set_state(&mut self, next: ConnectionState) -> ChatEvent {
        self.state = next;
        ChatEvent::StateChanged {
            state: next,
            reconnect_attempt: self.reconnect_attempt,
        }
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[ConnectionState],
        next: ConnectionState,
        action: &str,
    ) -> Result<ChatEvent, BackendError> {
        if !expected.contains(&self.state) {
            return Err(BackendError::invalid_state(self.state, action));
        }
        Ok(self.set_state(next))
    }
}
