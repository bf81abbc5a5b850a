//! Terminal-facing state reducer over chat session events.

use backend_core::{ChatEvent, ChatMessage, ConnectionState};
use tracing::{debug, warn};

const DEFAULT_STATUS: &str = "Idle";

/// One rendered chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLine {
    pub sender: String,
    pub body: String,
    pub is_own: bool,
}

impl MessageLine {
    pub fn render(&self) -> String {
        let marker = if self.is_own { "*" } else { " " };
        format!("{marker} {}: {}", self.sender, self.body)
    }
}

/// What the user typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalInput {
    Message(String),
    Retry,
    Status,
    Logout,
    Quit,
    Empty,
}

impl TerminalInput {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Self::Empty,
            "/quit" | "/exit" => Self::Quit,
            "/retry" => Self::Retry,
            "/status" => Self::Status,
            "/logout" => Self::Logout,
            _ => Self::Message(line.trim_end_matches(['\r', '\n']).to_owned()),
        }
    }
}

/// Mutable view state fed by session events.
#[derive(Debug, Clone)]
pub struct TerminalState {
    own_email: Option<String>,
    max_lines: usize,
    lines: Vec<MessageLine>,
    status_text: String,
    error_text: Option<String>,
    can_send: bool,
    login_redirect: Option<String>,
}

impl TerminalState {
    pub fn new(own_email: Option<String>, max_lines: usize) -> Self {
        Self {
            own_email,
            max_lines: max_lines.max(1),
            lines: Vec::new(),
            status_text: DEFAULT_STATUS.to_owned(),
            error_text: None,
            can_send: false,
            login_redirect: None,
        }
    }

    /// One-line summary for the `/status` command.
    pub fn status_line(&self) -> String {
        let mut line = format!("[{}] {} messages", self.status_text, self.lines.len());
        if !self.can_send {
            line.push_str(", sending paused");
        }
        if let Some(error) = &self.error_text {
            line.push_str(&format!(", last error: {error}"));
        }
        line
    }

    /// Pending re-login request, cleared once taken.
    pub fn take_login_redirect(&mut self) -> Option<String> {
        self.login_redirect.take()
    }

    /// Feed one session event and return the lines to print.
    pub fn handle_event(&mut self, event: ChatEvent) -> Vec<String> {
        match event {
            ChatEvent::StateChanged {
                state,
                reconnect_attempt,
            } => {
                self.can_send = state == ConnectionState::Connected;
                if self.can_send {
                    self.error_text = None;
                }
                self.status_text = state_label(state, reconnect_attempt);
                vec![format!("[{}]", self.status_text)]
            }
            ChatEvent::HistoryLoaded { messages } => {
                debug!(count = messages.len(), "history replaced view");
                self.lines = messages.into_iter().map(|m| self.line_for(m)).collect();
                self.trim();
                self.lines.iter().map(MessageLine::render).collect()
            }
            ChatEvent::MessageReceived(message) => {
                let line = self.line_for(message);
                let rendered = line.render();
                self.lines.push(line);
                self.trim();
                vec![rendered]
            }
            ChatEvent::MessageSent { .. } => {
                self.error_text = None;
                Vec::new()
            }
            ChatEvent::SendRejected { code } => {
                let text = send_rejection_text(&code).to_owned();
                self.error_text = Some(text.clone());
                vec![format!("! {text}")]
            }
            ChatEvent::ReconnectScheduled { attempt, delay_ms } => {
                self.status_text = format!("Reconnecting in {delay_ms} ms (attempt {attempt})");
                vec![format!("[{}]", self.status_text)]
            }
            ChatEvent::ReconnectExhausted { attempts } => {
                self.status_text = format!("Connection lost after {attempts} attempts");
                vec![format!("[{}] type /retry to try again", self.status_text)]
            }
            ChatEvent::LoginRequired { return_to } => {
                warn!(%return_to, "session requires a fresh login");
                self.can_send = false;
                self.status_text = "Login required".to_owned();
                self.login_redirect = Some(return_to);
                vec!["! session expired, log in again".to_owned()]
            }
            ChatEvent::Error { code, message, .. } => {
                let text = format!("{code}: {message}");
                self.error_text = Some(text.clone());
                vec![format!("! {text}")]
            }
        }
    }

    fn line_for(&self, message: ChatMessage) -> MessageLine {
        let is_own = self.own_email.as_deref() == Some(message.sender_email.as_str());
        MessageLine {
            sender: message.sender_email,
            body: message.message,
            is_own,
        }
    }

    fn trim(&mut self) {
        if self.lines.len() > self.max_lines {
            let overflow = self.lines.len() - self.max_lines;
            self.lines.drain(..overflow);
        }
    }
}

fn state_label(state: ConnectionState, reconnect_attempt: u32) -> String {
    match state {
        ConnectionState::Checking => "Checking server".to_owned(),
        ConnectionState::Connecting if reconnect_attempt > 0 => {
            format!("Reconnecting (attempt {reconnect_attempt})")
        }
        ConnectionState::Connecting => "Connecting".to_owned(),
        ConnectionState::Connected => "Connected".to_owned(),
        ConnectionState::Error => "Connection error".to_owned(),
        ConnectionState::Disconnected => "Disconnected".to_owned(),
    }
}

fn send_rejection_text(code: &str) -> &'static str {
    match code {
        "empty_message" => "message is empty",
        "not_connected" => "not connected, reconnecting",
        "missing_access_token" => "not logged in",
        "transport_error" => "connection dropped while sending",
        _ => "message was not sent",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, body: &str) -> ChatMessage {
        ChatMessage {
            message_type: None,
            room_id: Some(7),
            sender_email: sender.to_owned(),
            message: body.to_owned(),
            update_time: None,
        }
    }

    #[test]
    fn parses_commands_and_messages() {
        assert_eq!(TerminalInput::parse("  "), TerminalInput::Empty);
        assert_eq!(TerminalInput::parse("/quit"), TerminalInput::Quit);
        assert_eq!(TerminalInput::parse("/retry\n"), TerminalInput::Retry);
        assert_eq!(TerminalInput::parse("/logout"), TerminalInput::Logout);
        assert_eq!(TerminalInput::parse("/status"), TerminalInput::Status);
        assert_eq!(
            TerminalInput::parse(" hello there\r\n"),
            TerminalInput::Message(" hello there".into())
        );
    }

    #[test]
    fn tracks_connection_state_and_send_permission() {
        let mut state = TerminalState::new(None, 10);
        assert_eq!(state.status_line(), "[Idle] 0 messages, sending paused");

        let out = state.handle_event(ChatEvent::StateChanged {
            state: ConnectionState::Connecting,
            reconnect_attempt: 2,
        });
        assert_eq!(out, vec!["[Reconnecting (attempt 2)]"]);

        state.handle_event(ChatEvent::Error {
            code: "stomp_error".into(),
            message: "denied".into(),
            recoverable: true,
        });
        assert_eq!(
            state.status_line(),
            "[Reconnecting (attempt 2)] 0 messages, sending paused, last error: stomp_error: denied"
        );

        state.handle_event(ChatEvent::StateChanged {
            state: ConnectionState::Connected,
            reconnect_attempt: 0,
        });
        assert_eq!(state.status_line(), "[Connected] 0 messages");
    }

    #[test]
    fn history_replaces_and_deliveries_append_with_cap() {
        let mut state = TerminalState::new(Some("me@example.com".into()), 2);
        let out = state.handle_event(ChatEvent::HistoryLoaded {
            messages: vec![message("b@example.com", "one"), message("me@example.com", "two")],
        });
        assert_eq!(out, vec!["  b@example.com: one", "* me@example.com: two"]);

        let out = state.handle_event(ChatEvent::MessageReceived(message("b@example.com", "three")));
        assert_eq!(out, vec!["  b@example.com: three"]);
        let bodies: Vec<_> = state.lines.iter().map(|l| l.body.as_str()).collect();
        assert_eq!(bodies, vec!["two", "three"]);
        assert!(state.lines[0].is_own);
    }

    #[test]
    fn login_required_records_return_path() {
        let mut state = TerminalState::new(None, 10);
        state.handle_event(ChatEvent::LoginRequired {
            return_to: "/chat/7".into(),
        });
        assert_eq!(state.take_login_redirect().as_deref(), Some("/chat/7"));
        assert_eq!(state.take_login_redirect(), None);
        assert!(state.status_line().starts_with("[Login required]"));
    }

    #[test]
    fn rejections_and_exhaustion_are_reported() {
        let mut state = TerminalState::new(None, 10);
        let out = state.handle_event(ChatEvent::SendRejected {
            code: "empty_message".into(),
        });
        assert_eq!(out, vec!["! message is empty"]);

        let out = state.handle_event(ChatEvent::ReconnectExhausted { attempts: 5 });
        assert_eq!(
            out,
            vec!["[Connection lost after 5 attempts] type /retry to try again"]
        );
    }
}
