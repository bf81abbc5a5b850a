//! STOMP 1.2 frame codec.
//!
//! Frames are carried one or more per WebSocket text message. A bare EOL
//! between frames is a heart-beat and decodes to nothing.

use std::fmt;

use thiserror::Error;

pub const ACCEPT_VERSION: &str = "1.1,1.2";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown STOMP command '{0}'")]
    UnknownCommand(String),
    #[error("header line without ':' separator: '{0}'")]
    MalformedHeader(String),
    #[error("invalid escape sequence '\\{0}' in header")]
    InvalidEscape(char),
    #[error("frame is missing its NUL terminator")]
    Unterminated,
    #[error("invalid content-length '{0}'")]
    InvalidContentLength(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(raw: &str) -> Result<Self, FrameError> {
        Ok(match raw {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(FrameError::UnknownCommand(other.to_owned())),
        })
    }

    /// CONNECT and CONNECTED headers are sent verbatim for 1.0 compatibility.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header. Repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Session handshake presenting the bearer credential.
    pub fn connect(host: &str, bearer: Option<&str>) -> Self {
        let mut frame = Self::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", "0,0");
        if let Some(token) = bearer {
            frame = frame.header("Authorization", format!("Bearer {token}"));
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str, bearer: Option<&str>) -> Self {
        let mut frame = Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto");
        if let Some(token) = bearer {
            frame = frame.header("Authorization", format!("Bearer {token}"));
        }
        frame
    }

    pub fn send_json(destination: &str, bearer: Option<&str>, body: String) -> Self {
        let mut frame = Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json");
        if let Some(token) = bearer {
            frame = frame.header("Authorization", format!("Bearer {token}"));
        }
        frame.body(body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).header("receipt", receipt)
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decode every frame in one transport message, skipping heart-beats.
pub fn decode_all(input: &str) -> Result<Vec<Frame>, FrameError> {
    let mut frames = Vec::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return Ok(frames);
        }
        let (frame, consumed) = decode_one(rest)?;
        frames.push(frame);
        rest = &rest[consumed..];
    }
}

/// Decode a single frame and return it with the number of bytes consumed.
fn decode_one(input: &str) -> Result<(Frame, usize), FrameError> {
    let mut offset = 0;
    let command = Command::parse(next_line(input, &mut offset)?)?;
    let escaped = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let line = next_line(input, &mut offset)?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_owned()))?;
        if escaped {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_owned(), value.to_owned()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(value.clone()))
        })
        .transpose()?;

    let remaining = &input[offset..];
    let body_len = match content_length {
        Some(len) => {
            if remaining.len() <= len || remaining.as_bytes()[len] != 0 {
                return Err(FrameError::Unterminated);
            }
            len
        }
        None => remaining.find('\0').ok_or(FrameError::Unterminated)?,
    };
    let body = remaining
        .get(..body_len)
        .ok_or_else(|| FrameError::InvalidContentLength(body_len.to_string()))?
        .to_owned();

    Ok((
        Frame {
            command,
            headers,
            body,
        },
        offset + body_len + 1,
    ))
}

fn next_line<'a>(input: &'a str, offset: &mut usize) -> Result<&'a str, FrameError> {
    let remaining = &input[*offset..];
    let end = remaining.find('\n').ok_or(FrameError::Unterminated)?;
    *offset += end + 1;
    Ok(remaining[..end].trim_end_matches('\r'))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => return Err(FrameError::InvalidEscape(other)),
            None => return Err(FrameError::InvalidEscape(' ')),
        }
    }
    Ok(out)
}
