//! STOMP 1.2 text-frame codec.
//!
//! A frame is `COMMAND EOL *(header EOL) EOL body NUL`. Heart-beats are bare
//! EOLs between frames and decode to `None`. Header values are escaped on
//! every command except `CONNECT` and `CONNECTED`.

use crate::CodecError;

/// STOMP commands used by the task-board broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(line: &str) -> Result<Self, CodecError> {
        match line {
            "CONNECT" => Ok(Self::Connect),
            "STOMP" => Ok(Self::Stomp),
            "CONNECTED" => Ok(Self::Connected),
            "SEND" => Ok(Self::Send),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "DISCONNECT" => Ok(Self::Disconnect),
            "MESSAGE" => Ok(Self::Message),
            "RECEIPT" => Ok(Self::Receipt),
            "ERROR" => Ok(Self::Error),
            other => Err(CodecError::UnknownCommand(other.to_owned())),
        }
    }

    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

/// One STOMP frame. Headers keep wire order; lookups return the first match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StompFrame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: String::new() }
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `key`, per the STOMP repeated-header rule.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `CONNECT` carrying a bearer credential and heart-beat negotiation.
    #[must_use]
    pub fn connect(host: &str, token: &str, heartbeat_ms: u64) -> Self {
        Self::new(Command::Connect)
            .with_header("accept-version", "1.2")
            .with_header("host", host)
            .with_header("heart-beat", format!("{heartbeat_ms},{heartbeat_ms}"))
            .with_header("Authorization", format!("Bearer {token}"))
    }

    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    /// `SEND` with a JSON body.
    #[must_use]
    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Self::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }
}

// =============================================================================
// ENCODE
// =============================================================================

/// Encode a frame to its wire text, adding `content-length` for non-empty bodies.
#[must_use]
pub fn encode(frame: &StompFrame) -> String {
    let escape = frame.command.escapes_headers();
    let mut out = String::with_capacity(64 + frame.body.len());
    out.push_str(frame.command.as_str());
    out.push('\n');
    for (key, value) in &frame.headers {
        if escape {
            out.push_str(&escape_header(key));
            out.push(':');
            out.push_str(&escape_header(value));
        } else {
            out.push_str(key);
            out.push(':');
            out.push_str(value);
        }
        out.push('\n');
    }
    if !frame.body.is_empty() && frame.header("content-length").is_none() {
        out.push_str("content-length:");
        out.push_str(&frame.body.len().to_string());
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&frame.body);
    out.push('\0');
    out
}

/// Heart-beat payload: a single EOL.
#[must_use]
pub fn heartbeat() -> &'static str {
    "\n"
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

// =============================================================================
// DECODE
// =============================================================================

/// Decode one frame from wire text.
///
/// Returns `Ok(None)` for a heart-beat (text made only of EOLs).
///
/// # Errors
///
/// Returns a [`CodecError`] for unknown commands, malformed or badly escaped
/// headers, a missing header/body separator, or a missing NUL terminator.
pub fn decode(text: &str) -> Result<Option<StompFrame>, CodecError> {
    let mut cursor = text.trim_start_matches(['\r', '\n']);
    if cursor.is_empty() {
        return Ok(None);
    }

    let command = Command::parse(take_line(&mut cursor).ok_or(CodecError::Truncated)?)?;
    let unescape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let line = take_line(&mut cursor).ok_or(CodecError::Truncated)?;
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| CodecError::MalformedHeader(line.to_owned()))?;
        if unescape {
            headers.push((unescape_header(key)?, unescape_header(value)?));
        } else {
            headers.push((key.to_owned(), value.to_owned()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.trim().parse::<usize>().ok());

    let body = match content_length {
        Some(len) => {
            let body = cursor.get(..len).ok_or(CodecError::MissingTerminator)?;
            if cursor.as_bytes().get(len) != Some(&0) {
                return Err(CodecError::MissingTerminator);
            }
            body
        }
        None => {
            let end = cursor.find('\0').ok_or(CodecError::MissingTerminator)?;
            &cursor[..end]
        }
    };

    Ok(Some(StompFrame { command, headers, body: body.to_owned() }))
}

fn take_line<'a>(cursor: &mut &'a str) -> Option<&'a str> {
    let idx = cursor.find('\n')?;
    let line = &cursor[..idx];
    *cursor = &cursor[idx + 1..];
    Some(line.strip_suffix('\r').unwrap_or(line))
}

fn unescape_header(raw: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(CodecError::InvalidEscape(raw.to_owned())),
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "stomp_test.rs"]
mod tests;
