//! Physical link seam between the connection and the socket.
//!
//! A [`Connector`] opens one duplex link split into a sink and a stream, the
//! same shape as a split websocket. Everything above this seam speaks STOMP
//! text and never touches the socket type directly.

use async_trait::async_trait;

use crate::error::{ConnectionError, TransportFault};

/// Outbound half of a link.
#[async_trait]
pub trait LinkSink: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportFault>;

    async fn close(&mut self);
}

/// Inbound half of a link.
#[async_trait]
pub trait LinkStream: Send {
    /// Next text message. `None` means the peer closed the link.
    async fn recv(&mut self) -> Option<Result<String, TransportFault>>;
}

/// An opened link.
pub struct Link {
    pub sink: Box<dyn LinkSink>,
    pub stream: Box<dyn LinkStream>,
}

/// Opens links to the broker. Called once per connect and once per reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Link, ConnectionError>;
}

/// Opaque bearer token authenticating the transport handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
