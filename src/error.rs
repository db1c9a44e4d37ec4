//! Error taxonomy for the sync core.
//!
//! Transport failures surface as connectivity changes, never as per-action
//! errors. Decode problems are delivered raw to handlers instead of failing.
//! Reconciliation conflicts are not an error: last write wins.

/// Handshake or authentication failure while establishing the broker link.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("broker rejected connection: {0}")]
    Rejected(String),
    #[error("timed out waiting for CONNECTED")]
    Timeout,
    #[error("link closed during handshake")]
    Closed,
    #[error("handshake frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
}

/// Mid-session loss of an established link.
#[derive(Debug, thiserror::Error)]
pub enum TransportFault {
    #[error("link closed by peer")]
    Closed,
    #[error("link i/o failed: {0}")]
    Io(String),
    #[error("broker sent ERROR: {0}")]
    Broker(String),
    #[error("no data from broker for {0:?}")]
    HeartbeatTimeout(std::time::Duration),
}

/// Errors returned by session-level operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Attempted to enter a room while the transport is not connected.
    #[error("not connected; subscription to {0} rejected")]
    SubscriptionRejected(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
