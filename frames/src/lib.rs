//! Shared envelope model and STOMP codec for the realtime task-board wire.
//!
//! This crate owns the wire representation consumed by the sync core. Envelope
//! payloads stay flexible (`serde_json::Value`) while the broker transport is
//! STOMP 1.2 text frames carried over a websocket.

pub mod stomp;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// DESTINATIONS
// =============================================================================

/// Client-to-server control destination sent on room entry.
pub const JOIN_DESTINATION: &str = "/app/project.join";

/// Client-to-server control destination sent on room exit.
pub const LEAVE_DESTINATION: &str = "/app/project.leave";

/// Per-user private queue for out-of-band notices.
pub const NOTIFICATIONS_QUEUE: &str = "/user/queue/notifications";

const PROJECT_TOPIC_PREFIX: &str = "/topic/project/";
const PRESENCE_SUFFIX: &str = "/presence";

/// Entity lifecycle topic for one project.
#[must_use]
pub fn project_topic(project_id: i64) -> String {
    format!("{PROJECT_TOPIC_PREFIX}{project_id}")
}

/// Presence topic for one project.
#[must_use]
pub fn presence_topic(project_id: i64) -> String {
    format!("{PROJECT_TOPIC_PREFIX}{project_id}{PRESENCE_SUFFIX}")
}

/// Project ID named by a project or presence topic.
#[must_use]
pub fn topic_project_id(topic: &str) -> Option<i64> {
    let rest = topic.strip_prefix(PROJECT_TOPIC_PREFIX)?;
    let id = rest.strip_suffix(PRESENCE_SUFFIX).unwrap_or(rest);
    id.parse().ok()
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by envelope and STOMP decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The body was not valid JSON or not envelope-shaped.
    #[error("failed to decode envelope: {0}")]
    Json(#[from] serde_json::Error),
    /// The STOMP command line is not a known command.
    #[error("unknown stomp command: {0}")]
    UnknownCommand(String),
    /// A header line had no `:` separator.
    #[error("malformed stomp header: {0}")]
    MalformedHeader(String),
    /// A header contained an undefined escape sequence.
    #[error("invalid stomp header escape in: {0}")]
    InvalidEscape(String),
    /// The frame ended before the blank line separating headers from body.
    #[error("truncated stomp frame")]
    Truncated,
    /// The body was not terminated by a NUL octet.
    #[error("stomp frame body is missing its NUL terminator")]
    MissingTerminator,
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// A message unit exchanged over a topic.
///
/// Entity topics carry `{type, payload, userId}`. Presence topics publish flat
/// objects (`{type, userId, username, projectId, onlineUsers}`); their extra
/// top-level fields land in `extra` so both shapes decode through one type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Type tag, e.g. `"TASK_UPDATED"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Structured payload. `Null` when the sender used the flat layout.
    #[serde(default)]
    pub payload: Value,
    /// Identifier of the acting user, if the sender stamped one.
    #[serde(
        rename = "userId",
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    /// Any other top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Build an envelope with an object payload and no origin.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self { kind: kind.into(), payload, user_id: None, extra: Map::new() }
    }

    /// Stamp the acting user.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Classified type tag.
    #[must_use]
    pub fn classify(&self) -> EnvelopeKind {
        EnvelopeKind::parse(&self.kind)
    }

    /// Look a field up in the payload object first, then the flat top level.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key).or_else(|| self.extra.get(key))
    }
}

/// Normalize a string or numeric identifier to its string form.
#[must_use]
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read a numeric identifier that may have been serialized as a string.
#[must_use]
pub fn id_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(id_string))
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Known envelope type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    TaskCreated,
    TaskUpdated,
    TaskStatusChanged,
    TaskAssigned,
    TaskDeleted,
    CommentAdded,
    CommentDeleted,
    ProjectUpdated,
    ProjectDeleted,
    MemberAdded,
    MemberRemoved,
    UserJoined,
    UserLeft,
    OnlineUsers,
    Unknown,
}

/// Coarse grouping of [`EnvelopeKind`] used for dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindFamily {
    Task,
    Comment,
    Project,
    Membership,
    Presence,
    Unknown,
}

impl EnvelopeKind {
    /// Parse a wire tag. Unrecognized tags map to [`EnvelopeKind::Unknown`].
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        match tag {
            "TASK_CREATED" => Self::TaskCreated,
            "TASK_UPDATED" => Self::TaskUpdated,
            "TASK_STATUS_CHANGED" => Self::TaskStatusChanged,
            "TASK_ASSIGNED" => Self::TaskAssigned,
            "TASK_DELETED" => Self::TaskDeleted,
            "COMMENT_ADDED" => Self::CommentAdded,
            "COMMENT_DELETED" => Self::CommentDeleted,
            "PROJECT_UPDATED" => Self::ProjectUpdated,
            "PROJECT_DELETED" => Self::ProjectDeleted,
            "MEMBER_ADDED" => Self::MemberAdded,
            "MEMBER_REMOVED" => Self::MemberRemoved,
            "USER_JOINED" => Self::UserJoined,
            "USER_LEFT" => Self::UserLeft,
            "ONLINE_USERS" => Self::OnlineUsers,
            _ => Self::Unknown,
        }
    }

    /// Wire tag for this kind. `Unknown` has no tag and renders as `"UNKNOWN"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "TASK_CREATED",
            Self::TaskUpdated => "TASK_UPDATED",
            Self::TaskStatusChanged => "TASK_STATUS_CHANGED",
            Self::TaskAssigned => "TASK_ASSIGNED",
            Self::TaskDeleted => "TASK_DELETED",
            Self::CommentAdded => "COMMENT_ADDED",
            Self::CommentDeleted => "COMMENT_DELETED",
            Self::ProjectUpdated => "PROJECT_UPDATED",
            Self::ProjectDeleted => "PROJECT_DELETED",
            Self::MemberAdded => "MEMBER_ADDED",
            Self::MemberRemoved => "MEMBER_REMOVED",
            Self::UserJoined => "USER_JOINED",
            Self::UserLeft => "USER_LEFT",
            Self::OnlineUsers => "ONLINE_USERS",
            Self::Unknown => "UNKNOWN",
        }
    }

    #[must_use]
    pub fn family(self) -> KindFamily {
        match self {
            Self::TaskCreated
            | Self::TaskUpdated
            | Self::TaskStatusChanged
            | Self::TaskAssigned
            | Self::TaskDeleted => KindFamily::Task,
            Self::CommentAdded | Self::CommentDeleted => KindFamily::Comment,
            Self::ProjectUpdated | Self::ProjectDeleted => KindFamily::Project,
            Self::MemberAdded | Self::MemberRemoved => KindFamily::Membership,
            Self::UserJoined | Self::UserLeft | Self::OnlineUsers => KindFamily::Presence,
            Self::Unknown => KindFamily::Unknown,
        }
    }
}

// =============================================================================
// DELIVERY
// =============================================================================

/// What a topic handler receives for one inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    /// The body decoded as an [`Envelope`].
    Decoded(Envelope),
    /// The body could not be decoded; the handler decides how to degrade.
    Raw(String),
}

/// Decode a message body as an envelope.
///
/// # Errors
///
/// Returns [`CodecError::Json`] when the body is not an envelope-shaped JSON
/// object.
pub fn decode_envelope(body: &str) -> Result<Envelope, CodecError> {
    Ok(serde_json::from_str(body)?)
}

/// Decode a message body into a tagged [`Delivery`]. Never fails.
#[must_use]
pub fn decode_delivery(body: &str) -> Delivery {
    match decode_envelope(body) {
        Ok(envelope) => Delivery::Decoded(envelope),
        Err(_) => Delivery::Raw(body.to_owned()),
    }
}

/// Encode an envelope as a JSON message body.
#[must_use]
pub fn encode_envelope(envelope: &Envelope) -> String {
    // Serializing a struct of strings and `Value`s cannot fail.
    serde_json::to_string(envelope).unwrap_or_default()
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
