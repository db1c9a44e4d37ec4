//! Per-room online-user sets.
//!
//! Presence topics publish flat objects:
//!
//! ```text
//! {"type":"USER_JOINED","userId":4,"username":"ana","projectId":7}
//! {"type":"USER_LEFT","userId":4,"projectId":7}
//! {"type":"ONLINE_USERS","projectId":7,"onlineUsers":[{"userId":4,"username":"ana"}]}
//! ```
//!
//! Every entry carries a `last_seen` instant. Users who vanish without a
//! `USER_LEFT` are removed by `prune_stale`; the session refreshes live
//! entries by re-sending `project.join`, which the server answers with a
//! fresh `ONLINE_USERS` sync.

use std::collections::HashMap;

use frames::{Envelope, EnvelopeKind, id_number, id_string};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub display_name: String,
}

impl PresenceEntry {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), display_name: display_name.into() }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let user_id = value
            .get("userId")
            .or_else(|| value.get("id"))
            .and_then(id_string)?;
        let display_name = display_name(|key| value.get(key)).unwrap_or_else(|| user_id.clone());
        Some(Self { user_id, display_name })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenceEvent {
    Joined { room: i64, entry: PresenceEntry },
    Left { room: i64, user_id: String },
    Sync { room: i64, entries: Vec<PresenceEntry> },
}

impl PresenceEvent {
    /// Decode a presence envelope.
    ///
    /// `topic_room` is the project id taken from the topic name, used when the
    /// message omits `projectId`. Returns `None` for non-presence types and
    /// for messages missing the user or room.
    #[must_use]
    pub fn from_envelope(envelope: &Envelope, topic_room: Option<i64>) -> Option<Self> {
        let room = envelope
            .field("projectId")
            .and_then(id_number)
            .or(topic_room)?;
        let user_id = || {
            envelope
                .user_id
                .clone()
                .or_else(|| envelope.field("userId").and_then(id_string))
        };

        match envelope.classify() {
            EnvelopeKind::UserJoined => {
                let user_id = user_id()?;
                let display_name =
                    display_name(|key| envelope.field(key)).unwrap_or_else(|| user_id.clone());
                Some(Self::Joined { room, entry: PresenceEntry { user_id, display_name } })
            }
            EnvelopeKind::UserLeft => Some(Self::Left { room, user_id: user_id()? }),
            EnvelopeKind::OnlineUsers => {
                let users = envelope.field("onlineUsers")?.as_array()?;
                let entries = users.iter().filter_map(PresenceEntry::from_value).collect();
                Some(Self::Sync { room, entries })
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn room(&self) -> i64 {
        match self {
            Self::Joined { room, .. } | Self::Left { room, .. } | Self::Sync { room, .. } => *room,
        }
    }
}

fn display_name<'a>(lookup: impl Fn(&str) -> Option<&'a Value>) -> Option<String> {
    ["username", "displayName", "name"]
        .into_iter()
        .find_map(|key| lookup(key).and_then(Value::as_str))
        .map(str::to_owned)
}

struct Tracked {
    entry: PresenceEntry,
    last_seen: Instant,
}

#[derive(Default)]
pub struct PresenceTracker {
    rooms: HashMap<i64, HashMap<String, Tracked>>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns whether the room's set changed.
    pub fn apply(&mut self, event: PresenceEvent) -> bool {
        let now = Instant::now();
        match event {
            PresenceEvent::Joined { room, entry } => {
                debug!(room, user_id = %entry.user_id, "presence joined");
                let users = self.rooms.entry(room).or_default();
                let changed = users
                    .get(&entry.user_id)
                    .is_none_or(|tracked| tracked.entry != entry);
                users.insert(entry.user_id.clone(), Tracked { entry, last_seen: now });
                changed
            }
            PresenceEvent::Left { room, user_id } => {
                debug!(room, user_id = %user_id, "presence left");
                self.rooms
                    .get_mut(&room)
                    .is_some_and(|users| users.remove(&user_id).is_some())
            }
            PresenceEvent::Sync { room, entries } => {
                debug!(room, count = entries.len(), "presence sync");
                let next: HashMap<String, Tracked> = entries
                    .into_iter()
                    .map(|entry| (entry.user_id.clone(), Tracked { entry, last_seen: now }))
                    .collect();
                let changed = self.rooms.get(&room).is_none_or(|current| !same_entries(current, &next));
                self.rooms.insert(room, next);
                changed
            }
        }
    }

    /// Online users of `room` sorted by display name. Empty for unknown rooms.
    #[must_use]
    pub fn online_users(&self, room: i64) -> Vec<PresenceEntry> {
        let mut users: Vec<PresenceEntry> = self
            .rooms
            .get(&room)
            .map(|users| users.values().map(|tracked| tracked.entry.clone()).collect())
            .unwrap_or_default();
        users.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        users
    }

    #[must_use]
    pub fn is_online(&self, room: i64, user_id: &str) -> bool {
        self.rooms
            .get(&room)
            .is_some_and(|users| users.contains_key(user_id))
    }

    /// Forget everything about `room`.
    pub fn clear_room(&mut self, room: i64) {
        self.rooms.remove(&room);
    }

    /// Drop entries last seen before `cutoff`. Returns the rooms that changed.
    pub fn prune_stale(&mut self, cutoff: Instant) -> Vec<i64> {
        let mut changed = Vec::new();
        for (room, users) in &mut self.rooms {
            let before = users.len();
            users.retain(|_, tracked| tracked.last_seen >= cutoff);
            if users.len() != before {
                debug!(room, pruned = before - users.len(), "presence pruned");
                changed.push(*room);
            }
        }
        changed.sort_unstable();
        changed
    }
}

fn same_entries(a: &HashMap<String, Tracked>, b: &HashMap<String, Tracked>) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(id, tracked)| b.get(id).is_some_and(|other| other.entry == tracked.entry))
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
