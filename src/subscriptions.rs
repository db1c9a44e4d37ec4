//! Topic subscription bookkeeping.
//!
//! One entry per topic, each bound to the link it was issued on. A reconnect
//! produces a new link, which leaves existing entries *stale*: still
//! registered locally, unknown to the broker. Subscribing to a stale topic
//! re-issues `SUBSCRIBE` under the same id.
//!
//! Handlers receive the owner's state by `&mut` at delivery time instead of
//! capturing it, so the registry never shares mutable state with anyone.

use std::collections::HashMap;

use frames::Delivery;
use frames::stomp::StompFrame;
use tracing::{debug, info, warn};

use crate::transport::{FrameSender, InboundMessage, LinkId};

/// Callback invoked for every message on a topic.
pub type Handler<S> = Box<dyn FnMut(&mut S, Delivery) + Send>;

/// Identifies one topic subscription. Re-subscribing returns an equal handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: String,
    topic: String,
}

impl SubscriptionHandle {
    /// Broker subscription id (`sub-N`).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct Entry<S> {
    handle: SubscriptionHandle,
    link: LinkId,
    handler: Handler<S>,
}

pub struct SubscriptionRegistry<S> {
    entries: HashMap<String, Entry<S>>,
    next_id: u64,
}

impl<S> Default for SubscriptionRegistry<S> {
    fn default() -> Self {
        Self { entries: HashMap::new(), next_id: 0 }
    }
}

impl<S> SubscriptionRegistry<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `topic`.
    ///
    /// Returns `None` without queueing anything when the transport is not
    /// connected. A live subscription to the same topic is returned as-is and
    /// the new handler is discarded; a stale one is re-issued with the new
    /// handler.
    pub fn subscribe<F>(
        &mut self,
        out: &impl FrameSender,
        topic: &str,
        handler: F,
    ) -> Option<SubscriptionHandle>
    where
        F: FnMut(&mut S, Delivery) + Send + 'static,
    {
        let Some(link) = out.live_link() else {
            warn!(topic, "not connected; subscription rejected");
            return None;
        };

        if let Some(entry) = self.entries.get_mut(topic) {
            if entry.link == link {
                debug!(topic, id = %entry.handle.id, "already subscribed");
                return Some(entry.handle.clone());
            }
            if !out.send_frame(StompFrame::subscribe(&entry.handle.id, topic)) {
                return None;
            }
            entry.link = link;
            entry.handler = Box::new(handler);
            info!(topic, id = %entry.handle.id, "resubscribed stale topic");
            return Some(entry.handle.clone());
        }

        let id = format!("sub-{}", self.next_id);
        if !out.send_frame(StompFrame::subscribe(&id, topic)) {
            return None;
        }
        self.next_id += 1;

        let handle = SubscriptionHandle { id, topic: topic.to_owned() };
        info!(topic, id = %handle.id, "subscribed");
        self.entries.insert(
            topic.to_owned(),
            Entry { handle: handle.clone(), link, handler: Box::new(handler) },
        );
        Some(handle)
    }

    /// Drop the subscription for `topic`. Unknown topics are a no-op.
    ///
    /// `UNSUBSCRIBE` is only sent when the entry belongs to the live link;
    /// the broker already forgot stale ones.
    pub fn unsubscribe(&mut self, out: &impl FrameSender, topic: &str) -> bool {
        let Some(entry) = self.entries.remove(topic) else {
            return false;
        };
        if out.live_link() == Some(entry.link) {
            out.send_frame(StompFrame::unsubscribe(&entry.handle.id));
        }
        info!(topic, id = %entry.handle.id, "unsubscribed");
        true
    }

    pub fn unsubscribe_all(&mut self, out: &impl FrameSender) {
        let topics: Vec<String> = self.entries.keys().cloned().collect();
        for topic in topics {
            self.unsubscribe(out, &topic);
        }
    }

    /// Route one inbound message to the handler for its topic.
    ///
    /// Matches on destination first, then on the subscription id. Returns
    /// `false` when no handler is registered; such messages are discarded.
    pub fn deliver(&mut self, state: &mut S, message: &InboundMessage) -> bool {
        let Some(topic) = self.topic_for(message) else {
            debug!(destination = %message.destination, "no subscription; message discarded");
            return false;
        };
        let Some(entry) = self.entries.get_mut(&topic) else {
            return false;
        };

        let delivery = frames::decode_delivery(&message.body);
        if let Delivery::Raw(_) = &delivery {
            warn!(topic = %topic, "message body is not an envelope; delivering raw");
        }
        (entry.handler)(state, delivery);
        true
    }

    #[must_use]
    pub fn handle(&self, topic: &str) -> Option<&SubscriptionHandle> {
        self.entries.get(topic).map(|entry| &entry.handle)
    }

    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    /// Registered but issued on a link other than the live one.
    #[must_use]
    pub fn is_stale(&self, out: &impl FrameSender, topic: &str) -> bool {
        self.entries
            .get(topic)
            .is_some_and(|entry| out.live_link() != Some(entry.link))
    }

    /// Topics whose broker subscription was lost, sorted.
    #[must_use]
    pub fn stale_topics(&self, out: &impl FrameSender) -> Vec<String> {
        let live = out.live_link();
        let mut topics: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| live != Some(entry.link))
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn topic_for(&self, message: &InboundMessage) -> Option<String> {
        if self.entries.contains_key(&message.destination) {
            return Some(message.destination.clone());
        }
        let id = message.subscription.as_deref()?;
        self.entries
            .iter()
            .find(|(_, entry)| entry.handle.id == id)
            .map(|(topic, _)| topic.clone())
    }
}

#[cfg(test)]
#[path = "subscriptions_test.rs"]
mod tests;
