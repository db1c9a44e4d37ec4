use super::*;
use frames::stomp::Command;
use serde_json::json;
use std::sync::Mutex;

/// Records frames instead of writing them anywhere.
struct FakeSender {
    link: Option<LinkId>,
    sent: Mutex<Vec<StompFrame>>,
}

impl FakeSender {
    fn live(link: u32) -> Self {
        Self { link: Some(LinkId::fake(link)), sent: Mutex::default() }
    }

    fn offline() -> Self {
        Self { link: None, sent: Mutex::default() }
    }

    fn sent(&self) -> Vec<StompFrame> {
        self.sent.lock().expect("sent mutex should lock").clone()
    }
}

impl FrameSender for FakeSender {
    fn live_link(&self) -> Option<LinkId> {
        self.link
    }

    fn send_frame(&self, frame: StompFrame) -> bool {
        if self.link.is_none() {
            return false;
        }
        self.sent.lock().expect("sent mutex should lock").push(frame);
        true
    }
}

fn message(destination: &str, body: &str) -> InboundMessage {
    InboundMessage { destination: destination.into(), subscription: None, body: body.into() }
}

fn recording() -> impl FnMut(&mut Vec<Delivery>, Delivery) + Send + 'static {
    |seen: &mut Vec<Delivery>, delivery| seen.push(delivery)
}

#[test]
fn subscribe_while_disconnected_returns_none_and_queues_nothing() {
    let out = FakeSender::offline();
    let mut registry = SubscriptionRegistry::<Vec<Delivery>>::new();

    assert!(registry.subscribe(&out, "/topic/project/1", recording()).is_none());
    assert!(registry.is_empty());
    assert!(out.sent().is_empty());
}

#[test]
fn subscribe_sends_subscribe_frame() {
    let out = FakeSender::live(0);
    let mut registry = SubscriptionRegistry::<Vec<Delivery>>::new();

    let handle = registry.subscribe(&out, "/topic/project/1", recording()).expect("handle");

    assert_eq!(handle.topic(), "/topic/project/1");
    let sent = out.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].command, Command::Subscribe);
    assert_eq!(sent[0].header("id"), Some(handle.id()));
    assert_eq!(sent[0].header("destination"), Some("/topic/project/1"));
}

#[test]
fn resubscribe_on_live_link_is_idempotent() {
    let out = FakeSender::live(0);
    let mut registry = SubscriptionRegistry::<Vec<Delivery>>::new();

    let first = registry.subscribe(&out, "/topic/project/1", recording()).expect("first");
    let second = registry.subscribe(&out, "/topic/project/1", recording()).expect("second");

    assert_eq!(first, second);
    assert_eq!(registry.len(), 1);
    assert_eq!(out.sent().len(), 1);
}

#[test]
fn each_message_reaches_exactly_one_handler() {
    let out = FakeSender::live(0);
    let mut registry = SubscriptionRegistry::<Vec<Delivery>>::new();
    registry.subscribe(&out, "/topic/project/1", recording());
    registry.subscribe(&out, "/topic/project/2", |_: &mut Vec<Delivery>, _| panic!("wrong topic"));

    let mut seen = Vec::new();
    assert!(registry.deliver(&mut seen, &message("/topic/project/1", r#"{"type":"TASK_CREATED"}"#)));

    assert_eq!(seen.len(), 1);
    assert!(matches!(&seen[0], Delivery::Decoded(e) if e.kind == "TASK_CREATED"));
}

#[test]
fn undecodable_body_is_delivered_raw() {
    let out = FakeSender::live(0);
    let mut registry = SubscriptionRegistry::<Vec<Delivery>>::new();
    registry.subscribe(&out, "/topic/project/1", recording());

    let mut seen = Vec::new();
    registry.deliver(&mut seen, &message("/topic/project/1", "not json"));

    assert_eq!(seen, vec![Delivery::Raw("not json".into())]);
}

#[test]
fn delivery_falls_back_to_subscription_id() {
    let out = FakeSender::live(0);
    let mut registry = SubscriptionRegistry::<Vec<Delivery>>::new();
    let handle = registry.subscribe(&out, "/user/queue/notifications", recording()).expect("handle");

    let mut seen = Vec::new();
    let routed = InboundMessage {
        destination: "/user/alice/queue/notifications".into(),
        subscription: Some(handle.id().to_owned()),
        body: json!({"type": "TASK_ASSIGNED", "payload": {}}).to_string(),
    };
    assert!(registry.deliver(&mut seen, &routed));
    assert_eq!(seen.len(), 1);
}

#[test]
fn unsubscribe_stops_delivery_and_unknown_is_noop() {
    let out = FakeSender::live(0);
    let mut registry = SubscriptionRegistry::<Vec<Delivery>>::new();
    let handle = registry.subscribe(&out, "/topic/project/1", recording()).expect("handle");

    assert!(registry.unsubscribe(&out, "/topic/project/1"));
    assert!(!registry.unsubscribe(&out, "/topic/project/1"));
    assert!(!registry.unsubscribe(&out, "/topic/never"));

    let mut seen = Vec::new();
    assert!(!registry.deliver(&mut seen, &message("/topic/project/1", "{}")));
    assert!(seen.is_empty());

    let sent = out.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].command, Command::Unsubscribe);
    assert_eq!(sent[1].header("id"), Some(handle.id()));
}

#[test]
fn unsubscribe_all_clears_registry() {
    let out = FakeSender::live(0);
    let mut registry = SubscriptionRegistry::<Vec<Delivery>>::new();
    registry.subscribe(&out, "/topic/project/1", recording());
    registry.subscribe(&out, "/topic/project/1/presence", recording());

    registry.unsubscribe_all(&out);

    assert!(registry.is_empty());
    let unsubscribes = out.sent().iter().filter(|f| f.command == Command::Unsubscribe).count();
    assert_eq!(unsubscribes, 2);
}

#[test]
fn reconnect_leaves_subscriptions_stale_until_resubscribed() {
    let before = FakeSender::live(0);
    let mut registry = SubscriptionRegistry::<Vec<Delivery>>::new();
    let handle = registry.subscribe(&before, "/topic/project/1", recording()).expect("handle");

    let after = FakeSender::live(1);
    assert!(registry.is_subscribed("/topic/project/1"));
    assert!(registry.is_stale(&after, "/topic/project/1"));
    assert_eq!(registry.stale_topics(&after), vec!["/topic/project/1".to_owned()]);

    let again = registry.subscribe(&after, "/topic/project/1", recording()).expect("resubscribe");

    assert_eq!(again, handle);
    assert!(!registry.is_stale(&after, "/topic/project/1"));
    let sent = after.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].command, Command::Subscribe);
    assert_eq!(sent[0].header("id"), Some(handle.id()));
}

#[test]
fn stale_unsubscribe_sends_nothing() {
    let before = FakeSender::live(0);
    let mut registry = SubscriptionRegistry::<Vec<Delivery>>::new();
    registry.subscribe(&before, "/topic/project/1", recording());

    let after = FakeSender::live(1);
    assert!(registry.unsubscribe(&after, "/topic/project/1"));
    assert!(after.sent().is_empty());
}

#[test]
fn handler_state_is_passed_by_reference() {
    let out = FakeSender::live(0);
    let mut registry = SubscriptionRegistry::<u32>::new();
    registry.subscribe(&out, "/topic/project/1", |count: &mut u32, _| *count += 1);

    let mut count = 0;
    for _ in 0..3 {
        registry.deliver(&mut count, &message("/topic/project/1", "{}"));
    }
    assert_eq!(count, 3);
}
