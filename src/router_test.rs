use super::*;
use crate::reconciler::{Reconciler, RollbackPolicy};
use crate::store::{BoardStore, EntityKind, RoomSnapshot};
use serde_json::json;

/// Records every callback as a short string.
#[derive(Default)]
struct Recorder {
    calls: Vec<String>,
    origins: Vec<Option<String>>,
    echoes: Vec<EntityRef>,
}

impl StateSink for Recorder {
    fn task_created(&mut self, task: Task) -> bool {
        self.calls.push(format!("task_created {}", task.id));
        true
    }
    fn entity_replaced(&mut self, entity: EntityRef, _payload: Value, origin: Option<&str>) -> bool {
        let name = match entity.kind {
            EntityKind::Task => "task",
            EntityKind::Project => "project",
            EntityKind::Comment => "comment",
        };
        self.calls.push(format!("{name}_replaced {}", entity.id));
        self.origins.push(origin.map(str::to_owned));
        true
    }
    fn task_deleted(&mut self, project_id: i64, task_id: i64) -> bool {
        self.calls.push(format!("task_deleted {project_id}/{task_id}"));
        true
    }
    fn comment_added(&mut self, task_id: i64, comment: Comment) -> bool {
        self.calls.push(format!("comment_added {task_id}/{}", comment.id));
        true
    }
    fn comment_deleted(&mut self, task_id: i64, comment_id: i64) -> bool {
        self.calls.push(format!("comment_deleted {task_id}/{comment_id}"));
        true
    }
    fn project_deleted(&mut self, project_id: i64) -> bool {
        self.calls.push(format!("project_deleted {project_id}"));
        true
    }
    fn member_added(&mut self, project_id: i64, member: Member) -> bool {
        self.calls.push(format!("member_added {project_id}/{}", member.user.id));
        true
    }
    fn member_removed(&mut self, project_id: i64, user_id: i64) -> bool {
        self.calls.push(format!("member_removed {project_id}/{user_id}"));
        true
    }
    fn echo_observed(&mut self, entity: EntityRef) {
        self.echoes.push(entity);
    }
}

fn env(kind: &str, payload: Value) -> Envelope {
    Envelope::new(kind, payload)
}

fn router() -> MessageRouter {
    MessageRouter::new(Some("1".into()))
}

#[test]
fn every_wire_type_maps_to_its_mutation() {
    let cases = [
        ("TASK_CREATED", json!({"id": 5, "projectId": 7}), "task_created 5"),
        ("TASK_UPDATED", json!({"id": 5, "projectId": 7}), "task_replaced 5"),
        ("TASK_STATUS_CHANGED", json!({"id": 5, "projectId": 7}), "task_replaced 5"),
        ("TASK_ASSIGNED", json!({"id": 5, "projectId": 7}), "task_replaced 5"),
        ("TASK_DELETED", json!({"id": 5, "projectId": 7}), "task_deleted 7/5"),
        ("COMMENT_ADDED", json!({"id": 9, "taskId": 5}), "comment_added 5/9"),
        ("COMMENT_DELETED", json!({"taskId": 5, "commentId": 9}), "comment_deleted 5/9"),
        ("PROJECT_UPDATED", json!({"id": 7, "name": "x"}), "project_replaced 7"),
        ("PROJECT_DELETED", json!({"id": 7}), "project_deleted 7"),
        ("MEMBER_ADDED", json!({"projectId": 7, "user": {"id": 3}}), "member_added 7/3"),
        ("MEMBER_REMOVED", json!({"projectId": 7, "userId": 3}), "member_removed 7/3"),
    ];

    for (kind, payload, expected) in cases {
        let mut sink = Recorder::default();
        let outcome = router().route(&env(kind, payload).with_user_id("2"), &mut sink);

        assert!(matches!(outcome, RouteOutcome::Applied { changed: true, .. }), "{kind}: {outcome:?}");
        assert_eq!(sink.calls, vec![expected.to_owned()], "{kind}");
    }
}

#[test]
fn replacements_carry_the_broadcast_origin() {
    let mut sink = Recorder::default();
    let envelope = env("TASK_STATUS_CHANGED", json!({"id": 5, "projectId": 7, "status": "DONE"})).with_user_id("2");

    router().route(&envelope, &mut sink);

    assert_eq!(sink.origins, vec![Some("2".to_owned())]);
}

#[test]
fn own_messages_are_not_applied() {
    let mut sink = Recorder::default();
    let envelope = env("TASK_UPDATED", json!({"id": 5, "projectId": 7})).with_user_id("1");

    let outcome = router().route(&envelope, &mut sink);

    assert_eq!(outcome, RouteOutcome::SelfEcho(EnvelopeKind::TaskUpdated));
    assert!(sink.calls.is_empty());
    assert_eq!(sink.echoes, vec![EntityRef::task(5)]);
}

#[test]
fn numeric_origin_matches_string_local_user() {
    let mut sink = Recorder::default();
    let envelope: Envelope = serde_json::from_value(json!({
        "type": "TASK_DELETED",
        "payload": {"id": 5, "projectId": 7},
        "userId": 1
    }))
    .expect("envelope");

    assert!(matches!(router().route(&envelope, &mut sink), RouteOutcome::SelfEcho(_)));
}

#[test]
fn without_local_user_nothing_is_an_echo() {
    let mut sink = Recorder::default();
    let envelope = env("PROJECT_DELETED", json!({"id": 7})).with_user_id("1");

    let outcome = MessageRouter::default().route(&envelope, &mut sink);

    assert!(matches!(outcome, RouteOutcome::Applied { .. }));
}

#[test]
fn unknown_and_presence_types_are_dropped() {
    let mut sink = Recorder::default();

    assert_eq!(
        router().route(&env("BOARD_EXPLODED", json!({})), &mut sink),
        RouteOutcome::Unknown("BOARD_EXPLODED".into())
    );
    assert!(matches!(
        router().route(&env("USER_JOINED", json!({})), &mut sink),
        RouteOutcome::Unknown(_)
    ));
    assert!(sink.calls.is_empty());
}

#[test]
fn malformed_payloads_are_dropped() {
    let mut sink = Recorder::default();

    let missing_project = router().route(&env("TASK_DELETED", json!({"id": 5})), &mut sink);
    let not_a_task = router().route(&env("TASK_CREATED", json!("oops")), &mut sink);

    assert_eq!(missing_project, RouteOutcome::Malformed(EnvelopeKind::TaskDeleted));
    assert_eq!(not_a_task, RouteOutcome::Malformed(EnvelopeKind::TaskCreated));
    assert!(sink.calls.is_empty());
}

#[test]
fn messages_apply_in_arrival_order() {
    let mut store = BoardStore::new();
    store.load_room(RoomSnapshot {
        project: serde_json::from_value(json!({"id": 7, "name": "p"})).expect("project"),
        tasks: vec![serde_json::from_value(json!({"id": 5, "projectId": 7, "title": "t0"})).expect("task")],
        members: Vec::new(),
    });
    let mut reconciler = Reconciler::new(store, RollbackPolicy::Restore);

    for title in ["t1", "t2", "t3"] {
        let envelope = env("TASK_UPDATED", json!({"id": 5, "projectId": 7, "title": title})).with_user_id("2");
        router().route(&envelope, &mut reconciler);
    }

    assert_eq!(reconciler.store().task(5).map(|t| t.title.as_str()), Some("t3"));
}
