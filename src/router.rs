//! Envelope classification and dispatch into local state.
//!
//! The router owns no state. It decides what an envelope means and calls the
//! matching [`StateSink`] mutation; whoever implements the sink decides how
//! that lands in the cache.

use frames::{Envelope, EnvelopeKind, KindFamily, id_number};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::store::{Comment, EntityRef, Member, Project, Task};

/// State-mutation callbacks, one per wire effect.
///
/// Each returns whether cached state changed.
pub trait StateSink {
    fn task_created(&mut self, task: Task) -> bool;
    /// Replace-by-id of a task or project. `payload` has already been checked
    /// to deserialize as that entity.
    fn entity_replaced(&mut self, entity: EntityRef, payload: Value, origin: Option<&str>) -> bool;
    fn task_deleted(&mut self, project_id: i64, task_id: i64) -> bool;
    fn comment_added(&mut self, task_id: i64, comment: Comment) -> bool;
    fn comment_deleted(&mut self, task_id: i64, comment_id: i64) -> bool;
    fn project_deleted(&mut self, project_id: i64) -> bool;
    fn member_added(&mut self, project_id: i64, member: Member) -> bool;
    fn member_removed(&mut self, project_id: i64, user_id: i64) -> bool;

    /// Our own write was broadcast back. No state mutation.
    fn echo_observed(&mut self, _entity: EntityRef) {}
}

/// What `route` did with an envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Applied { kind: EnvelopeKind, changed: bool },
    SelfEcho(EnvelopeKind),
    Unknown(String),
    Malformed(EnvelopeKind),
}

#[derive(Clone, Debug, Default)]
pub struct MessageRouter {
    local_user_id: Option<String>,
}

impl MessageRouter {
    #[must_use]
    pub fn new(local_user_id: Option<String>) -> Self {
        Self { local_user_id }
    }

    #[must_use]
    pub fn local_user_id(&self) -> Option<&str> {
        self.local_user_id.as_deref()
    }

    pub fn set_local_user_id(&mut self, user_id: Option<String>) {
        self.local_user_id = user_id;
    }

    /// Dispatch one entity envelope.
    ///
    /// Presence types are not entity traffic and come back as `Unknown`.
    pub fn route(&self, envelope: &Envelope, sink: &mut impl StateSink) -> RouteOutcome {
        let kind = envelope.classify();
        if matches!(kind.family(), KindFamily::Unknown | KindFamily::Presence) {
            debug!(kind = %envelope.kind, "unknown message type dropped");
            return RouteOutcome::Unknown(envelope.kind.clone());
        }

        if self.is_own(envelope) {
            if let Some(entity) = echo_entity(kind, &envelope.payload) {
                sink.echo_observed(entity);
            }
            debug!(kind = kind.as_str(), "own write echoed; skipped");
            return RouteOutcome::SelfEcho(kind);
        }

        match dispatch(kind, envelope, sink) {
            Some(changed) => {
                debug!(kind = kind.as_str(), changed, "envelope applied");
                RouteOutcome::Applied { kind, changed }
            }
            None => {
                warn!(kind = kind.as_str(), "malformed payload dropped");
                RouteOutcome::Malformed(kind)
            }
        }
    }

    fn is_own(&self, envelope: &Envelope) -> bool {
        matches!(
            (&self.local_user_id, &envelope.user_id),
            (Some(local), Some(origin)) if local == origin
        )
    }
}

fn dispatch(kind: EnvelopeKind, envelope: &Envelope, sink: &mut impl StateSink) -> Option<bool> {
    let payload = &envelope.payload;
    let origin = envelope.user_id.as_deref();
    let changed = match kind {
        EnvelopeKind::TaskCreated => sink.task_created(entity(payload)?),
        EnvelopeKind::TaskUpdated | EnvelopeKind::TaskStatusChanged | EnvelopeKind::TaskAssigned => {
            let task: Task = entity(payload)?;
            sink.entity_replaced(EntityRef::task(task.id), payload.clone(), origin)
        }
        EnvelopeKind::TaskDeleted => sink.task_deleted(id(payload, "projectId")?, id(payload, "id")?),
        EnvelopeKind::CommentAdded => {
            let task_id = id(payload, "taskId")?;
            sink.comment_added(task_id, entity(payload)?)
        }
        EnvelopeKind::CommentDeleted => {
            sink.comment_deleted(id(payload, "taskId")?, id(payload, "commentId")?)
        }
        EnvelopeKind::ProjectUpdated => {
            let project: Project = entity(payload)?;
            sink.entity_replaced(EntityRef::project(project.id), payload.clone(), origin)
        }
        EnvelopeKind::ProjectDeleted => sink.project_deleted(id(payload, "id")?),
        EnvelopeKind::MemberAdded => {
            let project_id = id(payload, "projectId")?;
            sink.member_added(project_id, entity(payload)?)
        }
        EnvelopeKind::MemberRemoved => {
            sink.member_removed(id(payload, "projectId")?, id(payload, "userId")?)
        }
        _ => return None,
    };
    Some(changed)
}

fn echo_entity(kind: EnvelopeKind, payload: &Value) -> Option<EntityRef> {
    match kind {
        EnvelopeKind::TaskCreated
        | EnvelopeKind::TaskUpdated
        | EnvelopeKind::TaskStatusChanged
        | EnvelopeKind::TaskAssigned
        | EnvelopeKind::TaskDeleted => id(payload, "id").map(EntityRef::task),
        EnvelopeKind::CommentAdded => id(payload, "id").map(EntityRef::comment),
        EnvelopeKind::CommentDeleted => id(payload, "commentId").map(EntityRef::comment),
        EnvelopeKind::ProjectUpdated | EnvelopeKind::ProjectDeleted => {
            id(payload, "id").map(EntityRef::project)
        }
        _ => None,
    }
}

fn entity<T: DeserializeOwned>(payload: &Value) -> Option<T> {
    serde_json::from_value(payload.clone()).ok()
}

fn id(payload: &Value, key: &str) -> Option<i64> {
    payload.get(key).and_then(id_number)
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
