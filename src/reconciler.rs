//! Optimistic writes over the local store.
//!
//! DESIGN
//! ======
//! A local write is applied to the store immediately and remembered as
//! *pending* together with a before-image of the entity. Three things can
//! settle it:
//!
//! - the REST response (authoritative): overwrite with the server's entity
//! - the broadcast echo of our own write: drop the pending record, touch nothing
//! - the REST failure: apply the rollback policy
//!
//! Broadcasts from other users always overwrite, pending or not. Ordering is
//! arrival order; a late authoritative response lands on top of an earlier
//! broadcast. When a broadcast hits a pending entity the before-image moves to
//! the broadcast value, so a later rollback restores what the server last said
//! rather than what this client saw before its own write.

use std::collections::HashMap;
use std::str::FromStr;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::router::StateSink;
use crate::store::{BoardStore, Comment, EntityKind, EntityRef, Member, Project, Task};

/// What happens to an optimistic write whose request failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RollbackPolicy {
    /// Put the before-image back.
    #[default]
    Restore,
    /// Leave the optimistic value in place until a broadcast or refetch corrects it.
    Keep,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown rollback policy `{0}`, expected `restore` or `keep`")]
pub struct ParsePolicyError(String);

impl FromStr for RollbackPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restore" => Ok(Self::Restore),
            "keep" => Ok(Self::Keep),
            other => Err(ParsePolicyError(other.to_owned())),
        }
    }
}

/// A local field-level write to one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimisticMutation {
    pub entity: EntityRef,
    pub fields: Map<String, Value>,
    pub issued_at: Instant,
}

impl OptimisticMutation {
    /// A write issued now.
    #[must_use]
    pub fn new(entity: EntityRef, fields: Map<String, Value>) -> Self {
        Self { entity, fields, issued_at: Instant::now() }
    }
}

struct Pending {
    before: Value,
    issued_at: Instant,
    writes: u32,
}

/// Outcome of a failed write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rollback {
    /// The before-image was written back.
    Restored,
    /// The optimistic value was left in place.
    Kept,
    /// Nothing to roll back: never pending, already settled, or another
    /// write to the same entity is still in flight.
    Nothing,
}

pub struct Reconciler {
    store: BoardStore,
    pending: HashMap<EntityRef, Pending>,
    policy: RollbackPolicy,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: BoardStore, policy: RollbackPolicy) -> Self {
        Self { store, pending: HashMap::new(), policy }
    }

    #[must_use]
    pub fn store(&self) -> &BoardStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut BoardStore {
        &mut self.store
    }

    #[must_use]
    pub fn policy(&self) -> RollbackPolicy {
        self.policy
    }

    #[must_use]
    pub fn is_pending(&self, entity: EntityRef) -> bool {
        self.pending.contains_key(&entity)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// How long the oldest outstanding write to `entity` has been in flight.
    #[must_use]
    pub fn pending_age(&self, entity: EntityRef) -> Option<std::time::Duration> {
        self.pending.get(&entity).map(|p| p.issued_at.elapsed())
    }

    /// Merge `mutation.fields` into the cached entity now.
    ///
    /// Returns `false` when the entity is not cached; nothing is recorded.
    pub fn apply_optimistic(&mut self, mutation: OptimisticMutation) -> bool {
        let OptimisticMutation { entity, fields, issued_at } = mutation;
        let Some(before) = self.store.snapshot(entity) else {
            debug!(?entity, "optimistic write to uncached entity skipped");
            return false;
        };

        let mut next = before.clone();
        if let Value::Object(object) = &mut next {
            object.extend(fields);
        }
        if !self.store.overwrite(entity, next) {
            warn!(?entity, "optimistic write produced an invalid entity");
            return false;
        }

        self.pending
            .entry(entity)
            .and_modify(|p| p.writes += 1)
            .or_insert(Pending { before, issued_at, writes: 1 });
        true
    }

    /// Apply the server's response to one of our writes.
    ///
    /// An entity deleted in the meantime stays deleted. With further writes
    /// to the entity still in flight, the response becomes their rollback
    /// target.
    pub fn reconcile_authoritative(&mut self, entity: EntityRef, payload: Value) -> bool {
        self.settle(entity);
        let applied = self.store.overwrite(entity, payload);
        if applied {
            self.refresh_before(entity);
        } else {
            debug!(?entity, "authoritative response for absent entity ignored");
        }
        applied
    }

    /// Apply the server's response to a create request.
    pub fn reconcile_created(&mut self, kind: EntityKind, payload: Value) -> bool {
        match kind {
            EntityKind::Task => match serde_json::from_value::<Task>(payload) {
                Ok(task) => self.store.task_created(task),
                Err(e) => {
                    warn!(error = %e, "created task payload rejected");
                    false
                }
            },
            EntityKind::Project => match serde_json::from_value::<Project>(payload) {
                Ok(project) => self.store.project_created(project),
                Err(e) => {
                    warn!(error = %e, "created project payload rejected");
                    false
                }
            },
            EntityKind::Comment => match serde_json::from_value::<Comment>(payload) {
                Ok(comment) => match comment.task_id {
                    Some(task_id) => self.store.comment_added(task_id, comment),
                    None => false,
                },
                Err(e) => {
                    warn!(error = %e, "created comment payload rejected");
                    false
                }
            },
        }
    }

    /// Apply another user's broadcast. Always overwrites a cached entity,
    /// pending or not.
    pub fn reconcile_broadcast(&mut self, entity: EntityRef, payload: Value, origin: Option<&str>) -> bool {
        let applied = self.store.overwrite(entity, payload);
        if applied {
            if self.pending.contains_key(&entity) {
                debug!(?entity, origin, "broadcast overwrote a pending write");
            }
            self.refresh_before(entity);
        }
        applied
    }

    /// Our own write came back on the broadcast channel.
    pub fn acknowledge_echo(&mut self, entity: EntityRef) -> bool {
        let settled = self.settle(entity);
        if settled {
            debug!(?entity, "pending write acknowledged by echo");
        }
        settled
    }

    /// The request behind an optimistic write failed.
    pub fn reconcile_failed(&mut self, entity: EntityRef) -> Rollback {
        match self.pending.get_mut(&entity) {
            None => return Rollback::Nothing,
            Some(pending) if pending.writes > 1 => {
                pending.writes -= 1;
                return Rollback::Nothing;
            }
            Some(_) => {}
        }
        let Some(pending) = self.pending.remove(&entity) else {
            return Rollback::Nothing;
        };

        match self.policy {
            RollbackPolicy::Keep => {
                info!(?entity, "write failed; keeping optimistic value");
                Rollback::Kept
            }
            RollbackPolicy::Restore => {
                if self.store.overwrite(entity, pending.before) {
                    info!(?entity, "write failed; restored previous value");
                    Rollback::Restored
                } else {
                    Rollback::Nothing
                }
            }
        }
    }

    /// Settle one outstanding write. Returns whether anything was pending.
    fn settle(&mut self, entity: EntityRef) -> bool {
        match self.pending.get_mut(&entity) {
            Some(pending) if pending.writes > 1 => {
                pending.writes -= 1;
                true
            }
            Some(_) => self.pending.remove(&entity).is_some(),
            None => false,
        }
    }

    fn refresh_before(&mut self, entity: EntityRef) {
        if let Some(pending) = self.pending.get_mut(&entity) {
            if let Some(current) = self.store.snapshot(entity) {
                pending.before = current;
            }
        }
    }

    fn forget(&mut self, entity: EntityRef) {
        if self.pending.remove(&entity).is_some() {
            debug!(?entity, "entity deleted; pending write dropped");
        }
    }
}

impl StateSink for Reconciler {
    fn task_created(&mut self, task: Task) -> bool {
        self.store.task_created(task)
    }

    fn entity_replaced(&mut self, entity: EntityRef, payload: Value, origin: Option<&str>) -> bool {
        self.reconcile_broadcast(entity, payload, origin)
    }

    fn task_deleted(&mut self, project_id: i64, task_id: i64) -> bool {
        self.forget(EntityRef::task(task_id));
        self.store.task_deleted(project_id, task_id)
    }

    fn comment_added(&mut self, task_id: i64, comment: Comment) -> bool {
        self.store.comment_added(task_id, comment)
    }

    fn comment_deleted(&mut self, task_id: i64, comment_id: i64) -> bool {
        self.forget(EntityRef::comment(comment_id));
        self.store.comment_deleted(task_id, comment_id)
    }

    fn project_deleted(&mut self, project_id: i64) -> bool {
        self.forget(EntityRef::project(project_id));
        self.store.project_deleted(project_id)
    }

    fn member_added(&mut self, project_id: i64, member: Member) -> bool {
        self.store.member_added(project_id, member)
    }

    fn member_removed(&mut self, project_id: i64, user_id: i64) -> bool {
        self.store.member_removed(project_id, user_id)
    }

    fn echo_observed(&mut self, entity: EntityRef) {
        self.acknowledge_echo(entity);
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod tests;
