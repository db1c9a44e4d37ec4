//! Session engine: the single writer of local board state.
//!
//! DESIGN
//! ======
//! A `Session` owns the broker connection, the subscription registry and the
//! `SyncState` every handler mutates. Three inputs feed it:
//!
//! - transport events (broker messages, lifecycle changes)
//! - REST completions, produced by spawned request tasks
//! - commands from the UI
//!
//! All three are consumed on one task, so handlers never contend for state and
//! an outstanding REST request never blocks inbound routing.
//!
//! ROOMS
//! =====
//! At most one room is active. Entering a different room leaves the current
//! one first. A transient link loss keeps the room: its subscriptions go stale
//! and are re-issued, with a fresh snapshot fetch, once the link is back. A
//! failed connection or an explicit disconnect destroys the room.
//!
//! UI OUTPUT
//! =========
//! Everything the UI needs to react to is a `SessionEvent` on the channel
//! returned by `Session::new`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use frames::{Delivery, EnvelopeKind, JOIN_DESTINATION, LEAVE_DESTINATION, NOTIFICATIONS_QUEUE};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tracing::{debug, info, warn};

use crate::api::{self, ApiError, BoardApi};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::presence::{PresenceEntry, PresenceEvent, PresenceTracker};
use crate::reconciler::{OptimisticMutation, Reconciler, Rollback};
use crate::room::Room;
use crate::router::{MessageRouter, RouteOutcome, StateSink};
use crate::store::{BoardStore, Comment, EntityKind, EntityRef, RoomSnapshot, Task};
use crate::subscriptions::{SubscriptionHandle, SubscriptionRegistry};
use crate::transport::{
    ConnectionEvent, ConnectionState, Connection, Connector, Credential, TransportEvent,
};

// =============================================================================
// EVENTS & COMMANDS
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Live,
    Offline,
}

/// Something a REST load was for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    Room(i64),
    Task(i64),
}

/// Output for the UI.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Connectivity(Connectivity),
    RoomEntered { project_id: i64 },
    RoomLoaded { project_id: i64 },
    RoomLeft { project_id: i64 },
    /// Cached board state of the project changed.
    StateChanged { project_id: i64 },
    PresenceChanged { project_id: i64, online: Vec<PresenceEntry> },
    /// Message on the private notification queue.
    Notification(Delivery),
    /// Someone else created a task in the open room.
    TaskCreatedByPeer { project_id: i64, title: String },
    TaskOpened { task_id: i64 },
    WriteConfirmed { entity: EntityRef },
    WriteFailed { entity: EntityRef, error: String, rollback: Rollback },
    /// A create request failed; nothing was cached for it.
    CreateFailed { kind: EntityKind, error: String },
    LoadFailed { resource: Resource, error: String },
}

/// Input from the UI.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionCommand {
    EnterRoom(i64),
    LeaveRoom,
    SubscribeNotifications,
    OpenTask(i64),
    MoveTask { task_id: i64, status: String, position: i64 },
    EditTask { task_id: i64, fields: Map<String, Value> },
    AssignTask { task_id: i64, user_id: Option<i64> },
    CreateTask { project_id: i64, fields: Map<String, Value> },
    DeleteTask(i64),
    AddComment { task_id: i64, content: String },
    DeleteComment { task_id: i64, comment_id: i64 },
    Shutdown,
}

enum Completion {
    Snapshot { project_id: i64, result: Result<RoomSnapshot, ApiError> },
    Task { task_id: i64, result: Result<(Task, Vec<Comment>), ApiError> },
    Write { entity: EntityRef, result: Result<Value, ApiError> },
    /// `owner` is the project of a task or the task of a comment.
    Created { kind: EntityKind, owner: i64, result: Result<Value, ApiError> },
    Deleted { entity: EntityRef, owner: i64, result: Result<(), ApiError> },
}

// =============================================================================
// STATE
// =============================================================================

/// State handed to subscription handlers.
pub struct SyncState {
    router: MessageRouter,
    reconciler: Reconciler,
    presence: PresenceTracker,
    room: Option<Room>,
    outbox: Vec<SessionEvent>,
}

impl SyncState {
    fn new(local_user_id: Option<String>, reconciler: Reconciler) -> Self {
        Self {
            router: MessageRouter::new(local_user_id),
            reconciler,
            presence: PresenceTracker::new(),
            room: None,
            outbox: Vec::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &BoardStore {
        self.reconciler.store()
    }

    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    #[must_use]
    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    fn in_room(&self, project_id: i64) -> bool {
        self.room.as_ref().is_some_and(|room| room.project_id() == project_id)
    }

    fn on_entity_message(&mut self, project_id: i64, delivery: Delivery) {
        let envelope = match delivery {
            Delivery::Decoded(envelope) => envelope,
            Delivery::Raw(body) => {
                warn!(project_id, len = body.len(), "undecodable board message dropped");
                return;
            }
        };

        let outcome = self.router.route(&envelope, &mut self.reconciler);
        let RouteOutcome::Applied { kind, changed: true } = outcome else {
            return;
        };
        if kind == EnvelopeKind::TaskCreated {
            if let Some(title) = self.peer_task_title(&envelope.payload) {
                self.outbox.push(SessionEvent::TaskCreatedByPeer { project_id, title });
            }
        }
        self.outbox.push(SessionEvent::StateChanged { project_id });
    }

    /// Title of a task created by someone other than the local user.
    fn peer_task_title(&self, payload: &Value) -> Option<String> {
        let creator = payload
            .get("createdBy")
            .and_then(|user| user.get("id"))
            .and_then(frames::id_string);
        if creator.is_some() && creator.as_deref() == self.router.local_user_id() {
            return None;
        }
        Some(payload.get("title").and_then(Value::as_str).unwrap_or_default().to_owned())
    }

    fn on_presence_message(&mut self, project_id: i64, delivery: Delivery) {
        let Delivery::Decoded(envelope) = delivery else {
            warn!(project_id, "undecodable presence message dropped");
            return;
        };
        let Some(event) = PresenceEvent::from_envelope(&envelope, Some(project_id)) else {
            debug!(project_id, kind = %envelope.kind, "presence message ignored");
            return;
        };
        if event.room() != project_id {
            debug!(project_id, other = event.room(), "presence for another room ignored");
            return;
        }
        if self.presence.apply(event) {
            self.push_presence(project_id);
        }
    }

    fn on_notification(&mut self, delivery: Delivery) {
        self.outbox.push(SessionEvent::Notification(delivery));
    }

    fn push_presence(&mut self, project_id: i64) {
        let online = self.presence.online_users(project_id);
        self.outbox.push(SessionEvent::PresenceChanged { project_id, online });
    }
}

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    config: SyncConfig,
    connection: Connection,
    registry: SubscriptionRegistry<SyncState>,
    state: SyncState,
    api: Arc<dyn BoardApi>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Build a session and the channel its UI events arrive on.
    #[must_use]
    pub fn new(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        api: Arc<dyn BoardApi>,
        local_user_id: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let reconciler = Reconciler::new(BoardStore::new(), config.rollback);
        let session = Self {
            connection: Connection::new(config.transport.clone(), connector),
            config,
            registry: SubscriptionRegistry::new(),
            state: SyncState::new(local_user_id, reconciler),
            api,
            completions_tx,
            completions_rx,
            events,
        };
        (session, events_rx)
    }

    #[must_use]
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    #[must_use]
    pub fn store(&self) -> &BoardStore {
        self.state.store()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn current_room(&self) -> Option<i64> {
        self.state.room.as_ref().map(Room::project_id)
    }

    #[must_use]
    pub fn online_users(&self, project_id: i64) -> Vec<PresenceEntry> {
        self.state.presence.online_users(project_id)
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionRegistry<SyncState> {
        &self.registry
    }

    /// Connect the broker link.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Connection`] when the handshake fails.
    pub async fn connect(&mut self, credential: Credential) -> Result<(), SyncError> {
        let result = self.connection.connect(credential).await;
        let connectivity = if result.is_ok() { Connectivity::Live } else { Connectivity::Offline };
        self.emit(SessionEvent::Connectivity(connectivity));
        result.map_err(SyncError::from)
    }

    /// Leave the room, drop every subscription and close the link.
    pub async fn disconnect(&mut self) {
        if let Some(room) = self.state.room.take() {
            if self.connection.is_connected() {
                self.connection.send(LEAVE_DESTINATION, &room.control_payload());
            }
            self.state.presence.clear_room(room.project_id());
            self.state.outbox.push(SessionEvent::RoomLeft { project_id: room.project_id() });
        }
        self.registry.unsubscribe_all(&self.connection);
        self.connection.disconnect().await;
        self.state.outbox.push(SessionEvent::Connectivity(Connectivity::Offline));
        self.flush();
    }

    // ---- rooms ----

    /// Open `project_id` as the active room.
    ///
    /// Re-entering the active room only restores stale subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SubscriptionRejected`] when not connected.
    pub fn enter_room(&mut self, project_id: i64) -> Result<(), SyncError> {
        if !self.connection.is_connected() {
            warn!(project_id, "not connected; cannot enter room");
            return Err(SyncError::SubscriptionRejected(frames::project_topic(project_id)));
        }
        if self.state.in_room(project_id) {
            debug!(project_id, "already in room");
            self.restore_room();
            return Ok(());
        }
        self.leave_room();

        let room = Room::new(project_id);
        if let Err(e) = self.subscribe_room(&room) {
            self.registry.unsubscribe(&self.connection, room.entity_topic());
            self.registry.unsubscribe(&self.connection, room.presence_topic());
            return Err(e);
        }
        self.connection.send(JOIN_DESTINATION, &room.control_payload());
        self.state.room = Some(room);
        info!(project_id, "room entered");

        self.state.outbox.push(SessionEvent::RoomEntered { project_id });
        self.load_room(project_id);
        self.flush();
        Ok(())
    }

    /// Leave the active room, if any.
    pub fn leave_room(&mut self) {
        let Some(room) = self.state.room.take() else {
            return;
        };
        let project_id = room.project_id();
        if self.connection.is_connected() {
            self.connection.send(LEAVE_DESTINATION, &room.control_payload());
        }
        self.registry.unsubscribe(&self.connection, room.entity_topic());
        self.registry.unsubscribe(&self.connection, room.presence_topic());
        self.state.presence.clear_room(project_id);
        info!(project_id, "room left");

        self.state.outbox.push(SessionEvent::RoomLeft { project_id });
        self.flush();
    }

    /// Subscribe the private notification queue. `None` when not connected.
    pub fn subscribe_notifications(&mut self) -> Option<SubscriptionHandle> {
        self.registry.subscribe(&self.connection, NOTIFICATIONS_QUEUE, |state: &mut SyncState, delivery| {
            state.on_notification(delivery);
        })
    }

    fn subscribe_room(&mut self, room: &Room) -> Result<(), SyncError> {
        let project_id = room.project_id();
        let entity = self
            .registry
            .subscribe(&self.connection, room.entity_topic(), move |state: &mut SyncState, delivery| {
                state.on_entity_message(project_id, delivery);
            });
        let presence = self
            .registry
            .subscribe(&self.connection, room.presence_topic(), move |state: &mut SyncState, delivery| {
                state.on_presence_message(project_id, delivery);
            });
        if entity.is_none() || presence.is_none() {
            return Err(SyncError::SubscriptionRejected(room.entity_topic().to_owned()));
        }
        Ok(())
    }

    /// Re-issue stale subscriptions after a reconnect and rejoin the room.
    fn restore_room(&mut self) {
        if self.registry.is_stale(&self.connection, NOTIFICATIONS_QUEUE) {
            self.subscribe_notifications();
        }

        let Some(room) = self.state.room.clone() else {
            return;
        };
        let stale = self.registry.is_stale(&self.connection, room.entity_topic())
            || self.registry.is_stale(&self.connection, room.presence_topic());
        if !stale {
            return;
        }
        if let Err(e) = self.subscribe_room(&room) {
            warn!(error = %e, "room restore failed");
            return;
        }
        self.connection.send(JOIN_DESTINATION, &room.control_payload());
        info!(project_id = room.project_id(), "room restored after reconnect");
        self.load_room(room.project_id());
    }

    /// Tear the room and every subscription down without talking to the broker.
    fn destroy_room(&mut self) {
        if let Some(room) = self.state.room.take() {
            self.state.presence.clear_room(room.project_id());
            self.state.outbox.push(SessionEvent::RoomLeft { project_id: room.project_id() });
            info!(project_id = room.project_id(), "room destroyed");
        }
        self.registry.unsubscribe_all(&self.connection);
    }

    // ---- loads ----

    fn load_room(&self, project_id: i64) {
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = api::fetch_snapshot(api.as_ref(), project_id).await;
            Completion::Snapshot { project_id, result }
        });
    }

    /// Fetch a task with its comments and make it the open task.
    pub fn open_task(&mut self, task_id: i64) {
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = tokio::try_join!(api.fetch_task(task_id), api.fetch_comments(task_id));
            Completion::Task { task_id, result }
        });
    }

    // ---- optimistic writes ----

    /// Move a task to `status` at `position`. `false` if the task is not cached.
    pub fn move_task(&mut self, task_id: i64, status: &str, position: i64) -> bool {
        let fields = object(json!({ "status": status, "position": position }));
        let api = Arc::clone(&self.api);
        let status = status.to_owned();
        self.write(EntityRef::task(task_id), fields, async move {
            api.update_task_status(task_id, &status, position).await
        })
    }

    /// Overwrite arbitrary task fields.
    pub fn edit_task(&mut self, task_id: i64, fields: Map<String, Value>) -> bool {
        let api = Arc::clone(&self.api);
        let body = Value::Object(fields.clone());
        self.write(EntityRef::task(task_id), fields, async move {
            api.update_task(task_id, body).await
        })
    }

    /// Assign a task to `user_id`, or unassign with `None`.
    pub fn assign_task(&mut self, task_id: i64, user_id: Option<i64>) -> bool {
        let fields = object(json!({ "assigneeId": user_id }));
        let api = Arc::clone(&self.api);
        self.write(EntityRef::task(task_id), fields, async move {
            api.assign_task(task_id, user_id).await
        })
    }

    fn write<F>(&mut self, entity: EntityRef, fields: Map<String, Value>, request: F) -> bool
    where
        F: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        if !self
            .state
            .reconciler
            .apply_optimistic(OptimisticMutation::new(entity, fields))
        {
            warn!(?entity, "write to uncached entity rejected");
            return false;
        }
        if let Some(project_id) = self.project_of(entity) {
            self.state.outbox.push(SessionEvent::StateChanged { project_id });
        }
        self.spawn(async move {
            let result = request.await;
            Completion::Write { entity, result }
        });
        self.flush();
        true
    }

    // ---- creates & deletes ----
    //
    // Not optimistic: the store changes once the server has answered, since
    // a create has no id before then.

    /// Create a task in `project_id` from `fields`.
    pub fn create_task(&mut self, project_id: i64, fields: Map<String, Value>) {
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = api.create_task(project_id, Value::Object(fields)).await;
            Completion::Created { kind: EntityKind::Task, owner: project_id, result }
        });
    }

    /// Delete a cached task. `false` if the task is not cached.
    pub fn delete_task(&mut self, task_id: i64) -> bool {
        let Some(project_id) = self.state.store().task(task_id).map(|task| task.project_id) else {
            warn!(task_id, "delete of uncached task rejected");
            return false;
        };
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = api.delete_task(task_id).await;
            Completion::Deleted { entity: EntityRef::task(task_id), owner: project_id, result }
        });
        true
    }

    pub fn add_comment(&mut self, task_id: i64, content: &str) {
        let api = Arc::clone(&self.api);
        let content = content.to_owned();
        self.spawn(async move {
            let result = api.add_comment(task_id, &content).await;
            Completion::Created { kind: EntityKind::Comment, owner: task_id, result }
        });
    }

    pub fn delete_comment(&mut self, task_id: i64, comment_id: i64) {
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = api.delete_comment(task_id, comment_id).await;
            Completion::Deleted { entity: EntityRef::comment(comment_id), owner: task_id, result }
        });
    }

    /// Active project an entity belongs to.
    fn project_of(&self, entity: EntityRef) -> Option<i64> {
        let store = self.state.store();
        match entity.kind {
            EntityKind::Task => store.task(entity.id).and_then(|task| self.active(task.project_id)),
            EntityKind::Project => self.active(entity.id),
            EntityKind::Comment => store
                .comment(entity.id)
                .and_then(|comment| comment.task_id)
                .and_then(|task_id| self.project_of(EntityRef::task(task_id))),
        }
    }

    /// Active project of a task's project or a comment's task.
    fn project_of_owner(&self, kind: EntityKind, owner: i64) -> Option<i64> {
        match kind {
            EntityKind::Task | EntityKind::Project => self.active(owner),
            EntityKind::Comment => self.project_of(EntityRef::task(owner)),
        }
    }

    fn active(&self, project_id: i64) -> Option<i64> {
        self.state.in_room(project_id).then_some(project_id)
    }

    fn spawn<F>(&self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(work.await);
        });
    }

    // ---- event handling ----

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Snapshot { project_id, result } => {
                if !self.state.in_room(project_id) {
                    debug!(project_id, "snapshot for a closed room dropped");
                    return;
                }
                match result {
                    Ok(snapshot) => {
                        self.state.reconciler.store_mut().load_room(snapshot);
                        info!(project_id, "room loaded");
                        self.state.outbox.push(SessionEvent::RoomLoaded { project_id });
                        self.state.outbox.push(SessionEvent::StateChanged { project_id });
                    }
                    Err(e) => {
                        warn!(project_id, error = %e, "room load failed");
                        self.state.outbox.push(SessionEvent::LoadFailed {
                            resource: Resource::Room(project_id),
                            error: e.to_string(),
                        });
                    }
                }
            }
            Completion::Task { task_id, result } => match result {
                Ok((task, comments)) => {
                    let store = self.state.reconciler.store_mut();
                    store.set_current_task(Some(task));
                    store.load_comments(task_id, comments);
                    self.state.outbox.push(SessionEvent::TaskOpened { task_id });
                }
                Err(e) => {
                    warn!(task_id, error = %e, "task load failed");
                    self.state.outbox.push(SessionEvent::LoadFailed {
                        resource: Resource::Task(task_id),
                        error: e.to_string(),
                    });
                }
            },
            Completion::Write { entity, result } => match result {
                Ok(value) => {
                    let applied = self.state.reconciler.reconcile_authoritative(entity, value);
                    debug!(?entity, applied, "write confirmed");
                    self.state.outbox.push(SessionEvent::WriteConfirmed { entity });
                    if let Some(project_id) = self.project_of(entity).filter(|_| applied) {
                        self.state.outbox.push(SessionEvent::StateChanged { project_id });
                    }
                }
                Err(e) => {
                    warn!(?entity, error = %e, "write failed");
                    let rollback = self.state.reconciler.reconcile_failed(entity);
                    self.state.outbox.push(SessionEvent::WriteFailed {
                        entity,
                        error: e.to_string(),
                        rollback,
                    });
                    if rollback == Rollback::Restored {
                        if let Some(project_id) = self.project_of(entity) {
                            self.state.outbox.push(SessionEvent::StateChanged { project_id });
                        }
                    }
                }
            },
            Completion::Created { kind, owner, result } => self.on_created(kind, owner, result),
            Completion::Deleted { entity, owner, result } => self.on_deleted(entity, owner, result),
        }
        self.flush();
    }

    fn on_created(&mut self, kind: EntityKind, owner: i64, result: Result<Value, ApiError>) {
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                warn!(?kind, owner, error = %e, "create failed");
                self.state.outbox.push(SessionEvent::CreateFailed { kind, error: e.to_string() });
                return;
            }
        };
        let Some(id) = value.get("id").and_then(frames::id_number) else {
            warn!(?kind, owner, "create response without id");
            self.state.outbox.push(SessionEvent::CreateFailed { kind, error: "response without id".into() });
            return;
        };
        let applied = self.state.reconciler.reconcile_created(kind, value);
        let entity = EntityRef { kind, id };
        debug!(?entity, applied, "create confirmed");
        self.state.outbox.push(SessionEvent::WriteConfirmed { entity });
        if let Some(project_id) = self.project_of_owner(kind, owner).filter(|_| applied) {
            self.state.outbox.push(SessionEvent::StateChanged { project_id });
        }
    }

    fn on_deleted(&mut self, entity: EntityRef, owner: i64, result: Result<(), ApiError>) {
        if let Err(e) = result {
            warn!(?entity, error = %e, "delete failed");
            self.state.outbox.push(SessionEvent::WriteFailed {
                entity,
                error: e.to_string(),
                rollback: Rollback::Nothing,
            });
            return;
        }
        let reconciler = &mut self.state.reconciler;
        let changed = match entity.kind {
            EntityKind::Task => reconciler.task_deleted(owner, entity.id),
            EntityKind::Comment => reconciler.comment_deleted(owner, entity.id),
            EntityKind::Project => reconciler.project_deleted(entity.id),
        };
        debug!(?entity, changed, "delete confirmed");
        self.state.outbox.push(SessionEvent::WriteConfirmed { entity });
        if let Some(project_id) = self.project_of_owner(entity.kind, owner).filter(|_| changed) {
            self.state.outbox.push(SessionEvent::StateChanged { project_id });
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => {
                if !self.registry.deliver(&mut self.state, &message) {
                    debug!(destination = %message.destination, "message for unsubscribed topic");
                }
            }
            TransportEvent::Lifecycle(ConnectionEvent::Connected) => {
                self.state.outbox.push(SessionEvent::Connectivity(Connectivity::Live));
                self.restore_room();
            }
            TransportEvent::Lifecycle(ConnectionEvent::Disconnected) => {
                self.state.outbox.push(SessionEvent::Connectivity(Connectivity::Offline));
            }
            TransportEvent::Lifecycle(ConnectionEvent::Error(message)) => {
                warn!(error = %message, "broker connection failed");
                self.state.outbox.push(SessionEvent::Connectivity(Connectivity::Offline));
                self.destroy_room();
            }
        }
        self.flush();
    }

    /// Refresh presence: re-announce the room, then prune silent users.
    ///
    /// Relies on the broker answering every `project.join` with an
    /// `ONLINE_USERS` sync to the joiner; that answer is what refreshes the
    /// `last_seen` of users who are still connected. Against a broker that
    /// only announces joins once, live users would be pruned after `ttl`.
    fn presence_tick(&mut self, ttl: Duration) {
        if let Some(room) = self.state.room.as_ref() {
            if self.connection.is_connected() {
                self.connection.send(JOIN_DESTINATION, &room.control_payload());
            }
        }
        let Some(cutoff) = Instant::now().checked_sub(ttl) else {
            return;
        };
        for project_id in self.state.presence.prune_stale(cutoff) {
            self.state.push_presence(project_id);
        }
        self.flush();
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::EnterRoom(project_id) => {
                if let Err(e) = self.enter_room(project_id) {
                    warn!(project_id, error = %e, "enter room failed");
                }
            }
            SessionCommand::LeaveRoom => self.leave_room(),
            SessionCommand::SubscribeNotifications => {
                self.subscribe_notifications();
            }
            SessionCommand::OpenTask(task_id) => self.open_task(task_id),
            SessionCommand::MoveTask { task_id, status, position } => {
                self.move_task(task_id, &status, position);
            }
            SessionCommand::EditTask { task_id, fields } => {
                self.edit_task(task_id, fields);
            }
            SessionCommand::AssignTask { task_id, user_id } => {
                self.assign_task(task_id, user_id);
            }
            SessionCommand::CreateTask { project_id, fields } => self.create_task(project_id, fields),
            SessionCommand::DeleteTask(task_id) => {
                self.delete_task(task_id);
            }
            SessionCommand::AddComment { task_id, content } => self.add_comment(task_id, &content),
            SessionCommand::DeleteComment { task_id, comment_id } => self.delete_comment(task_id, comment_id),
            SessionCommand::Shutdown => {}
        }
    }

    /// Process one transport event or REST completion.
    ///
    /// Returns `false` once the connection's event channel is gone.
    pub async fn pump(&mut self) -> bool {
        tokio::select! {
            event = self.connection.next_event() => match event {
                Some(event) => {
                    self.handle_transport_event(event);
                    true
                }
                None => false,
            },
            Some(done) = self.completions_rx.recv() => {
                self.handle_completion(done);
                true
            }
        }
    }

    /// Run until `Shutdown` or the command channel closes, then disconnect.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        let ttl = self.config.presence_ttl;
        let mut prune = ttl.map(|ttl| tokio::time::interval(ttl / 2));

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(SessionCommand::Shutdown) => break,
                    Some(command) => self.handle_command(command),
                },
                event = self.connection.next_event() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => break,
                },
                Some(done) = self.completions_rx.recv() => self.handle_completion(done),
                () = tick(&mut prune) => {
                    if let Some(ttl) = ttl {
                        self.presence_tick(ttl);
                    }
                }
            }
        }

        info!("session shutting down");
        self.disconnect().await;
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn flush(&mut self) {
        for event in self.state.outbox.drain(..) {
            let _ = self.events.send(event);
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
