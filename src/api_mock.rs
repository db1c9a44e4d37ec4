//! In-memory `BoardApi` for session tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use super::{ApiError, BoardApi};
use crate::store::{Comment, Member, Project, RoomSnapshot, Task};

/// One recorded write request. `target` is the id in the request path.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Write {
    pub op: &'static str,
    pub target: i64,
    pub body: Value,
}

#[derive(Default)]
pub(crate) struct MockApi {
    rooms: Mutex<HashMap<i64, RoomSnapshot>>,
    comments: Mutex<HashMap<i64, Vec<Comment>>>,
    writes: Mutex<Vec<Write>>,
    fail_writes: AtomicBool,
    hold_writes: AtomicBool,
    release: Notify,
    last_id: AtomicI64,
}

impl MockApi {
    pub(crate) fn with_room(snapshot: RoomSnapshot) -> Self {
        let api = Self::default();
        api.add_room(snapshot);
        api
    }

    pub(crate) fn add_room(&self, snapshot: RoomSnapshot) {
        self.rooms
            .lock()
            .expect("rooms mutex should lock")
            .insert(snapshot.project.id, snapshot);
    }

    pub(crate) fn set_comments(&self, task_id: i64, comments: Vec<Comment>) {
        self.comments.lock().expect("comments mutex should lock").insert(task_id, comments);
    }

    /// Make every later write fail with a 500.
    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Park writes until `release_write` is called once per write.
    pub(crate) fn hold_writes(&self) {
        self.hold_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release_write(&self) {
        self.release.notify_one();
    }

    pub(crate) fn writes(&self) -> Vec<Write> {
        self.writes.lock().expect("writes mutex should lock").clone()
    }

    fn next_id(&self) -> i64 {
        1000 + self.last_id.fetch_add(1, Ordering::SeqCst)
    }

    fn room(&self, project_id: i64) -> Result<RoomSnapshot, ApiError> {
        self.rooms
            .lock()
            .expect("rooms mutex should lock")
            .get(&project_id)
            .cloned()
            .ok_or_else(|| not_found(&format!("project {project_id}")))
    }

    fn find_task(&self, task_id: i64) -> Option<Task> {
        self.rooms
            .lock()
            .expect("rooms mutex should lock")
            .values()
            .flat_map(|room| room.tasks.iter())
            .find(|t| t.id == task_id)
            .cloned()
    }

    /// Record a write, then park or fail it as configured.
    async fn gate(&self, op: &'static str, target: i64, body: Value) -> Result<(), ApiError> {
        self.writes
            .lock()
            .expect("writes mutex should lock")
            .push(Write { op, target, body });
        if self.hold_writes.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ApiError::Status { status: 500, message: "write failed".into() });
        }
        Ok(())
    }

    async fn write(&self, op: &'static str, task_id: i64, body: Value) -> Result<Value, ApiError> {
        self.gate(op, task_id, body.clone()).await?;

        let task = self.find_task(task_id).ok_or_else(|| not_found(&format!("task {task_id}")))?;
        let mut value = serde_json::to_value(task)?;
        if let (Value::Object(target), Value::Object(fields)) = (&mut value, body) {
            target.extend(fields);
        }
        Ok(value)
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::Status { status: 404, message: format!("{what} not found") }
}

#[async_trait]
impl BoardApi for MockApi {
    async fn fetch_project(&self, project_id: i64) -> Result<Project, ApiError> {
        Ok(self.room(project_id)?.project)
    }

    async fn fetch_tasks(&self, project_id: i64) -> Result<Vec<Task>, ApiError> {
        Ok(self.room(project_id)?.tasks)
    }

    async fn fetch_members(&self, project_id: i64) -> Result<Vec<Member>, ApiError> {
        Ok(self.room(project_id)?.members)
    }

    async fn fetch_task(&self, task_id: i64) -> Result<Task, ApiError> {
        self.find_task(task_id).ok_or_else(|| not_found(&format!("task {task_id}")))
    }

    async fn fetch_comments(&self, task_id: i64) -> Result<Vec<Comment>, ApiError> {
        Ok(self
            .comments
            .lock()
            .expect("comments mutex should lock")
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_task(&self, task_id: i64, fields: Value) -> Result<Value, ApiError> {
        self.write("update", task_id, fields).await
    }

    async fn update_task_status(&self, task_id: i64, status: &str, position: i64) -> Result<Value, ApiError> {
        self.write("status", task_id, json!({ "status": status, "position": position })).await
    }

    async fn assign_task(&self, task_id: i64, user_id: Option<i64>) -> Result<Value, ApiError> {
        self.write("assign", task_id, json!({ "assigneeId": user_id })).await
    }

    async fn create_task(&self, project_id: i64, fields: Value) -> Result<Value, ApiError> {
        self.gate("create_task", project_id, fields.clone()).await?;
        let mut value = json!({ "id": self.next_id(), "projectId": project_id, "status": "TODO" });
        if let (Value::Object(target), Value::Object(fields)) = (&mut value, fields) {
            target.extend(fields);
        }
        let task: Task = serde_json::from_value(value.clone())?;
        if let Some(room) = self.rooms.lock().expect("rooms mutex should lock").get_mut(&project_id) {
            room.tasks.push(task);
        }
        Ok(value)
    }

    async fn delete_task(&self, task_id: i64) -> Result<(), ApiError> {
        self.gate("delete_task", task_id, Value::Null).await?;
        let mut rooms = self.rooms.lock().expect("rooms mutex should lock");
        let mut found = false;
        for room in rooms.values_mut() {
            let before = room.tasks.len();
            room.tasks.retain(|t| t.id != task_id);
            found |= room.tasks.len() != before;
        }
        if found { Ok(()) } else { Err(not_found(&format!("task {task_id}"))) }
    }

    async fn add_comment(&self, task_id: i64, content: &str) -> Result<Value, ApiError> {
        self.gate("add_comment", task_id, json!({ "content": content })).await?;
        let value = json!({ "id": self.next_id(), "taskId": task_id, "content": content });
        let comment: Comment = serde_json::from_value(value.clone())?;
        self.comments
            .lock()
            .expect("comments mutex should lock")
            .entry(task_id)
            .or_default()
            .push(comment);
        Ok(value)
    }

    async fn delete_comment(&self, task_id: i64, comment_id: i64) -> Result<(), ApiError> {
        self.gate("delete_comment", comment_id, json!({ "taskId": task_id })).await?;
        let mut comments = self.comments.lock().expect("comments mutex should lock");
        let list = comments.get_mut(&task_id).ok_or_else(|| not_found(&format!("comment {comment_id}")))?;
        let before = list.len();
        list.retain(|c| c.id != comment_id);
        if list.len() == before {
            return Err(not_found(&format!("comment {comment_id}")));
        }
        Ok(())
    }
}
