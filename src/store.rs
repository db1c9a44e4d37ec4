//! Local board cache.
//!
//! Mirrors what the UI renders: the project list, the open project, per-project
//! task and member lists, per-task comment lists and the open task. Wire
//! effects only touch lists that are already loaded; an update for something
//! the client never fetched is dropped, not fabricated.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// ENTITIES
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(deserialize_with = "lenient_id")]
    pub id: i64,
    #[serde(deserialize_with = "lenient_id")]
    pub project_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(deserialize_with = "lenient_id")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(deserialize_with = "lenient_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub task_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(deserialize_with = "lenient_id")]
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Project membership. Identity is `user.id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user: UserRef,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Authoritative state of one project as fetched over REST.
#[derive(Clone, Debug, PartialEq)]
pub struct RoomSnapshot {
    pub project: Project,
    pub tasks: Vec<Task>,
    pub members: Vec<Member>,
}

fn lenient_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    frames::id_number(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid id: {value}")))
}

fn lenient_opt_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(frames::id_number))
}

// =============================================================================
// ENTITY IDENTITY
// =============================================================================

/// Entity families the client writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Task,
    Project,
    Comment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    #[must_use]
    pub fn task(id: i64) -> Self {
        Self { kind: EntityKind::Task, id }
    }

    #[must_use]
    pub fn project(id: i64) -> Self {
        Self { kind: EntityKind::Project, id }
    }

    #[must_use]
    pub fn comment(id: i64) -> Self {
        Self { kind: EntityKind::Comment, id }
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Clone, Debug, Default)]
pub struct BoardStore {
    projects: Vec<Project>,
    current_project: Option<Project>,
    tasks_by_project: HashMap<i64, Vec<Task>>,
    current_task: Option<Task>,
    comments_by_task: HashMap<i64, Vec<Comment>>,
    members_by_project: HashMap<i64, Vec<Member>>,
}

impl BoardStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ---- loading ----

    pub fn set_projects(&mut self, projects: Vec<Project>) {
        self.projects = projects;
    }

    pub fn set_current_project(&mut self, project: Option<Project>) {
        self.current_project = project;
    }

    pub fn set_current_task(&mut self, task: Option<Task>) {
        self.current_task = task;
    }

    pub fn load_tasks(&mut self, project_id: i64, tasks: Vec<Task>) {
        self.tasks_by_project.insert(project_id, tasks);
    }

    pub fn load_comments(&mut self, task_id: i64, comments: Vec<Comment>) {
        self.comments_by_task.insert(task_id, comments);
    }

    pub fn load_members(&mut self, project_id: i64, members: Vec<Member>) {
        self.members_by_project.insert(project_id, members);
    }

    /// Replace a project's cached state with a REST snapshot and open it.
    pub fn load_room(&mut self, snapshot: RoomSnapshot) {
        let RoomSnapshot { project, tasks, members } = snapshot;
        let id = project.id;
        match self.projects.iter_mut().find(|p| p.id == id) {
            Some(slot) => *slot = project.clone(),
            None => self.projects.push(project.clone()),
        }
        self.current_project = Some(project);
        self.tasks_by_project.insert(id, tasks);
        self.members_by_project.insert(id, members);
    }

    // ---- wire effects ----

    /// Append to the project's list when that list is loaded.
    pub fn task_created(&mut self, task: Task) -> bool {
        let Some(tasks) = self.tasks_by_project.get_mut(&task.project_id) else {
            return false;
        };
        if let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id) {
            *slot = task;
        } else {
            tasks.push(task);
        }
        true
    }

    /// Replace by id within the loaded list, and the open task if it matches.
    pub fn task_replaced(&mut self, task: Task) -> bool {
        let mut changed = false;
        if let Some(slot) = self
            .tasks_by_project
            .get_mut(&task.project_id)
            .and_then(|tasks| tasks.iter_mut().find(|t| t.id == task.id))
        {
            *slot = task.clone();
            changed = true;
        }
        if let Some(current) = self.current_task.as_mut().filter(|t| t.id == task.id) {
            *current = task;
            changed = true;
        }
        changed
    }

    pub fn task_deleted(&mut self, project_id: i64, task_id: i64) -> bool {
        let mut changed = false;
        if let Some(tasks) = self.tasks_by_project.get_mut(&project_id) {
            let before = tasks.len();
            tasks.retain(|t| t.id != task_id);
            changed = tasks.len() != before;
        }
        if self.current_task.as_ref().is_some_and(|t| t.id == task_id) {
            self.current_task = None;
            changed = true;
        }
        changed
    }

    /// Append to the task's loaded comments; an id already present is replaced.
    pub fn comment_added(&mut self, task_id: i64, comment: Comment) -> bool {
        let Some(comments) = self.comments_by_task.get_mut(&task_id) else {
            return false;
        };
        if let Some(slot) = comments.iter_mut().find(|c| c.id == comment.id) {
            *slot = comment;
        } else {
            comments.push(comment);
        }
        true
    }

    pub fn comment_deleted(&mut self, task_id: i64, comment_id: i64) -> bool {
        let Some(comments) = self.comments_by_task.get_mut(&task_id) else {
            return false;
        };
        let before = comments.len();
        comments.retain(|c| c.id != comment_id);
        comments.len() != before
    }

    /// Add a project to the list unless it is already there.
    pub fn project_created(&mut self, project: Project) -> bool {
        if self.projects.iter().any(|p| p.id == project.id) {
            return false;
        }
        self.projects.push(project);
        true
    }

    pub fn project_replaced(&mut self, project: Project) -> bool {
        let mut changed = false;
        if let Some(slot) = self.projects.iter_mut().find(|p| p.id == project.id) {
            *slot = project.clone();
            changed = true;
        }
        if let Some(current) = self.current_project.as_mut().filter(|p| p.id == project.id) {
            *current = project;
            changed = true;
        }
        changed
    }

    pub fn project_deleted(&mut self, project_id: i64) -> bool {
        let before = self.projects.len();
        self.projects.retain(|p| p.id != project_id);
        let mut changed = self.projects.len() != before;
        if self.current_project.as_ref().is_some_and(|p| p.id == project_id) {
            self.current_project = None;
            changed = true;
        }
        changed
    }

    pub fn member_added(&mut self, project_id: i64, member: Member) -> bool {
        let Some(members) = self.members_by_project.get_mut(&project_id) else {
            return false;
        };
        members.push(member);
        true
    }

    pub fn member_removed(&mut self, project_id: i64, user_id: i64) -> bool {
        let Some(members) = self.members_by_project.get_mut(&project_id) else {
            return false;
        };
        let before = members.len();
        members.retain(|m| m.user.id != user_id);
        members.len() != before
    }

    // ---- generic access by identity ----

    /// Current JSON form of an entity, if cached anywhere.
    #[must_use]
    pub fn snapshot(&self, entity: EntityRef) -> Option<Value> {
        match entity.kind {
            EntityKind::Task => self.task(entity.id).and_then(|t| serde_json::to_value(t).ok()),
            EntityKind::Project => self.project(entity.id).and_then(|p| serde_json::to_value(p).ok()),
            EntityKind::Comment => self.comment(entity.id).and_then(|c| serde_json::to_value(c).ok()),
        }
    }

    /// Overwrite a cached entity with `value`. Absent entities stay absent.
    ///
    /// Returns `false` when nothing was cached or `value` is not a valid
    /// representation of the entity.
    pub fn overwrite(&mut self, entity: EntityRef, value: Value) -> bool {
        match entity.kind {
            EntityKind::Task => match serde_json::from_value::<Task>(value) {
                Ok(task) if task.id == entity.id => self.task_replaced(task),
                _ => false,
            },
            EntityKind::Project => match serde_json::from_value::<Project>(value) {
                Ok(project) if project.id == entity.id => self.project_replaced(project),
                _ => false,
            },
            EntityKind::Comment => match serde_json::from_value::<Comment>(value) {
                Ok(comment) if comment.id == entity.id => self.comment_replaced(comment),
                _ => false,
            },
        }
    }

    fn comment_replaced(&mut self, comment: Comment) -> bool {
        let slot = self
            .comments_by_task
            .values_mut()
            .flat_map(|comments| comments.iter_mut())
            .find(|c| c.id == comment.id);
        match slot {
            Some(slot) => {
                *slot = comment;
                true
            }
            None => false,
        }
    }

    // ---- queries ----

    #[must_use]
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    #[must_use]
    pub fn current_project(&self) -> Option<&Project> {
        self.current_project.as_ref()
    }

    #[must_use]
    pub fn current_task(&self) -> Option<&Task> {
        self.current_task.as_ref()
    }

    /// The project's task list, `None` if never loaded.
    #[must_use]
    pub fn tasks(&self, project_id: i64) -> Option<&[Task]> {
        self.tasks_by_project.get(&project_id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn comments(&self, task_id: i64) -> Option<&[Comment]> {
        self.comments_by_task.get(&task_id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn members(&self, project_id: i64) -> Option<&[Member]> {
        self.members_by_project.get(&project_id).map(Vec::as_slice)
    }

    /// Look a task up in any loaded list, then the open task.
    #[must_use]
    pub fn task(&self, task_id: i64) -> Option<&Task> {
        self.tasks_by_project
            .values()
            .flat_map(|tasks| tasks.iter())
            .find(|t| t.id == task_id)
            .or_else(|| self.current_task.as_ref().filter(|t| t.id == task_id))
    }

    #[must_use]
    pub fn project(&self, project_id: i64) -> Option<&Project> {
        self.projects
            .iter()
            .find(|p| p.id == project_id)
            .or_else(|| self.current_project.as_ref().filter(|p| p.id == project_id))
    }

    #[must_use]
    pub fn comment(&self, comment_id: i64) -> Option<&Comment> {
        self.comments_by_task
            .values()
            .flat_map(|comments| comments.iter())
            .find(|c| c.id == comment_id)
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
