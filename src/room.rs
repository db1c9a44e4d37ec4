//! The active project room: one project, two topics.

use frames::{presence_topic, project_topic};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Room {
    project_id: i64,
    entity_topic: String,
    presence_topic: String,
}

impl Room {
    #[must_use]
    pub fn new(project_id: i64) -> Self {
        Self {
            project_id,
            entity_topic: project_topic(project_id),
            presence_topic: presence_topic(project_id),
        }
    }

    #[must_use]
    pub fn project_id(&self) -> i64 {
        self.project_id
    }

    /// `/topic/project/{id}`: entity broadcasts.
    #[must_use]
    pub fn entity_topic(&self) -> &str {
        &self.entity_topic
    }

    /// `/topic/project/{id}/presence`.
    #[must_use]
    pub fn presence_topic(&self) -> &str {
        &self.presence_topic
    }

    /// Body of the `project.join` / `project.leave` control messages.
    #[must_use]
    pub fn control_payload(&self) -> serde_json::Value {
        serde_json::json!({ "projectId": self.project_id })
    }
}
