//! REST collaborator client.
//!
//! The sync core reads room snapshots and issues writes over REST; broadcasts
//! over the broker only ever carry the consequences. Everything goes through
//! [`BoardApi`] so the session can be driven by an in-memory double.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::store::{Comment, Member, Project, RoomSnapshot, Task};
use crate::transport::Credential;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("credential rejected (401)")]
    Unauthorized,
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn fetch_project(&self, project_id: i64) -> Result<Project, ApiError>;
    async fn fetch_tasks(&self, project_id: i64) -> Result<Vec<Task>, ApiError>;
    async fn fetch_members(&self, project_id: i64) -> Result<Vec<Member>, ApiError>;
    async fn fetch_task(&self, task_id: i64) -> Result<Task, ApiError>;
    async fn fetch_comments(&self, task_id: i64) -> Result<Vec<Comment>, ApiError>;

    /// `PUT /tasks/{id}`. Returns the server's task.
    async fn update_task(&self, task_id: i64, fields: Value) -> Result<Value, ApiError>;
    /// `PATCH /tasks/{id}/status`.
    async fn update_task_status(&self, task_id: i64, status: &str, position: i64) -> Result<Value, ApiError>;
    /// `PATCH /tasks/{id}/assign`. `None` unassigns.
    async fn assign_task(&self, task_id: i64, user_id: Option<i64>) -> Result<Value, ApiError>;

    /// `POST /projects/{id}/tasks`. Returns the created task.
    async fn create_task(&self, project_id: i64, fields: Value) -> Result<Value, ApiError>;
    /// `DELETE /tasks/{id}`.
    async fn delete_task(&self, task_id: i64) -> Result<(), ApiError>;
    /// `POST /tasks/{id}/comments`. Returns the created comment.
    async fn add_comment(&self, task_id: i64, content: &str) -> Result<Value, ApiError>;
    /// `DELETE /tasks/{id}/comments/{commentId}`.
    async fn delete_comment(&self, task_id: i64, comment_id: i64) -> Result<(), ApiError>;
}

/// Fetch project, tasks and members concurrently.
///
/// # Errors
///
/// Returns the first [`ApiError`] any of the three requests produced.
pub async fn fetch_snapshot(api: &dyn BoardApi, project_id: i64) -> Result<RoomSnapshot, ApiError> {
    let (project, tasks, members) = tokio::try_join!(
        api.fetch_project(project_id),
        api.fetch_tasks(project_id),
        api.fetch_members(project_id),
    )?;
    Ok(RoomSnapshot { project, tasks, members })
}

/// `reqwest` implementation with bearer authentication.
#[derive(Clone)]
pub struct HttpBoardApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBoardApi {
    /// # Errors
    ///
    /// Returns [`ApiError`] if the token is not a valid header value or the
    /// client cannot be built.
    pub fn new(base_url: &str, credential: &Credential) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", credential.token()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "api request");

        let request = self.client.request(method, &url);
        let request = if let Some(json) = body { request.json(&json) } else { request };

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let value = serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null);
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| String::from_utf8_lossy(&bytes).into_owned(), str::to_owned);
            return Err(ApiError::Status { status: status.as_u16(), message });
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let value = self.request(Method::GET, path, None).await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl BoardApi for HttpBoardApi {
    async fn fetch_project(&self, project_id: i64) -> Result<Project, ApiError> {
        self.get(&format!("/projects/{project_id}")).await
    }

    async fn fetch_tasks(&self, project_id: i64) -> Result<Vec<Task>, ApiError> {
        self.get(&format!("/projects/{project_id}/tasks")).await
    }

    async fn fetch_members(&self, project_id: i64) -> Result<Vec<Member>, ApiError> {
        self.get(&format!("/projects/{project_id}/members")).await
    }

    async fn fetch_task(&self, task_id: i64) -> Result<Task, ApiError> {
        self.get(&format!("/tasks/{task_id}")).await
    }

    async fn fetch_comments(&self, task_id: i64) -> Result<Vec<Comment>, ApiError> {
        self.get(&format!("/tasks/{task_id}/comments")).await
    }

    async fn update_task(&self, task_id: i64, fields: Value) -> Result<Value, ApiError> {
        self.request(Method::PUT, &format!("/tasks/{task_id}"), Some(fields)).await
    }

    async fn update_task_status(&self, task_id: i64, status: &str, position: i64) -> Result<Value, ApiError> {
        let body = json!({ "status": status, "position": position });
        self.request(Method::PATCH, &format!("/tasks/{task_id}/status"), Some(body)).await
    }

    async fn assign_task(&self, task_id: i64, user_id: Option<i64>) -> Result<Value, ApiError> {
        let body = json!({ "userId": user_id });
        self.request(Method::PATCH, &format!("/tasks/{task_id}/assign"), Some(body)).await
    }

    async fn create_task(&self, project_id: i64, fields: Value) -> Result<Value, ApiError> {
        self.request(Method::POST, &format!("/projects/{project_id}/tasks"), Some(fields)).await
    }

    async fn delete_task(&self, task_id: i64) -> Result<(), ApiError> {
        self.request(Method::DELETE, &format!("/tasks/{task_id}"), None).await?;
        Ok(())
    }

    async fn add_comment(&self, task_id: i64, content: &str) -> Result<Value, ApiError> {
        let body = json!({ "content": content });
        self.request(Method::POST, &format!("/tasks/{task_id}/comments"), Some(body)).await
    }

    async fn delete_comment(&self, task_id: i64, comment_id: i64) -> Result<(), ApiError> {
        self.request(Method::DELETE, &format!("/tasks/{task_id}/comments/{comment_id}"), None).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "api_mock.rs"]
pub(crate) mod mock;

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
