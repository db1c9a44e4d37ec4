use super::mock::MockApi;
use super::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serve exactly one HTTP response and hand back the raw request.
async fn one_shot_server(status: &str, body: &str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let response = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut raw = Vec::new();
        let mut buf = [0_u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.expect("read");
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|line| {
                        let (k, v) = line.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if raw.len() >= head_end + 4 + length || n == 0 {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        socket.write_all(response.as_bytes()).await.expect("write");
        let _ = socket.shutdown().await;
        let _ = tx.send(String::from_utf8_lossy(&raw).to_string());
    });

    (format!("http://{addr}/api"), rx)
}

fn api(base: &str) -> HttpBoardApi {
    HttpBoardApi::new(base, &Credential::bearer("tok-9")).expect("client")
}

#[tokio::test]
async fn fetch_project_sends_bearer_and_decodes() {
    let (base, request) = one_shot_server("200 OK", r#"{"id":7,"name":"Board","ownerId":1}"#).await;

    let project = api(&base).fetch_project(7).await.expect("project");

    assert_eq!(project.id, 7);
    assert_eq!(project.name, "Board");
    let raw = request.await.expect("request");
    assert!(raw.starts_with("GET /api/projects/7 HTTP/1.1"));
    assert!(raw.to_ascii_lowercase().contains("authorization: bearer tok-9"));
}

#[tokio::test]
async fn status_update_patches_status_and_position() {
    let (base, request) = one_shot_server("200 OK", r#"{"id":5,"projectId":7,"status":"DONE"}"#).await;

    let value = api(&base).update_task_status(5, "DONE", 2).await.expect("update");

    assert_eq!(value["status"], "DONE");
    let raw = request.await.expect("request");
    assert!(raw.starts_with("PATCH /api/tasks/5/status HTTP/1.1"));
    let body = raw.split("\r\n\r\n").nth(1).unwrap_or_default();
    assert_eq!(serde_json::from_str::<Value>(body).expect("json"), json!({"status": "DONE", "position": 2}));
}

#[tokio::test]
async fn unauthorized_maps_to_dedicated_error() {
    let (base, _request) = one_shot_server("401 Unauthorized", r#"{"message":"expired"}"#).await;

    let err = api(&base).fetch_tasks(7).await.expect_err("should fail");

    assert!(matches!(err, ApiError::Unauthorized));
}

#[tokio::test]
async fn error_status_carries_server_message() {
    let (base, _request) = one_shot_server("403 Forbidden", r#"{"message":"not a member"}"#).await;

    let err = api(&base).assign_task(5, Some(3)).await.expect_err("should fail");

    assert!(matches!(err, ApiError::Status { status: 403, ref message } if message == "not a member"));
}

#[tokio::test]
async fn fetch_snapshot_joins_three_requests() {
    let project: Project = serde_json::from_value(json!({"id": 7, "name": "Board"})).expect("project");
    let task: Task = serde_json::from_value(json!({"id": 5, "projectId": 7})).expect("task");
    let mock = MockApi::with_room(RoomSnapshot { project, tasks: vec![task], members: Vec::new() });

    let snapshot = fetch_snapshot(&mock, 7).await.expect("snapshot");
    assert_eq!(snapshot.project.id, 7);
    assert_eq!(snapshot.tasks.len(), 1);

    let missing = fetch_snapshot(&mock, 8).await.expect_err("unknown project");
    assert!(matches!(missing, ApiError::Status { status: 404, .. }));
}

#[tokio::test]
async fn success_with_malformed_body_is_invalid_json() {
    let (base, _request) = one_shot_server("200 OK", "<html>gateway</html>").await;

    let err = api(&base).update_task(5, json!({"title": "x"})).await.expect_err("should fail");

    assert!(matches!(err, ApiError::InvalidJson(_)));
}

#[tokio::test]
async fn create_task_posts_to_project() {
    let (base, request) = one_shot_server("201 Created", r#"{"id":9,"projectId":7,"title":"New"}"#).await;

    let value = api(&base).create_task(7, json!({"title": "New"})).await.expect("create");

    assert_eq!(value["id"], 9);
    let raw = request.await.expect("request");
    assert!(raw.starts_with("POST /api/projects/7/tasks HTTP/1.1"));
}

#[tokio::test]
async fn delete_with_empty_body_succeeds() {
    let (base, request) = one_shot_server("200 OK", "").await;

    api(&base).delete_comment(5, 3).await.expect("delete");

    let raw = request.await.expect("request");
    assert!(raw.starts_with("DELETE /api/tasks/5/comments/3 HTTP/1.1"));
}
