//! Gateway routes against a SQLite-backed store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use datastream_core::{Capability, PollSettings};
use datastream_gateway::json::{
    CapabilitiesResponse, HealthResponse, PullResponse, RecordJson, SuccessResponse,
};
use datastream_gateway::{create_router, AppState};
use datastream_storage::{RelationalConfig, RelationalStore};
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

fn database() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE data (
            key TEXT PRIMARY KEY,
            value BLOB,
            value_type TEXT,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        INSERT INTO data (key, value, value_type, updated_at)
        VALUES ('max_connections', '10', 'int', '2024-01-01 00:00:00');",
    )
    .unwrap();
    (dir, path)
}

fn server(path: &Path, poll: PollSettings) -> TestServer {
    let store = RelationalStore::open_sqlite(
        path,
        RelationalConfig::new("data").with_poll_settings(poll),
    )
    .unwrap();
    TestServer::new(create_router(AppState::new(store))).unwrap()
}

fn polling() -> PollSettings {
    PollSettings::new(Duration::from_millis(25))
}

#[tokio::test]
async fn test_health() {
    let (_dir, path) = database();
    let server = server(&path, polling());

    let response = server.get("/health").await;
    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.backend, "relational");
    assert!(health.backend_reachable);
}

#[tokio::test]
async fn test_capabilities() {
    let (_dir, path) = database();
    let server = server(&path, polling());

    let response = server.get("/capabilities").await;
    response.assert_status_ok();
    let body: CapabilitiesResponse = response.json();
    assert_eq!(
        body.capabilities,
        vec![Capability::new("max_connections", "int")]
    );
}

#[tokio::test]
async fn test_push_then_pull() {
    let (_dir, path) = database();
    let server = server(&path, polling());

    let response = server
        .post("/push")
        .json(&json!({
            "key": "max_connections",
            "value": hex::encode("20"),
            "value_type": "int",
        }))
        .await;
    response.assert_status_ok();
    let ack: SuccessResponse = response.json();
    assert!(ack.success);

    let response = server
        .post("/pull")
        .json(&json!({ "keys": ["max_connections"] }))
        .await;
    response.assert_status_ok();
    let body: PullResponse = response.json();
    let record = &body.data["max_connections"];
    assert_eq!(record.value, hex::encode("20"));
    assert_eq!(record.value_type, "int");
    assert!(record.updated_at.is_some());
}

#[tokio::test]
async fn test_push_rejects_invalid_hex() {
    let (_dir, path) = database();
    let server = server(&path, polling());

    let response = server
        .post("/push")
        .json(&RecordJson {
            key: "max_connections".to_string(),
            value: "not hex".to_string(),
            value_type: "int".to_string(),
            updated_at: None,
        })
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_backend_failure_is_internal_error() {
    let (_dir, path) = database();
    let server = server(&path, polling());
    Connection::open(&path)
        .unwrap()
        .execute_batch("DROP TABLE data")
        .unwrap();

    let response = server.get("/capabilities").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], true);
    assert_eq!(body["code"], "INTERNAL_ERROR");

    let health: HealthResponse = server.get("/health").await.json();
    assert_eq!(health.status, "degraded");
}

#[tokio::test]
async fn test_subscribe_requires_keys() {
    let (_dir, path) = database();
    let server = server(&path, polling());

    let response = server.get("/subscribe").await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = server.get("/subscribe").add_query_param("keys", ",").await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_subscribe_streams_updates_then_error() {
    let (_dir, path) = database();
    let server = server(&path, polling().with_initial_snapshot(true));

    // Dropping the table ends the stream with an error event, which lets the
    // response body complete.
    let drop_path = path.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Connection::open(&drop_path)
            .unwrap()
            .execute_batch("DROP TABLE data")
            .unwrap();
    });

    let response = server
        .get("/subscribe")
        .add_query_param("keys", "max_connections")
        .await;
    response.assert_status_ok();

    let text = response.text();
    let update = text.find("event: update").expect("update event");
    let error = text.find("event: error").expect("error event");
    assert!(update < error);
    assert!(text.contains(&hex::encode("10")));
}
