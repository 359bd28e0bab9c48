//! Exercises the full stack (listener -> dispatch -> storage/query ->
//! response) over a real TCP connection via [`DbClient`]: insert-then-find,
//! numeric comparison, LIKE, pagination, and delete-then-find.

use std::net::TcpListener as StdTcpListener;
use std::time::Duration;

use serde_json::json;

use siemdb_client::DbClient;
use siemdb_server::ConnectionManager;

/// Grabs an OS-assigned port by briefly binding and releasing it, then
/// spawns the real server on that port. Small window for a race against
/// another process stealing the port between release and rebind.
async fn spawn_server() -> (u16, tempfile::TempDir) {
    let port = {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let dir = tempfile::tempdir().unwrap();
    let manager = ConnectionManager::new(dir.path(), 4);
    tokio::spawn(async move {
        let _ = manager.run(port).await;
    });
    // give the listener a moment to bind before the client connects
    tokio::time::sleep(Duration::from_millis(50)).await;
    (port, dir)
}

async fn connected_client(port: u16, database: &str) -> DbClient {
    let mut client = DbClient::new("127.0.0.1", port, database);
    client.connect().await.expect("client should connect to freshly bound server");
    client
}

#[tokio::test]
async fn insert_then_find_round_trips_over_the_wire() {
    let (port, _dir) = spawn_server().await;
    let mut client = connected_client(port, "security").await;

    let insert_resp = client
        .insert("events", vec![json!({"event_type": "failed_login", "user": "root"})])
        .await;
    assert!(insert_resp.is_success());
    assert_eq!(insert_resp.count, 1);

    let find_resp = client.find("events", json!({"event_type": "failed_login"})).await;
    assert!(find_resp.is_success());
    assert_eq!(find_resp.count, 1);
    assert_eq!(find_resp.data[0]["user"], json!("root"));
}

#[tokio::test]
async fn numeric_greater_than_filters_correctly() {
    let (port, _dir) = spawn_server().await;
    let mut client = connected_client(port, "security").await;

    client
        .insert(
            "events",
            vec![json!({"severity_score": 10}), json!({"severity_score": 80}), json!({"severity_score": 95})],
        )
        .await;

    let resp = client.find("events", json!({"severity_score": {"$gt": "50"}})).await;
    assert!(resp.is_success());
    assert_eq!(resp.count, 2);
}

#[tokio::test]
async fn like_pattern_matches_substrings() {
    let (port, _dir) = spawn_server().await;
    let mut client = connected_client(port, "security").await;

    client
        .insert(
            "events",
            vec![
                json!({"command": "sudo rm -rf /tmp/x"}),
                json!({"command": "ls -la"}),
            ],
        )
        .await;

    let resp = client.find("events", json!({"command": {"$like": "%rm -rf%"}})).await;
    assert!(resp.is_success());
    assert_eq!(resp.count, 1);
}

#[tokio::test]
async fn pagination_reports_total_count_and_pages() {
    let (port, _dir) = spawn_server().await;
    let mut client = connected_client(port, "security").await;

    let docs: Vec<_> = (0..25).map(|i| json!({"n": i})).collect();
    client.insert("events", docs).await;

    let req = siemdb_protocol::Request {
        page: 2,
        limit: 10,
        ..siemdb_protocol::Request::find("security", "events", json!({}))
    };
    let resp = client.send_request(req).await;
    assert!(resp.is_success());
    assert_eq!(resp.count, 10);
    assert_eq!(resp.total_count, 25);
    assert_eq!(resp.total_pages, 3);
    assert_eq!(resp.current_page, 2);
}

#[tokio::test]
async fn delete_then_find_reports_zero_remaining() {
    let (port, _dir) = spawn_server().await;
    let mut client = connected_client(port, "security").await;

    client.insert("events", vec![json!({"user": "mallory"})]).await;
    let del = client.remove("events", json!({"user": "mallory"})).await;
    assert!(del.is_success());
    assert_eq!(del.count, 1);

    let found = client.find("events", json!({"user": "mallory"})).await;
    assert_eq!(found.count, 0);
}

#[tokio::test]
async fn find_against_a_database_no_one_has_inserted_into_errors() {
    let (port, _dir) = spawn_server().await;
    let mut client = connected_client(port, "security").await;

    let resp = client.find("events", json!({})).await;
    assert!(!resp.is_success());
    assert!(resp.message.contains("not found"));
}
