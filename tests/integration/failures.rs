use std::time::{Duration, Instant};

use serde_json::json;

use wabridge_core::{CredsUpdate, SocketEvent};
use wabridge_services::socket::testing::ConnectMode;

use crate::sessions::owner;
use crate::*;

#[tokio::test]
async fn test_hanging_connect_times_out() -> Result<()> {
    let server = spawn_server().await?;
    server.connector.set_mode(ConnectMode::Hang);

    let started = Instant::now();
    let (code, body) = server.post("/initialize/coach-t", json!({})).await?;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(code, 504, "{body}");
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("timed out"));

    let (_, status) = server.get("/status/coach-t").await?;
    assert_eq!(status["status"], "failed");
    assert!(status["lastError"].as_str().unwrap().contains("connect timed out"));

    // a failed session can be started again
    server.connector.set_mode(ConnectMode::Accept);
    let (code, body) = server.post("/initialize/coach-t", json!({})).await?;
    assert_eq!(code, 200, "{body}");
    assert_eq!(body["status"], "connecting");
    Ok(())
}

#[tokio::test]
async fn test_remote_logout_closes_and_purges() -> Result<()> {
    let server = spawn_server().await?;
    server.post("/initialize/coach-l", json!({})).await?;
    let sock = server.connector.wait_for_socket(1).await.context("no socket")?;
    sock.emit(SocketEvent::Creds(CredsUpdate {
        creds: json!({ "registered": true }),
        keys: Default::default(),
    }))
    .await;
    sock.emit_open("15550000001@s.whatsapp.net").await;
    server.wait_for_status("coach-l", "connected").await?;
    assert!(server.manager.auth().exists(&owner("coach-l")).await);

    sock.emit_close(401).await;
    let status = server.wait_for_status("coach-l", "closed").await?;
    assert!(status["lastError"].as_str().unwrap().contains("logged out"));
    assert!(!server.manager.auth().exists(&owner("coach-l")).await);
    assert_eq!(server.connector.attempts(), 1, "no reconnect after logout");

    let (code, _) = server
        .post("/send/coach-l", json!({ "to": "1555", "text": "hi" }))
        .await?;
    assert_eq!(code, 409);
    Ok(())
}

#[tokio::test]
async fn test_transient_failures_exhaust_retries() -> Result<()> {
    let server = spawn_server().await?;
    server.post("/initialize/coach-r", json!({})).await?;
    let sock = server.connector.wait_for_socket(1).await.context("no socket")?;

    server.connector.set_mode(ConnectMode::Refuse);
    sock.emit_close(428).await;
    let status = server.wait_for_status("coach-r", "failed").await?;
    assert!(status["lastError"].as_str().unwrap().contains("retries exhausted"));
    assert_eq!(status["retryCount"], 2);
    Ok(())
}

#[tokio::test]
async fn test_panic_is_contained() -> Result<()> {
    let server = spawn_server().await?;
    server.post("/initialize/coach-p", json!({})).await?;
    let sock = server.connector.wait_for_socket(1).await.context("no socket")?;

    server.connector.set_mode(ConnectMode::Panic);
    sock.emit_close(408).await;
    server.wait_for_status("coach-p", "failed").await?;

    server.connector.set_mode(ConnectMode::Accept);
    let (code, _) = server.post("/initialize/coach-q", json!({})).await?;
    assert_eq!(code, 200, "server keeps serving after a session panic");
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_errors() -> Result<()> {
    let server = spawn_server().await?;
    let (code, body) = server.post("/disconnect/nobody", json!({})).await?;
    assert_eq!(code, 404);
    assert_eq!(body["success"], false);
    let (code, _) = server.post("/logout/nobody", json!({})).await?;
    assert_eq!(code, 404);
    let (code, _) = server
        .post("/send/nobody", json!({ "to": "1555", "text": "hi" }))
        .await?;
    assert_eq!(code, 404);
    Ok(())
}

#[tokio::test]
async fn test_send_requires_connected_session() -> Result<()> {
    let server = spawn_server().await?;
    server.post("/initialize/coach-s", json!({})).await?;

    let (code, body) = server
        .post("/send/coach-s", json!({ "to": "1555", "text": "hi" }))
        .await?;
    assert_eq!(code, 409, "{body}");

    let (code, _) = server
        .post("/send/coach-s", json!({ "to": "  ", "text": "hi" }))
        .await?;
    assert_eq!(code, 422);
    Ok(())
}
