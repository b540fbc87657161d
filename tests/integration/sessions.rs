use std::time::Duration;

use serde_json::json;

use wabridge_core::{CredsUpdate, SocketEvent};

use crate::*;

/// Emit a QR as soon as the session's socket opens.
fn emit_qr_on_connect(server: &TestServer, n: usize, code: &'static str) {
    let connector = server.connector.clone();
    tokio::spawn(async move {
        if let Some(sock) = connector.wait_for_socket(n).await {
            sock.emit_qr(code).await;
        }
    });
}

#[tokio::test]
async fn test_initialize_returns_qr() -> Result<()> {
    let server = spawn_server_with(test_settings(), Duration::from_secs(2)).await?;
    emit_qr_on_connect(&server, 1, "2@first-ref");

    let (code, body) = server
        .post("/initialize/coach-1", json!({ "ownerType": "coach" }))
        .await?;
    assert_eq!(code, 200, "{body}");
    assert_eq!(body["status"], "qr_pending");
    let qr = body["qrCode"].as_str().context("qrCode missing")?;
    assert!(qr.starts_with("data:image/png;base64,"));
    assert!(body["expiresInSecs"].as_u64().unwrap() <= 60);

    let (_, body) = server.get("/qr/coach-1?ownerType=coach").await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"].as_str(), Some(qr));
    Ok(())
}

#[tokio::test]
async fn test_second_initialize_reuses_session() -> Result<()> {
    let server = spawn_server_with(test_settings(), Duration::from_secs(2)).await?;
    emit_qr_on_connect(&server, 1, "2@reuse-ref");

    let (_, first) = server.post("/initialize/coach-2", json!({})).await?;
    assert_eq!(first["status"], "qr_pending");

    let (code, second) = server.post("/initialize/coach-2", json!({})).await?;
    assert_eq!(code, 200);
    assert_eq!(second["status"], "qr_pending");
    assert_eq!(second["qrCode"], first["qrCode"]);
    assert_eq!(server.connector.attempts(), 1, "no second socket");
    assert_eq!(server.connector.live_sockets(), 1);
    Ok(())
}

#[tokio::test]
async fn test_qr_not_available() -> Result<()> {
    let server = spawn_server().await?;

    let (code, body) = server.get("/qr/nobody").await?;
    assert_eq!(code, 200);
    assert_eq!(body["success"], false);
    assert!(body["data"].is_null());

    // session exists but no QR has been issued yet
    server.post("/initialize/coach-3", json!({})).await?;
    let (_, body) = server.get("/qr/coach-3").await?;
    assert!(body["data"].is_null());
    Ok(())
}

#[tokio::test]
async fn test_status_of_unknown_owner_is_disconnected() -> Result<()> {
    let server = spawn_server().await?;
    let (code, body) = server.get("/status/ghost?ownerType=staff").await?;
    assert_eq!(code, 200);
    assert_eq!(body["status"], "disconnected");
    assert_eq!(body["ownerType"], "staff");
    assert_eq!(body["retryCount"], 0);
    Ok(())
}

#[tokio::test]
async fn test_pair_send_and_cleanup() -> Result<()> {
    let server = spawn_server().await?;
    server.post("/initialize/coach-4", json!({})).await?;
    let sock = server
        .connector
        .wait_for_socket(1)
        .await
        .context("socket never opened")?;

    sock.emit_qr("2@pair-ref").await;
    server.wait_for_status("coach-4", "qr_pending").await?;
    sock.emit(SocketEvent::Creds(CredsUpdate {
        creds: json!({ "me": { "id": "15551230000:7@s.whatsapp.net" } }),
        keys: Default::default(),
    }))
    .await;
    sock.emit_open("15551230000:7@s.whatsapp.net").await;

    let status = server.wait_for_status("coach-4", "connected").await?;
    assert_eq!(status["phoneNumber"], "15551230000");
    assert_eq!(status["hasQr"], false);

    let (code, body) = server
        .post(
            "/send/coach-4",
            json!({ "to": "15559990000", "text": "Your session starts at 9" }),
        )
        .await?;
    assert_eq!(code, 200, "{body}");
    assert_eq!(body["messageId"], "MSG1");
    assert_eq!(sock.sent().len(), 1);

    let (_, body) = server.get("/sessions").await?;
    let sessions = body["sessions"].as_array().context("sessions missing")?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["ownerId"], "coach-4");
    assert_eq!(sessions[0]["live"], true);

    let (code, _) = server.delete("/session/coach-4").await?;
    assert_eq!(code, 200);
    assert!(sock.is_ended());
    assert!(!server.manager.auth().exists(&owner("coach-4")).await);
    let (_, body) = server.get("/status/coach-4").await?;
    assert_eq!(body["status"], "disconnected");

    // idempotent
    let (code, _) = server.delete("/session/coach-4").await?;
    assert_eq!(code, 200);
    let (_, body) = server.get("/sessions").await?;
    assert!(body["sessions"].as_array().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_disconnect_then_resume_without_qr() -> Result<()> {
    let server = spawn_server().await?;
    server.post("/initialize/coach-5", json!({})).await?;
    let sock = server.connector.wait_for_socket(1).await.context("no socket")?;
    sock.emit(SocketEvent::Creds(CredsUpdate {
        creds: json!({ "registered": true }),
        keys: Default::default(),
    }))
    .await;
    sock.emit_open("15551110000@s.whatsapp.net").await;
    server.wait_for_status("coach-5", "connected").await?;

    let (code, _) = server.post("/disconnect/coach-5", json!({})).await?;
    assert_eq!(code, 200);
    assert!(sock.is_ended());

    // recorded but not live
    let (_, body) = server.get("/sessions").await?;
    assert_eq!(body["sessions"][0]["live"], false);

    server.post("/initialize/coach-5", json!({})).await?;
    let resumed = server.connector.wait_for_socket(2).await.context("no socket")?;
    assert_eq!(
        resumed.auth.as_ref().map(|a| a.creds.clone()),
        Some(json!({ "registered": true }))
    );
    Ok(())
}

#[tokio::test]
async fn test_invalid_owner_is_rejected() -> Result<()> {
    let server = spawn_server().await?;
    let (code, body) = server
        .post("/initialize/coach-6", json!({ "ownerType": "admin" }))
        .await?;
    assert_eq!(code, 422);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("admin"));

    let (code, _) = server.get("/status/bad.owner").await?;
    assert_eq!(code, 422);
    assert_eq!(server.connector.attempts(), 0);
    Ok(())
}

pub fn owner(id: &str) -> wabridge_core::OwnerKey {
    wabridge_core::OwnerKey::new(id, wabridge_core::OwnerType::Coach).unwrap()
}
