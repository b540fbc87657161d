use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use crate::*;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_update(ws: &mut WsStream) -> Result<Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .context("no update within 2s")?
            .context("socket closed")??;
        if let Message::Text(text) = msg {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

/// Read updates until one matches, skipping intermediate states.
async fn wait_for_update(ws: &mut WsStream, pred: impl Fn(&Value) -> bool) -> Result<Value> {
    for _ in 0..20 {
        let update = next_update(ws).await?;
        if pred(&update) {
            return Ok(update);
        }
    }
    anyhow::bail!("expected update never arrived")
}

#[tokio::test]
async fn test_ws_streams_qr_and_status() -> Result<()> {
    let server = spawn_server().await?;
    let (mut ws, _) =
        tokio_tungstenite::connect_async(server.ws_url("/ws/coach-w?ownerType=coach")).await?;

    let first = next_update(&mut ws).await?;
    assert_eq!(first["type"], "status");
    assert_eq!(first["status"], "disconnected");
    assert_eq!(first["ownerId"], "coach-w");

    server.post("/initialize/coach-w", json!({})).await?;
    let sock = server.connector.wait_for_socket(1).await.context("no socket")?;
    sock.emit_qr("2@ws-ref").await;

    let qr = wait_for_update(&mut ws, |u| u["type"] == "qr").await?;
    assert!(qr["qrCode"].as_str().unwrap().starts_with("data:image/png;base64,"));
    assert_eq!(qr["ownerType"], "coach");

    sock.emit_open("15552220000@s.whatsapp.net").await;
    wait_for_update(&mut ws, |u| u["type"] == "status" && u["status"] == "connected").await?;
    Ok(())
}

#[tokio::test]
async fn test_ws_late_subscriber_gets_current_qr() -> Result<()> {
    let server = spawn_server().await?;
    server.post("/initialize/coach-x", json!({})).await?;
    let sock = server.connector.wait_for_socket(1).await.context("no socket")?;
    sock.emit_qr("2@late-ref").await;
    server.wait_for_status("coach-x", "qr_pending").await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("/ws/coach-x")).await?;
    let status = next_update(&mut ws).await?;
    assert_eq!(status["status"], "qr_pending");
    let qr = next_update(&mut ws).await?;
    assert_eq!(qr["type"], "qr");
    Ok(())
}

#[tokio::test]
async fn test_ws_rejects_unknown_owner_type() -> Result<()> {
    let server = spawn_server().await?;
    let result =
        tokio_tungstenite::connect_async(server.ws_url("/ws/coach-y?ownerType=admin")).await;
    assert!(result.is_err(), "upgrade should be refused");
    Ok(())
}
