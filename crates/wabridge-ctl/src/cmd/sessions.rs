//! Session lifecycle commands.

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;

use super::http::{base_url, delete_json, get_json, post_json_body};

#[derive(Deserialize)]
struct AckResponse {
    message: String,
}

pub async fn cmd_init(port: u16, owner_id: &str, owner_type: &str) -> Result<()> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct InitResponse {
        status: String,
        qr_code: Option<String>,
        expires_in_secs: Option<u64>,
        qr_message: String,
    }

    let resp: InitResponse = post_json_body(
        &format!("{}/initialize/{}", base_url(port), owner_id),
        &json!({ "ownerType": owner_type }),
    )
    .await?;

    println!("Session {}:{} is {}", owner_type, owner_id, resp.status);
    println!("  {}", resp.qr_message);
    if resp.qr_code.is_some() {
        let secs = resp.expires_in_secs.unwrap_or(0);
        println!(
            "  QR ready (expires in {}s). Save it with: wabridge-ctl qr {} --out qr.png",
            secs, owner_id
        );
    }
    Ok(())
}

pub async fn cmd_status(port: u16, owner_id: &str, owner_type: &str) -> Result<()> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct StatusResponse {
        status: String,
        owner_id: String,
        owner_type: String,
        phone_number: Option<String>,
        retry_count: u32,
        has_qr: bool,
        last_error: Option<String>,
    }

    let resp: StatusResponse = get_json(&format!(
        "{}/status/{}?ownerType={}",
        base_url(port),
        owner_id,
        owner_type
    ))
    .await?;

    println!("═══════════════════════════════════════");
    println!("  Session {}:{}", resp.owner_type, resp.owner_id);
    println!("═══════════════════════════════════════");
    println!("  Status  : {}", resp.status);
    println!("  Phone   : {}", resp.phone_number.as_deref().unwrap_or("-"));
    println!("  Retries : {}", resp.retry_count);
    println!("  QR      : {}", if resp.has_qr { "pending scan" } else { "-" });
    if let Some(err) = resp.last_error {
        println!("  Error   : {}", err);
    }
    Ok(())
}

pub async fn cmd_disconnect(port: u16, owner_id: &str, owner_type: &str) -> Result<()> {
    let resp: AckResponse = post_json_body(
        &format!("{}/disconnect/{}?ownerType={}", base_url(port), owner_id, owner_type),
        &json!({}),
    )
    .await?;
    println!("✓ {}", resp.message);
    Ok(())
}

pub async fn cmd_logout(port: u16, owner_id: &str, owner_type: &str) -> Result<()> {
    let resp: AckResponse = post_json_body(
        &format!("{}/logout/{}?ownerType={}", base_url(port), owner_id, owner_type),
        &json!({}),
    )
    .await?;
    println!("✓ {}", resp.message);
    Ok(())
}

pub async fn cmd_cleanup(port: u16, owner_id: &str, owner_type: &str) -> Result<()> {
    let resp: AckResponse = delete_json(&format!(
        "{}/session/{}?ownerType={}",
        base_url(port),
        owner_id,
        owner_type
    ))
    .await?;
    println!("✓ {}", resp.message);
    Ok(())
}

pub async fn cmd_send(
    port: u16,
    owner_id: &str,
    owner_type: &str,
    to: &str,
    text: &str,
) -> Result<()> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct SendResponse {
        message_id: String,
    }

    let resp: SendResponse = post_json_body(
        &format!("{}/send/{}", base_url(port), owner_id),
        &json!({ "ownerType": owner_type, "to": to, "text": text }),
    )
    .await?;
    println!("✓ Sent to {} (id {})", to, resp.message_id);
    Ok(())
}

pub async fn cmd_sessions(port: u16) -> Result<()> {
    #[derive(Deserialize)]
    struct SessionsResponse {
        sessions: Vec<SessionSummary>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct SessionSummary {
        owner_id: String,
        owner_type: String,
        status: String,
        phone_number: Option<String>,
        live: bool,
        retry_count: u32,
    }

    let resp: SessionsResponse = get_json(&format!("{}/sessions", base_url(port))).await?;

    if resp.sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Sessions ({})", resp.sessions.len());
    println!("═══════════════════════════════════════");
    for s in &resp.sessions {
        println!("  ┌─ {}:{}", s.owner_type, s.owner_id);
        println!("  │  status  : {}{}", s.status, if s.live { "" } else { " (recorded)" });
        println!("  │  phone   : {}", s.phone_number.as_deref().unwrap_or("-"));
        println!("  └─ retries : {}", s.retry_count);
    }
    Ok(())
}
