//! `qr` — fetch the pending QR code, optionally writing it out as a PNG.

use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use super::http::{base_url, get_json};

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QrResponse {
    data: Option<String>,
    expires_in_secs: Option<u64>,
    message: String,
}

pub async fn cmd_qr(port: u16, owner_id: &str, owner_type: &str, out: Option<&Path>) -> Result<()> {
    let resp: QrResponse = get_json(&format!(
        "{}/qr/{}?ownerType={}",
        base_url(port),
        owner_id,
        owner_type
    ))
    .await?;

    let Some(data_url) = resp.data else {
        println!("{}", resp.message);
        return Ok(());
    };
    let expires = resp.expires_in_secs.unwrap_or(0);

    match out {
        Some(path) => {
            let png = decode_data_url(&data_url)?;
            std::fs::write(path, &png)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("✓ QR written to {} (expires in {}s)", path.display(), expires);
        }
        None => {
            println!("QR expires in {}s:", expires);
            println!("{}", data_url);
        }
    }
    Ok(())
}

fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let encoded = data_url
        .strip_prefix(DATA_URL_PREFIX)
        .context("QR is not a PNG data URL")?;
    STANDARD.decode(encoded).context("QR payload is not valid base64")
}
