//! wabridged — WhatsApp session bridge daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use wabridge_core::config::WabridgeConfig;
use wabridge_services::{
    AuthStateStore, BridgeConnector, BroadcastHub, SessionManager, SessionMetaStore,
    SessionRegistry, SessionSettings,
};

mod sweeper;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = WabridgeConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = WabridgeConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        WabridgeConfig::default()
    });
    let sessions = &config.sessions;
    tracing::info!(
        bridge = %config.bridge.url,
        auth_dir = %sessions.auth_dir.display(),
        "wabridged starting"
    );

    // ── Session stack ────────────────────────────────────────────────────────
    let auth = AuthStateStore::new(&sessions.auth_dir).context("auth state directory")?;
    let meta = if sessions.meta_path.as_os_str().is_empty() {
        SessionMetaStore::new()
    } else {
        SessionMetaStore::with_persistence(sessions.meta_path.clone())
    };
    let manager = SessionManager::new(
        SessionRegistry::new(),
        Arc::new(BridgeConnector::new(config.bridge.url.clone())),
        auth,
        BroadcastHub::new(sessions.broadcast.channel_capacity),
        meta,
        SessionSettings::from_config(sessions),
    );

    if sessions.restore_on_startup {
        let manager = manager.clone();
        tokio::spawn(async move {
            let restored = manager.restore_sessions().await;
            tracing::info!(restored, "session restore finished");
        });
    }

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────
    let sweep_task = tokio::spawn(sweeper::sweep_loop(manager.clone()));

    let addr: SocketAddr = format!("{}:{}", config.network.bind_addr, config.network.api_port)
        .parse()
        .context("invalid API bind address")?;
    let api_task = {
        let state = wabridge_api::ApiState {
            manager: manager.clone(),
            initial_qr_wait: Duration::from_millis(sessions.initial_qr_wait_ms),
        };
        tokio::spawn(async move {
            if let Err(e) = wabridge_api::serve(state, addr).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = api_task           => tracing::error!("API task exited: {:?}", r),
        r = sweep_task         => tracing::error!("sweep task exited: {:?}", r),
    }

    // Close every socket but keep auth state so sessions resume next start.
    manager.shutdown_all().await;
    Ok(())
}
