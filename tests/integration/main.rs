//! wabridge integration test harness.
//!
//! Each test starts the real HTTP router on 127.0.0.1:0 in-process, backed
//! by the scripted connector, so the test plays the part of the WhatsApp
//! protocol library:
//!
//!   cargo test --test integration
//!
//! Every server gets its own temporary auth-state directory; tests do not
//! share state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use wabridge_api::ApiState;
use wabridge_services::socket::testing::ScriptedConnector;
use wabridge_services::{
    AuthStateStore, BroadcastHub, SessionManager, SessionMetaStore, SessionRegistry,
    SessionSettings,
};

mod failures;
mod sessions;
mod websocket;

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct TestServer {
    pub addr: SocketAddr,
    pub manager: SessionManager,
    pub connector: ScriptedConnector,
    client: reqwest::Client,
    _dir: tempfile::TempDir,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Short timeouts so failure paths resolve quickly.
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        qr_ttl: Duration::from_secs(60),
        operation_timeout: Duration::from_millis(300),
        max_retries: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: Duration::ZERO,
        terminal_retention: Duration::from_secs(60),
    }
}

pub async fn spawn_server() -> Result<TestServer> {
    spawn_server_with(test_settings(), Duration::from_millis(200)).await
}

pub async fn spawn_server_with(
    settings: SessionSettings,
    initial_qr_wait: Duration,
) -> Result<TestServer> {
    let dir = tempfile::tempdir()?;
    let connector = ScriptedConnector::new();
    let manager = SessionManager::new(
        SessionRegistry::new(),
        Arc::new(connector.clone()),
        AuthStateStore::new(dir.path().join("auth"))?,
        BroadcastHub::new(16),
        SessionMetaStore::with_persistence(dir.path().join("sessions.json")),
        settings,
    );
    let state = ApiState {
        manager: manager.clone(),
        initial_qr_wait,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        if let Err(e) = wabridge_api::serve_listener(listener, state).await {
            eprintln!("test server exited: {e}");
        }
    });

    Ok(TestServer {
        addr,
        manager,
        connector,
        client: reqwest::Client::new(),
        _dir: dir,
        task,
    })
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/api/whatsapp{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}/api/whatsapp{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> Result<(u16, Value)> {
        let resp = self.client.get(self.url(path)).send().await?;
        decode(resp).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<(u16, Value)> {
        let resp = self.client.post(self.url(path)).json(&body).send().await?;
        decode(resp).await
    }

    pub async fn delete(&self, path: &str) -> Result<(u16, Value)> {
        let resp = self.client.delete(self.url(path)).send().await?;
        decode(resp).await
    }

    /// Poll GET /status until it reports `want`.
    pub async fn wait_for_status(&self, owner: &str, want: &str) -> Result<Value> {
        for _ in 0..100 {
            let (_, body) = self.get(&format!("/status/{owner}")).await?;
            if body["status"] == want {
                return Ok(body);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        anyhow::bail!("{owner} never reached status {want}")
    }
}

async fn decode(resp: reqwest::Response) -> Result<(u16, Value)> {
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.context("response is not JSON")?;
    Ok((status, body))
}
