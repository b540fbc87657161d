//! Shared dependencies of the manager and every session task.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use wabridge_core::config::SessionsConfig;
use wabridge_core::{ConnectionStatus, OwnerKey, SessionError};

use crate::auth_state::AuthStateStore;
use crate::broadcast::{BroadcastHub, SessionUpdate};
use crate::guard::guarded;
use crate::meta_store::SessionMetaStore;
use crate::socket::{Connection, Connector};

/// Lifecycle tunables, resolved from `[sessions]` config.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub qr_ttl: Duration,
    /// Upper bound on any single call into the socket library.
    pub operation_timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    /// How long Failed/Closed sessions stay visible before the sweeper drops them.
    pub terminal_retention: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&SessionsConfig::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &SessionsConfig) -> Self {
        Self {
            qr_ttl: Duration::from_secs(config.qr_ttl_secs),
            operation_timeout: Duration::from_secs(config.operation_timeout_secs),
            max_retries: config.reconnect.max_retries,
            base_delay: Duration::from_millis(config.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect.max_delay_ms),
            jitter: Duration::from_millis(config.reconnect.jitter_ms),
            terminal_retention: Duration::from_secs(config.terminal_retention_secs),
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)` plus up to `jitter`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// How long to wait for a session task to close its socket before aborting it.
    pub fn stop_grace(&self) -> Duration {
        self.operation_timeout + Duration::from_secs(1)
    }
}

pub(crate) struct SessionContext {
    pub connector: Arc<dyn Connector>,
    pub auth: AuthStateStore,
    pub hub: BroadcastHub,
    pub meta: SessionMetaStore,
    pub settings: SessionSettings,
}

impl SessionContext {
    /// Open a socket for `key`, resuming from stored auth-state when present.
    /// Connect failures surface as `TransientNetworkError`.
    pub async fn open(&self, key: &OwnerKey) -> Result<Connection, SessionError> {
        let auth = self.auth.load(key).await?;
        let resumed = auth.is_some();
        tracing::debug!(owner = %key, resumed, "opening socket");
        let connection = guarded(
            "connect",
            self.settings.operation_timeout,
            self.connector.connect(key, auth),
        )
        .await?
        .map_err(|e| SessionError::TransientNetworkError(e.to_string()))?;
        tracing::info!(owner = %key, resumed, "socket opened");
        Ok(connection)
    }

    /// Push a status change to subscribers and the metadata store.
    pub fn announce(
        &self,
        key: &OwnerKey,
        status: ConnectionStatus,
        phone_number: Option<&str>,
        message: Option<String>,
    ) {
        self.meta.record(key, status, phone_number);
        self.hub.publish(key, SessionUpdate::status(key, status, message));
    }

    /// Purge stored credentials, logging rather than failing.
    pub async fn purge_auth(&self, key: &OwnerKey) {
        match self.auth.purge(key).await {
            Ok(true) => tracing::info!(owner = %key, "auth state purged"),
            Ok(false) => {}
            Err(e) => tracing::error!(owner = %key, error = %e, "failed to purge auth state"),
        }
    }
}
