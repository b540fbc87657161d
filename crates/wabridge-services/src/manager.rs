//! Session lifecycle manager: the only entry point callers use to create,
//! query, drive and tear down sessions.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};

use wabridge_core::{ConnectionStatus, OwnerKey, SessionError, SessionFailure};

use crate::actor::{panic_message, Flow, SessionActor};
use crate::auth_state::AuthStateStore;
use crate::broadcast::{BroadcastHub, SessionUpdate};
use crate::context::{SessionContext, SessionSettings};
use crate::meta_store::SessionMetaStore;
use crate::qr::QrPayload;
use crate::registry::SessionRegistry;
use crate::session::{SessionCommand, SessionHandle, SessionState};
use crate::socket::Connector;

const COMMAND_QUEUE: usize = 32;

#[derive(Clone)]
pub struct SessionManager {
    registry: SessionRegistry,
    ctx: Arc<SessionContext>,
}

impl SessionManager {
    pub fn new(
        registry: SessionRegistry,
        connector: Arc<dyn Connector>,
        auth: AuthStateStore,
        hub: BroadcastHub,
        meta: SessionMetaStore,
        settings: SessionSettings,
    ) -> Self {
        Self {
            registry,
            ctx: Arc::new(SessionContext {
                connector,
                auth,
                hub,
                meta,
                settings,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.ctx.hub
    }

    pub fn meta(&self) -> &SessionMetaStore {
        &self.ctx.meta
    }

    pub fn auth(&self) -> &AuthStateStore {
        &self.ctx.auth
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.ctx.settings
    }

    /// Open a session for `key`, resuming from stored auth-state when present.
    ///
    /// At most one socket exists per owner: concurrent calls serialize on the
    /// owner's lock and all but the first see `SessionAlreadyActive`. A
    /// terminal (Failed/Closed) session is replaced. The connect call is
    /// bounded by the operation timeout; on expiry the session is Failed and
    /// the half-open socket dropped. A transient connect failure is not
    /// returned: the session stays registered and retries in the background.
    pub async fn initialize(&self, key: OwnerKey) -> Result<SessionState, SessionError> {
        let _guard = self.registry.lock(&key).await;

        if let Some(existing) = self.registry.get(&key) {
            let status = existing.status();
            if !status.is_terminal() {
                return Err(SessionError::SessionAlreadyActive { key, status });
            }
            tracing::debug!(owner = %key, %status, "replacing terminal session");
            existing.stop(self.ctx.settings.stop_grace()).await;
            self.registry.remove(&key);
        }

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let handle = SessionHandle::new(key.clone(), ConnectionStatus::Connecting, commands_tx);
        self.registry.upsert(key.clone(), handle.clone());
        self.ctx.announce(&key, ConnectionStatus::Connecting, None, None);
        tracing::info!(owner = %key, "initializing session");

        let cancel = handle.cancel_token();
        let opened = tokio::select! {
            r = AssertUnwindSafe(self.ctx.open(&key)).catch_unwind() => r.unwrap_or_else(|panic| {
                Err(SessionError::Internal(format!(
                    "connector panicked: {}",
                    panic_message(panic.as_ref())
                )))
            }),
            _ = cancel.cancelled() => Err(SessionError::Cancelled(key.clone())),
        };

        let (connection, retry_reason) = match opened {
            Ok(connection) => (Some(connection), None),
            Err(SessionError::TransientNetworkError(reason)) => {
                tracing::warn!(owner = %key, reason = %reason, "first connect failed, retrying in background");
                (None, Some(reason))
            }
            Err(SessionError::Cancelled(key)) => {
                tracing::info!(owner = %key, "initialization cancelled");
                return Err(SessionError::Cancelled(key));
            }
            Err(err) => {
                tracing::error!(owner = %key, error = %err, "session initialization failed");
                if let SessionError::AuthStateCorrupt { .. } = err {
                    self.ctx.purge_auth(&key).await;
                }
                let failure = SessionFailure::from(&err);
                let message = failure.describe();
                handle.state_tx().send_modify(|s| s.fail(failure));
                self.ctx
                    .announce(&key, ConnectionStatus::Failed, None, Some(message));
                return Err(err);
            }
        };

        let mut actor = SessionActor::new(self.ctx.clone(), &handle, commands_rx, connection);
        if let Some(reason) = retry_reason {
            if let Flow::Stop = actor.schedule_retry(reason.clone()) {
                return Err(SessionError::TransientNetworkError(reason));
            }
        }
        handle.attach(actor.spawn()).await;
        Ok(handle.snapshot())
    }

    pub fn status(&self, key: &OwnerKey) -> Option<SessionState> {
        self.registry.get(key).map(|h| h.snapshot())
    }

    /// Outstanding unexpired QR for `key`. Never waits.
    pub fn qr_code(&self, key: &OwnerKey) -> Option<QrPayload> {
        self.registry.get(key).and_then(|h| h.current_qr())
    }

    pub fn watch(&self, key: &OwnerKey) -> Option<watch::Receiver<SessionState>> {
        self.registry.get(key).map(|h| h.watch())
    }

    pub fn list(&self) -> Vec<SessionHandle> {
        self.registry.list()
    }

    /// Send a text message through a connected session. Returns the message id.
    pub async fn send_text(
        &self,
        key: &OwnerKey,
        to: &str,
        text: &str,
    ) -> Result<String, SessionError> {
        let handle = self.handle(key)?;
        let snapshot = handle.snapshot();
        if snapshot.status != ConnectionStatus::Connected {
            return Err(match snapshot.failure {
                Some(failure) if snapshot.status.is_terminal() => {
                    failure.to_error(key, self.ctx.settings.operation_timeout)
                }
                _ => SessionError::NotConnected {
                    key: key.clone(),
                    status: snapshot.status,
                },
            });
        }
        let (reply, rx) = oneshot::channel();
        handle
            .request(SessionCommand::SendText {
                to: to.to_string(),
                text: text.to_string(),
                reply,
            })
            .await?;
        rx.await.map_err(|_| SessionError::NotConnected {
            key: key.clone(),
            status: handle.status(),
        })?
    }

    /// Close the socket and drop the session, keeping auth-state so the
    /// owner can resume later without a new QR.
    pub async fn disconnect(&self, key: &OwnerKey) -> Result<(), SessionError> {
        let handle = self.handle(key)?;
        handle.cancel_token().cancel();
        let guard = self.registry.lock(key).await;
        if let Some(handle) = self.registry.remove(key) {
            handle.stop(self.ctx.settings.stop_grace()).await;
        }
        drop(guard);
        self.registry.release(key);
        self.ctx.announce(
            key,
            ConnectionStatus::Disconnected,
            None,
            Some("disconnected".to_string()),
        );
        tracing::info!(owner = %key, "session disconnected");
        Ok(())
    }

    /// Log the device out remotely, then remove the session and its
    /// auth-state. The session is removed even if the remote logout fails.
    pub async fn logout(&self, key: &OwnerKey) -> Result<(), SessionError> {
        let handle = self.handle(key)?;
        let result = if handle.status() == ConnectionStatus::Connected {
            let (reply, rx) = oneshot::channel();
            match handle.request(SessionCommand::Logout { reply }).await {
                Ok(()) => rx.await.unwrap_or(Ok(())),
                Err(_) => Ok(()),
            }
        } else {
            Ok(())
        };
        self.cleanup(key).await?;
        result
    }

    /// Tear the session down completely: cancel any in-flight initialize,
    /// close the socket, forget the session and purge its auth-state and
    /// metadata. Idempotent; cleaning up an unknown owner succeeds.
    pub async fn cleanup(&self, key: &OwnerKey) -> Result<(), SessionError> {
        if let Some(handle) = self.registry.get(key) {
            handle.cancel_token().cancel();
        }
        let guard = self.registry.lock(key).await;
        if let Some(handle) = self.registry.remove(key) {
            handle.stop(self.ctx.settings.stop_grace()).await;
        }
        let purged = self.ctx.auth.purge(key).await;
        drop(guard);
        self.registry.release(key);
        purged?;
        self.ctx.meta.remove(key);
        self.ctx.hub.publish(
            key,
            SessionUpdate::status(
                key,
                ConnectionStatus::Disconnected,
                Some("session removed".to_string()),
            ),
        );
        tracing::info!(owner = %key, "session cleaned up");
        Ok(())
    }

    /// Re-open every owner that has stored auth-state. Returns how many
    /// sessions came back.
    pub async fn restore_sessions(&self) -> usize {
        let owners = match self.ctx.auth.owners().await {
            Ok(owners) => owners,
            Err(e) => {
                tracing::warn!(error = %e, "could not list stored sessions");
                return 0;
            }
        };
        if owners.is_empty() {
            return 0;
        }
        tracing::info!(count = owners.len(), "restoring sessions");
        let results = join_all(owners.into_iter().map(|key| async move {
            match self.initialize(key.clone()).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(owner = %key, error = %e, "failed to restore session");
                    false
                }
            }
        }))
        .await;
        results.into_iter().filter(|ok| *ok).count()
    }

    /// Drop terminal sessions past their retention and broadcast channels
    /// nobody listens to. Returns `(sessions_removed, channels_pruned)`.
    pub fn sweep(&self) -> (usize, usize) {
        let removed = self
            .registry
            .remove_terminal_older_than(self.ctx.settings.terminal_retention);
        let pruned = self.ctx.hub.prune_idle();
        (removed, pruned)
    }

    /// Stop every session task, closing sockets but keeping auth-state.
    /// Pending session-record writes are flushed last.
    pub async fn shutdown_all(&self) {
        let handles = self.registry.list();
        if !handles.is_empty() {
            tracing::info!(count = handles.len(), "stopping sessions");
            let grace = self.ctx.settings.stop_grace();
            join_all(handles.iter().map(|h| h.stop(grace))).await;
        }
        self.ctx.meta.flush().await;
    }

    fn handle(&self, key: &OwnerKey) -> Result<SessionHandle, SessionError> {
        self.registry
            .get(key)
            .ok_or_else(|| SessionError::SessionNotFound(key.clone()))
    }
}
