//! Per-session task.
//!
//! Each session's socket lives inside one task that consumes, in order:
//! cancellation, caller commands, socket events and its reconnect timer.
//! All state changes for that session happen here, so events are applied
//! strictly in arrival order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use wabridge_core::{
    CloseClass, ConnectionStatus, ConnectionUpdate, CredsUpdate, DisconnectReason, OwnerKey,
    SessionError, SessionFailure, SocketEvent,
};

use crate::broadcast::SessionUpdate;
use crate::context::SessionContext;
use crate::guard::guarded;
use crate::qr::QrPayload;
use crate::session::{SessionCommand, SessionHandle, SessionState};
use crate::socket::{Connection, SocketError, WaSocket};

/// Restart-required closes in a row that reconnect immediately; past this
/// they are counted against the retry ceiling like any transient close.
const MAX_IMMEDIATE_RESTARTS: u32 = 3;

pub(crate) enum Flow {
    Continue,
    Stop,
}

enum Step {
    Cancelled,
    Command(Option<SessionCommand>),
    Event(Option<SocketEvent>),
    Reconnect,
}

pub(crate) struct SessionActor {
    key: OwnerKey,
    ctx: Arc<SessionContext>,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
    commands: mpsc::Receiver<SessionCommand>,
    socket: Option<Box<dyn WaSocket>>,
    events: Option<mpsc::Receiver<SocketEvent>>,
    reconnect_at: Option<Instant>,
    restarts: u32,
}

impl SessionActor {
    pub(crate) fn new(
        ctx: Arc<SessionContext>,
        handle: &SessionHandle,
        commands: mpsc::Receiver<SessionCommand>,
        connection: Option<Connection>,
    ) -> Self {
        let (socket, events) = match connection {
            Some(c) => (Some(c.socket), Some(c.events)),
            None => (None, None),
        };
        Self {
            key: handle.key().clone(),
            ctx,
            state: handle.state_tx(),
            cancel: handle.cancel_token(),
            commands,
            socket,
            events,
            reconnect_at: None,
            restarts: 0,
        }
    }

    /// Run the task behind a panic boundary. A panic marks the session
    /// Failed instead of unwinding into the runtime.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let key = self.key.clone();
        let state = self.state.clone();
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(self.run()).catch_unwind().await {
                let message = panic_message(panic.as_ref());
                tracing::error!(owner = %key, panic = %message, "session task panicked");
                let failure = SessionFailure::Crashed(message);
                let description = failure.describe();
                state.send_modify(|s| s.fail(failure));
                ctx.announce(&key, ConnectionStatus::Failed, None, Some(description));
            }
        })
    }

    async fn run(mut self) {
        loop {
            let step = {
                let reconnect_at = self.reconnect_at;
                let events = &mut self.events;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Step::Cancelled,
                    cmd = self.commands.recv() => Step::Command(cmd),
                    ev = next_event(events) => Step::Event(ev),
                    _ = sleep_until(reconnect_at) => Step::Reconnect,
                }
            };

            let flow = match step {
                Step::Cancelled | Step::Command(None) => {
                    self.close_socket().await;
                    self.transition(
                        ConnectionStatus::Disconnected,
                        Some("session stopped".to_string()),
                        |s| s.qr = None,
                    );
                    Flow::Stop
                }
                Step::Command(Some(cmd)) => self.handle_command(cmd).await,
                Step::Event(Some(ev)) => self.handle_event(ev).await,
                Step::Event(None) => {
                    self.on_close(DisconnectReason::ConnectionLost, Some("event stream ended".into()))
                        .await
                }
                Step::Reconnect => {
                    self.reconnect_at = None;
                    self.reconnect().await
                }
            };
            if let Flow::Stop = flow {
                break;
            }
        }
        tracing::debug!(owner = %self.key, status = %self.state.borrow().status, "session task finished");
    }

    // ── Socket events ─────────────────────────────────────────────────────────

    async fn handle_event(&mut self, event: SocketEvent) -> Flow {
        match event {
            SocketEvent::Qr(code) => {
                self.on_qr(code);
                Flow::Continue
            }
            SocketEvent::Creds(update) => self.on_creds(update).await,
            SocketEvent::Connection(ConnectionUpdate::Connecting) => {
                tracing::debug!(owner = %self.key, "socket connecting");
                Flow::Continue
            }
            SocketEvent::Connection(ConnectionUpdate::Open { me }) => {
                self.on_open(me);
                Flow::Continue
            }
            SocketEvent::Connection(ConnectionUpdate::Close { reason, message }) => {
                self.on_close(reason, message).await
            }
            SocketEvent::Error(message) => {
                tracing::error!(owner = %self.key, error = %message, "socket reported an error");
                self.close_socket().await;
                self.terminate(ConnectionStatus::Failed, SessionFailure::Crashed(message));
                Flow::Stop
            }
        }
    }

    fn on_qr(&mut self, code: String) {
        let qr = match QrPayload::render(code, self.ctx.settings.qr_ttl) {
            Ok(qr) => qr,
            Err(e) => {
                tracing::warn!(owner = %self.key, error = %e, "failed to render QR code");
                return;
            }
        };
        tracing::info!(owner = %self.key, "new QR code issued");
        let update = SessionUpdate::qr(&self.key, &qr);
        self.transition(ConnectionStatus::QrPending, None, |s| s.qr = Some(qr));
        self.ctx.hub.publish(&self.key, update);
    }

    async fn on_creds(&mut self, update: CredsUpdate) -> Flow {
        let saved = guarded(
            "save credentials",
            self.ctx.settings.operation_timeout,
            self.ctx.auth.save(&self.key, &update),
        )
        .await
        .and_then(|r| r);
        match saved {
            Ok(()) => {
                self.state.send_modify(|s| s.touch());
                Flow::Continue
            }
            Err(e) => {
                tracing::error!(owner = %self.key, error = %e, "failed to persist credentials");
                self.close_socket().await;
                self.terminate(
                    ConnectionStatus::Failed,
                    SessionFailure::Crashed(format!("failed to persist credentials: {e}")),
                );
                Flow::Stop
            }
        }
    }

    fn on_open(&mut self, me: Option<String>) {
        let phone = me.as_deref().map(phone_from_jid);
        tracing::info!(owner = %self.key, phone = phone.as_deref().unwrap_or("-"), "session connected");
        self.restarts = 0;
        self.transition(ConnectionStatus::Connected, None, |s| {
            s.qr = None;
            s.retry_count = 0;
            s.failure = None;
            if phone.is_some() {
                s.phone_number = phone;
            }
        });
    }

    async fn on_close(&mut self, reason: DisconnectReason, message: Option<String>) -> Flow {
        self.socket = None;
        self.events = None;
        let code = reason.status_code();
        let detail = message.unwrap_or_else(|| format!("{reason:?}"));

        match reason.class() {
            CloseClass::LoggedOut => {
                tracing::info!(owner = %self.key, code, "logged out by remote device");
                self.ctx.purge_auth(&self.key).await;
                self.terminate(ConnectionStatus::Closed, SessionFailure::LoggedOut);
                Flow::Stop
            }
            CloseClass::Corrupt => {
                tracing::warn!(owner = %self.key, code, "stored credentials rejected");
                self.ctx.purge_auth(&self.key).await;
                self.terminate(ConnectionStatus::Failed, SessionFailure::AuthStateCorrupt(detail));
                Flow::Stop
            }
            CloseClass::Replaced => {
                tracing::warn!(owner = %self.key, code, "session replaced by another client");
                self.terminate(ConnectionStatus::Closed, SessionFailure::Replaced);
                Flow::Stop
            }
            CloseClass::Restart => {
                self.restarts += 1;
                if self.restarts > MAX_IMMEDIATE_RESTARTS {
                    return self.schedule_retry(format!(
                        "restart requested {} times without connecting",
                        self.restarts
                    ));
                }
                tracing::info!(owner = %self.key, code, restarts = self.restarts, "restart requested, reconnecting");
                self.transition(ConnectionStatus::Connecting, None, |s| s.qr = None);
                self.reconnect_at = Some(Instant::now());
                Flow::Continue
            }
            CloseClass::Transient => {
                self.schedule_retry(format!("connection closed ({code}): {detail}"))
            }
        }
    }

    // ── Reconnect ─────────────────────────────────────────────────────────────

    /// Count a transient failure and arm the reconnect timer, or give up
    /// once the retry ceiling is reached.
    pub(crate) fn schedule_retry(&mut self, reason: String) -> Flow {
        let attempt = self.state.borrow().retry_count + 1;
        let max = self.ctx.settings.max_retries;
        if attempt > max {
            tracing::error!(owner = %self.key, retries = max, reason = %reason, "giving up on session");
            self.terminate(
                ConnectionStatus::Failed,
                SessionFailure::RetriesExhausted(reason),
            );
            return Flow::Stop;
        }
        let delay = self.ctx.settings.backoff(attempt);
        tracing::warn!(
            owner = %self.key,
            attempt,
            max,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "transient disconnect, scheduling reconnect"
        );
        self.transition(
            ConnectionStatus::Disconnected,
            Some(format!("reconnecting (attempt {attempt} of {max})")),
            |s| {
                s.qr = None;
                s.retry_count = attempt;
            },
        );
        self.reconnect_at = Some(Instant::now() + delay);
        Flow::Continue
    }

    async fn reconnect(&mut self) -> Flow {
        self.transition(ConnectionStatus::Connecting, None, |_| {});
        let opened = tokio::select! {
            r = self.ctx.open(&self.key) => r,
            _ = self.cancel.cancelled() => {
                self.transition(ConnectionStatus::Disconnected, Some("session stopped".into()), |_| {});
                return Flow::Stop;
            }
        };
        match opened {
            Ok(connection) => {
                self.socket = Some(connection.socket);
                self.events = Some(connection.events);
                Flow::Continue
            }
            Err(SessionError::TransientNetworkError(reason)) => self.schedule_retry(reason),
            Err(err) => {
                tracing::error!(owner = %self.key, error = %err, "reconnect failed");
                if let SessionError::AuthStateCorrupt { .. } = err {
                    self.ctx.purge_auth(&self.key).await;
                }
                self.terminate(ConnectionStatus::Failed, SessionFailure::from(&err));
                Flow::Stop
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: SessionCommand) -> Flow {
        let timeout = self.ctx.settings.operation_timeout;
        match command {
            SessionCommand::SendText { to, text, reply } => {
                let status = self.state.borrow().status;
                let result = match &self.socket {
                    Some(socket) if status == ConnectionStatus::Connected => {
                        guarded("send", timeout, socket.send_text(&to, &text))
                            .await
                            .and_then(|r| r.map_err(socket_error))
                    }
                    _ => Err(SessionError::NotConnected {
                        key: self.key.clone(),
                        status,
                    }),
                };
                let timed_out = matches!(result, Err(SessionError::OperationTimedOut { .. }));
                match &result {
                    Ok(id) => {
                        tracing::debug!(owner = %self.key, message_id = %id, "message sent");
                        self.state.send_modify(|s| s.touch());
                    }
                    Err(e) => tracing::warn!(owner = %self.key, error = %e, "send failed"),
                }
                let _ = reply.send(result);
                if timed_out {
                    self.close_socket().await;
                    self.terminate(ConnectionStatus::Failed, SessionFailure::TimedOut("send"));
                    return Flow::Stop;
                }
                Flow::Continue
            }
            SessionCommand::Logout { reply } => {
                let result = match self.socket.take() {
                    Some(socket) => {
                        let r = guarded("logout", timeout, socket.logout())
                            .await
                            .and_then(|r| r.map_err(socket_error));
                        if r.is_err() {
                            let _ = guarded("end", timeout, socket.end()).await;
                        }
                        r
                    }
                    None => Ok(()),
                };
                self.events = None;
                match &result {
                    Ok(()) => {
                        tracing::info!(owner = %self.key, "logged out");
                        self.terminate(ConnectionStatus::Closed, SessionFailure::LoggedOut);
                    }
                    Err(e) => {
                        tracing::warn!(owner = %self.key, error = %e, "logout failed");
                        self.terminate(ConnectionStatus::Failed, SessionFailure::from(e));
                    }
                }
                let _ = reply.send(result);
                Flow::Stop
            }
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    async fn close_socket(&mut self) {
        self.events = None;
        if let Some(socket) = self.socket.take() {
            if guarded("end", self.ctx.settings.operation_timeout, socket.end())
                .await
                .is_err()
            {
                tracing::warn!(owner = %self.key, "socket did not end cleanly, dropping it");
            }
        }
    }

    /// Apply a state change. Status changes (and any explicit message) are
    /// announced to subscribers and the metadata store.
    fn transition(
        &self,
        status: ConnectionStatus,
        message: Option<String>,
        apply: impl FnOnce(&mut SessionState),
    ) {
        let mut changed = false;
        self.state.send_modify(|s| {
            changed = s.status != status;
            s.status = status;
            s.touch();
            apply(s);
        });
        if changed || message.is_some() {
            let phone = self.state.borrow().phone_number.clone();
            self.ctx.announce(&self.key, status, phone.as_deref(), message);
        }
    }

    fn terminate(&self, status: ConnectionStatus, failure: SessionFailure) {
        let message = failure.describe();
        self.transition(status, Some(message), |s| {
            s.qr = None;
            s.failure = Some(failure);
        });
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<SocketEvent>>) -> Option<SocketEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn socket_error(err: SocketError) -> SessionError {
    SessionError::TransientNetworkError(err.to_string())
}

/// "15551234567:12@s.whatsapp.net" -> "15551234567"
pub(crate) fn phone_from_jid(jid: &str) -> String {
    jid.split(['@', ':']).next().unwrap_or(jid).to_string()
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
