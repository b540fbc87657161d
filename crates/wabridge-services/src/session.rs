//! Session snapshot and the handle the registry owns for each session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wabridge_core::{ConnectionStatus, OwnerKey, SessionError, SessionFailure};

use crate::qr::QrPayload;

/// Point-in-time view of a session, published through a watch channel.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub status: ConnectionStatus,
    pub qr: Option<QrPayload>,
    pub created_at: Instant,
    pub last_activity_at: Instant,
    /// Consecutive transient failures since the last successful connect.
    pub retry_count: u32,
    pub failure: Option<SessionFailure>,
    /// Linked account id, known once connected.
    pub phone_number: Option<String>,
}

impl SessionState {
    pub fn new(status: ConnectionStatus) -> Self {
        let now = Instant::now();
        Self {
            status,
            qr: None,
            created_at: now,
            last_activity_at: now,
            retry_count: 0,
            failure: None,
            phone_number: None,
        }
    }

    /// The QR, if one is outstanding and not yet expired.
    pub fn current_qr(&self) -> Option<&QrPayload> {
        self.qr.as_ref().filter(|qr| qr.is_valid())
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Instant::now();
    }

    /// Move to a terminal failure, dropping any QR.
    pub fn fail(&mut self, failure: SessionFailure) {
        self.status = ConnectionStatus::Failed;
        self.qr = None;
        self.failure = Some(failure);
        self.touch();
    }
}

/// Requests a caller makes of a running session task.
pub(crate) enum SessionCommand {
    SendText {
        to: String,
        text: String,
        reply: oneshot::Sender<Result<String, SessionError>>,
    },
    Logout {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Registry-owned handle to one session. The socket itself lives inside the
/// session task; this handle owns that task.
#[derive(Clone)]
pub struct SessionHandle {
    key: OwnerKey,
    state: Arc<watch::Sender<SessionState>>,
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    pub(crate) fn new(
        key: OwnerKey,
        status: ConnectionStatus,
        commands: mpsc::Sender<SessionCommand>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::new(status));
        Self {
            key,
            state: Arc::new(state),
            commands,
            cancel: CancellationToken::new(),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn key(&self) -> &OwnerKey {
        &self.key
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    /// Non-blocking: the outstanding, unexpired QR or `None`.
    pub fn current_qr(&self) -> Option<QrPayload> {
        self.state.borrow().current_qr().cloned()
    }

    pub fn is_active(&self) -> bool {
        !self.status().is_terminal()
    }

    /// Change notifications for this session.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn state_tx(&self) -> Arc<watch::Sender<SessionState>> {
        self.state.clone()
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) async fn attach(&self, task: JoinHandle<()>) {
        *self.task.lock().await = Some(task);
    }

    pub(crate) async fn request(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::NotConnected {
                key: self.key.clone(),
                status: self.status(),
            })
    }

    /// Cancel the session and wait for its task to close the socket. A task
    /// that does not finish within `grace` is aborted, which drops the socket.
    pub(crate) async fn stop(&self, grace: Duration) {
        self.cancel.cancel();
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        let abort = task.abort_handle();
        if tokio::time::timeout(grace, task).await.is_err() {
            tracing::warn!(owner = %self.key, "session task did not stop in time, aborting");
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wabridge_core::OwnerType;

    fn handle() -> SessionHandle {
        let (tx, _rx) = mpsc::channel(1);
        SessionHandle::new(
            OwnerKey::new("a", OwnerType::Coach).unwrap(),
            ConnectionStatus::Connecting,
            tx,
        )
    }

    #[test]
    fn expired_qr_is_hidden() {
        let h = handle();
        h.state_tx().send_modify(|s| {
            s.status = ConnectionStatus::QrPending;
            s.qr = Some(QrPayload::new("c".into(), "d".into(), Duration::ZERO));
        });
        assert!(h.current_qr().is_none());

        h.state_tx().send_modify(|s| {
            s.qr = Some(QrPayload::new("c".into(), "d".into(), Duration::from_secs(60)));
        });
        assert_eq!(h.current_qr().unwrap().code, "c");
    }

    #[test]
    fn fail_clears_qr_and_is_terminal() {
        let h = handle();
        h.state_tx().send_modify(|s| {
            s.qr = Some(QrPayload::new("c".into(), "d".into(), Duration::from_secs(60)));
            s.fail(SessionFailure::TimedOut("connect"));
        });
        let snap = h.snapshot();
        assert_eq!(snap.status, ConnectionStatus::Failed);
        assert!(snap.qr.is_none());
        assert!(!h.is_active());
    }

    #[tokio::test]
    async fn stop_without_task_is_noop() {
        let h = handle();
        h.stop(Duration::from_millis(10)).await;
        assert!(h.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn stop_aborts_stuck_task() {
        let h = handle();
        let task = tokio::spawn(std::future::pending::<()>());
        let abort = task.abort_handle();
        h.attach(task).await;
        h.stop(Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn request_to_gone_task_is_not_connected() {
        let h = handle();
        let (reply, _) = oneshot::channel();
        let err = h.request(SessionCommand::Logout { reply }).await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected { .. }));
    }
}
