//! Seam to the WhatsApp protocol library.
//!
//! The library is a black box: [`Connector::connect`] opens one socket for
//! an owner and hands back its event queue. Dropping a [`WaSocket`] must
//! close the underlying connection.

use async_trait::async_trait;
use tokio::sync::mpsc;

use wabridge_core::{AuthState, OwnerKey, SocketEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    #[error("connection failed: {0}")]
    Network(String),
    #[error("socket closed")]
    Closed,
    #[error("library rejected request: {0}")]
    Rejected(String),
}

/// A live socket for one session.
#[async_trait]
pub trait WaSocket: Send + Sync {
    /// Send a text message. Returns the library's message id.
    async fn send_text(&self, to: &str, text: &str) -> Result<String, SocketError>;

    /// Unlink this device from the account.
    async fn logout(&self) -> Result<(), SocketError>;

    /// Close the connection without logging out.
    async fn end(&self);
}

/// An opened socket plus the queue its events arrive on.
pub struct Connection {
    pub socket: Box<dyn WaSocket>,
    pub events: mpsc::Receiver<SocketEvent>,
}

/// Opens sockets. One call per connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        key: &OwnerKey,
        auth: Option<AuthState>,
    ) -> Result<Connection, SocketError>;
}

/// Scripted connector for tests: every connect yields a [`testing::ScriptedHandle`]
/// through which the test plays the library's side.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    use super::*;
    use wabridge_core::{ConnectionUpdate, DisconnectReason};

    /// How the next connect attempt behaves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ConnectMode {
        Accept,
        /// Never resolve; exercises the timeout guard.
        Hang,
        Refuse,
        /// Panic inside connect.
        Panic,
    }

    struct Inner {
        mode: ConnectMode,
        handles: Vec<ScriptedHandle>,
    }

    #[derive(Clone)]
    pub struct ScriptedConnector {
        inner: Arc<Mutex<Inner>>,
        attempts: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
    }

    /// Test-side view of one opened socket.
    #[derive(Clone)]
    pub struct ScriptedHandle {
        pub key: OwnerKey,
        pub auth: Option<AuthState>,
        events: mpsc::Sender<SocketEvent>,
        ended: Arc<AtomicBool>,
        logged_out: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<(String, String)>>>,
        hang_sends: Arc<AtomicBool>,
    }

    struct ScriptedSocket {
        handle: ScriptedHandle,
        live: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        pub fn new() -> Self {
            Self {
                inner: Arc::new(Mutex::new(Inner {
                    mode: ConnectMode::Accept,
                    handles: Vec::new(),
                })),
                attempts: Arc::new(AtomicUsize::new(0)),
                live: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub fn set_mode(&self, mode: ConnectMode) {
            self.lock().mode = mode;
        }

        /// Connect calls made so far, including failed ones.
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        /// Sockets opened and not yet dropped.
        pub fn live_sockets(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        pub fn handles(&self) -> Vec<ScriptedHandle> {
            self.lock().handles.clone()
        }

        pub fn latest(&self) -> Option<ScriptedHandle> {
            self.lock().handles.last().cloned()
        }

        /// Wait until at least `n` sockets have been opened.
        pub async fn wait_for_socket(&self, n: usize) -> Option<ScriptedHandle> {
            for _ in 0..200 {
                {
                    let inner = self.lock();
                    if inner.handles.len() >= n {
                        return inner.handles.get(n - 1).cloned();
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            None
        }
    }

    impl Default for ScriptedConnector {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(
            &self,
            key: &OwnerKey,
            auth: Option<AuthState>,
        ) -> Result<Connection, SocketError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let mode = self.lock().mode;
            match mode {
                ConnectMode::Accept => {}
                ConnectMode::Hang => std::future::pending::<()>().await,
                ConnectMode::Refuse => {
                    return Err(SocketError::Network("connection refused".into()))
                }
                ConnectMode::Panic => panic!("scripted connector panic"),
            }

            let (tx, rx) = mpsc::channel(64);
            let handle = ScriptedHandle {
                key: key.clone(),
                auth,
                events: tx,
                ended: Arc::new(AtomicBool::new(false)),
                logged_out: Arc::new(AtomicBool::new(false)),
                sent: Arc::new(Mutex::new(Vec::new())),
                hang_sends: Arc::new(AtomicBool::new(false)),
            };
            self.lock().handles.push(handle.clone());
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Connection {
                socket: Box::new(ScriptedSocket {
                    handle,
                    live: self.live.clone(),
                }),
                events: rx,
            })
        }
    }

    impl ScriptedHandle {
        /// Deliver an event as the library would. Returns false once the
        /// session stopped reading.
        pub async fn emit(&self, event: SocketEvent) -> bool {
            self.events.send(event).await.is_ok()
        }

        pub async fn emit_qr(&self, code: &str) -> bool {
            self.emit(SocketEvent::Qr(code.to_string())).await
        }

        pub async fn emit_open(&self, me: &str) -> bool {
            self.emit(SocketEvent::Connection(ConnectionUpdate::Open {
                me: Some(me.to_string()),
            }))
            .await
        }

        pub async fn emit_close(&self, code: u16) -> bool {
            self.emit(SocketEvent::Connection(ConnectionUpdate::Close {
                reason: DisconnectReason::from_status_code(code),
                message: None,
            }))
            .await
        }

        pub fn is_ended(&self) -> bool {
            self.ended.load(Ordering::SeqCst)
        }

        pub fn is_logged_out(&self) -> bool {
            self.logged_out.load(Ordering::SeqCst)
        }

        /// True once the session dropped its end of the event queue.
        pub fn is_closed(&self) -> bool {
            self.events.is_closed()
        }

        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn hang_sends(&self) {
            self.hang_sends.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl WaSocket for ScriptedSocket {
        async fn send_text(&self, to: &str, text: &str) -> Result<String, SocketError> {
            if self.handle.hang_sends.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let mut sent = self
                .handle
                .sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            sent.push((to.to_string(), text.to_string()));
            Ok(format!("MSG{}", sent.len()))
        }

        async fn logout(&self) -> Result<(), SocketError> {
            self.handle.logged_out.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn end(&self) {
            self.handle.ended.store(true, Ordering::SeqCst);
        }
    }

    impl Drop for ScriptedSocket {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
