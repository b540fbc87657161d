//! Connector backed by the protocol sidecar.
//!
//! Each session gets its own WebSocket to `<url>/sessions/<ownerType>/<ownerId>`
//! carrying JSON frames (see `wabridge_core::wire`). A reader task turns
//! inbound frames into socket events and routes send results back to their
//! callers; a writer task drains the outbound queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use wabridge_core::wire::{InboundFrame, OutboundFrame};
use wabridge_core::{AuthState, ConnectionUpdate, DisconnectReason, OwnerKey, SocketEvent};

use crate::socket::{Connection, Connector, SocketError, WaSocket};

const OUTBOUND_QUEUE: usize = 32;
const EVENT_QUEUE: usize = 64;

type PendingSends = Arc<DashMap<u64, oneshot::Sender<Result<String, SocketError>>>>;

pub struct BridgeConnector {
    url: String,
}

impl BridgeConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn session_url(&self, key: &OwnerKey) -> String {
        format!(
            "{}/sessions/{}/{}",
            self.url.trim_end_matches('/'),
            key.owner_type(),
            key.owner_id()
        )
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(
        &self,
        key: &OwnerKey,
        auth: Option<AuthState>,
    ) -> Result<Connection, SocketError> {
        let url = self.session_url(key);
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SocketError::Network(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let start = encode(&OutboundFrame::Start { auth })?;
        sink.send(Message::text(start))
            .await
            .map_err(|e| SocketError::Network(e.to_string()))?;
        tracing::debug!(owner = %key, %url, "bridge socket started");

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE);
        let (event_tx, event_rx) = mpsc::channel::<SocketEvent>(EVENT_QUEUE);
        let pending: PendingSends = Arc::new(DashMap::new());

        // The writer ends once the socket handle (and with it the outbound
        // queue) is dropped, after flushing whatever was queued.
        tokio::spawn({
            let owner = key.clone();
            async move {
                while let Some(frame) = outbound_rx.recv().await {
                    let last = matches!(frame, OutboundFrame::End);
                    let text = match encode(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(owner = %owner, error = %e, "dropping unencodable frame");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::text(text)).await {
                        tracing::debug!(owner = %owner, error = %e, "bridge write failed");
                        break;
                    }
                    if last {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        });

        let reader = tokio::spawn({
            let owner = key.clone();
            let pending = pending.clone();
            async move {
                let mut lost = Some("bridge closed the socket".to_string());
                while let Some(msg) = stream.next().await {
                    let text = match msg {
                        Ok(Message::Text(text)) => text,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::warn!(owner = %owner, error = %e, "bridge read failed");
                            lost = Some(e.to_string());
                            break;
                        }
                    };
                    let frame = match serde_json::from_str::<InboundFrame>(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(owner = %owner, error = %e, "unparseable bridge frame");
                            continue;
                        }
                    };
                    if let InboundFrame::SendResult {
                        request_id,
                        message_id,
                        error,
                    } = frame
                    {
                        if let Some((_, reply)) = pending.remove(&request_id) {
                            let _ = reply.send(send_outcome(message_id, error));
                        }
                        continue;
                    }
                    if let Some(event) = frame.into_event() {
                        if event_tx.send(event).await.is_err() {
                            lost = None;
                            break;
                        }
                    }
                }
                // Outstanding sends see the socket as closed.
                pending.clear();
                if let Some(message) = lost {
                    let close = ConnectionUpdate::Close {
                        reason: DisconnectReason::ConnectionLost,
                        message: Some(message),
                    };
                    let _ = event_tx.send(SocketEvent::Connection(close)).await;
                }
                tracing::debug!(owner = %owner, "bridge socket closed");
            }
        });

        Ok(Connection {
            socket: Box::new(BridgeSocket {
                outbound: outbound_tx,
                pending,
                next_request: AtomicU64::new(1),
                reader: reader.abort_handle(),
            }),
            events: event_rx,
        })
    }
}

struct BridgeSocket {
    outbound: mpsc::Sender<OutboundFrame>,
    pending: PendingSends,
    next_request: AtomicU64,
    reader: AbortHandle,
}

#[async_trait]
impl WaSocket for BridgeSocket {
    async fn send_text(&self, to: &str, text: &str) -> Result<String, SocketError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.pending.insert(request_id, reply);
        let queued = self
            .outbound
            .send(OutboundFrame::SendText {
                request_id,
                to: to.to_string(),
                text: text.to_string(),
            })
            .await;
        if queued.is_err() {
            self.pending.remove(&request_id);
            return Err(SocketError::Closed);
        }
        rx.await.map_err(|_| SocketError::Closed)?
    }

    async fn logout(&self) -> Result<(), SocketError> {
        self.outbound
            .send(OutboundFrame::Logout)
            .await
            .map_err(|_| SocketError::Closed)
    }

    async fn end(&self) {
        let _ = self.outbound.send(OutboundFrame::End).await;
    }
}

impl Drop for BridgeSocket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn encode(frame: &OutboundFrame) -> Result<String, SocketError> {
    serde_json::to_string(frame).map_err(|e| SocketError::Rejected(e.to_string()))
}

fn send_outcome(message_id: Option<String>, error: Option<String>) -> Result<String, SocketError> {
    match (message_id, error) {
        (_, Some(error)) => Err(SocketError::Rejected(error)),
        (Some(id), None) => Ok(id),
        (None, None) => Err(SocketError::Rejected("bridge returned no message id".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use wabridge_core::OwnerType;

    /// Minimal sidecar: checks the start frame, pairs, then answers sends.
    async fn fake_sidecar() -> (String, tokio::task::JoinHandle<Vec<Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut seen = Vec::new();
            ws.send(Message::text(json!({"type": "qr", "code": "2@abc"}).to_string()))
                .await
                .unwrap();
            ws.send(Message::text(
                json!({"type": "connection", "state": "open", "me": "1555:1@s.whatsapp.net"})
                    .to_string(),
            ))
            .await
            .unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                seen.push(frame.clone());
                match frame["type"].as_str() {
                    Some("send_text") => {
                        let reply = json!({
                            "type": "send_result",
                            "request_id": frame["request_id"],
                            "message_id": "3EB0",
                        });
                        ws.send(Message::text(reply.to_string())).await.unwrap();
                    }
                    Some("end") => break,
                    _ => {}
                }
            }
            seen
        });
        (format!("ws://{addr}"), task)
    }

    async fn next_event(conn: &mut Connection) -> Option<SocketEvent> {
        tokio::time::timeout(Duration::from_secs(2), conn.events.recv())
            .await
            .unwrap()
    }

    #[test]
    fn session_url_includes_owner() {
        let c = BridgeConnector::new("ws://127.0.0.1:9220/");
        let key = OwnerKey::new("s-9", OwnerType::Staff).unwrap();
        assert_eq!(c.session_url(&key), "ws://127.0.0.1:9220/sessions/staff/s-9");
    }

    #[test]
    fn send_outcome_prefers_error() {
        assert_eq!(send_outcome(Some("x".into()), None), Ok("x".into()));
        assert_eq!(
            send_outcome(Some("x".into()), Some("bad jid".into())),
            Err(SocketError::Rejected("bad jid".into()))
        );
        assert!(send_outcome(None, None).is_err());
    }

    #[tokio::test]
    async fn bridge_round_trip() {
        let (url, sidecar) = fake_sidecar().await;
        let key = OwnerKey::new("c1", OwnerType::Coach).unwrap();
        let mut conn = BridgeConnector::new(url).connect(&key, None).await.unwrap();

        assert_eq!(next_event(&mut conn).await, Some(SocketEvent::Qr("2@abc".into())));
        assert_eq!(
            next_event(&mut conn).await,
            Some(SocketEvent::Connection(ConnectionUpdate::Open {
                me: Some("1555:1@s.whatsapp.net".into())
            }))
        );

        let id = conn.socket.send_text("1666", "hi").await.unwrap();
        assert_eq!(id, "3EB0");
        conn.socket.end().await;

        let seen = tokio::time::timeout(Duration::from_secs(2), sidecar)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen[0]["type"], "start");
        assert_eq!(seen[1]["type"], "send_text");
        assert_eq!(seen[1]["to"], "1666");
        assert_eq!(seen.last().unwrap()["type"], "end");
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let key = OwnerKey::new("c1", OwnerType::Coach).unwrap();
        let err = BridgeConnector::new(format!("ws://{addr}"))
            .connect(&key, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SocketError::Network(_)));
    }
}
