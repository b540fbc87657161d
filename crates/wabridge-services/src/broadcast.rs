//! QR/status fan-out to subscribers of one owner (WebSocket clients).
//!
//! One `tokio::sync::broadcast` channel per owner, created on first
//! subscribe. Publishing with no live subscriber is a no-op, so registration
//! races with the session task are harmless.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use wabridge_core::{ConnectionStatus, OwnerKey, OwnerType};

use crate::qr::QrPayload;

/// Update pushed to subscribers, serialized as a JSON text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    #[serde(rename_all = "camelCase")]
    Qr {
        owner_id: String,
        owner_type: OwnerType,
        qr_code: String,
        expires_in_secs: u64,
    },
    #[serde(rename_all = "camelCase")]
    Status {
        owner_id: String,
        owner_type: OwnerType,
        status: ConnectionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl SessionUpdate {
    pub fn qr(key: &OwnerKey, qr: &QrPayload) -> Self {
        SessionUpdate::Qr {
            owner_id: key.owner_id().to_string(),
            owner_type: key.owner_type(),
            qr_code: qr.data_url.clone(),
            expires_in_secs: qr.expires_in().as_secs(),
        }
    }

    pub fn status(key: &OwnerKey, status: ConnectionStatus, message: Option<String>) -> Self {
        SessionUpdate::Status {
            owner_id: key.owner_id().to_string(),
            owner_type: key.owner_type(),
            status,
            message,
        }
    }
}

/// Per-owner broadcast channels. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastHub {
    channels: Arc<DashMap<OwnerKey, broadcast::Sender<SessionUpdate>>>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, key: &OwnerKey) -> broadcast::Receiver<SessionUpdate> {
        self.channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Push an update. Returns how many subscribers received it.
    pub fn publish(&self, key: &OwnerKey, update: SessionUpdate) -> usize {
        let delivered = match self.channels.get(key) {
            // send only fails when every receiver is gone
            Some(tx) => tx.send(update).unwrap_or(0),
            None => 0,
        };
        tracing::trace!(owner = %key, delivered, "session update published");
        delivered
    }

    pub fn subscriber_count(&self, key: &OwnerKey) -> usize {
        self.channels
            .get(key)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop the owner's channel if nobody listens anymore.
    pub fn prune(&self, key: &OwnerKey) {
        self.channels.remove_if(key, |_, tx| tx.receiver_count() == 0);
    }

    /// Drop every channel without subscribers. Returns how many went.
    pub fn prune_idle(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
        before - self.channels.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(id: &str) -> OwnerKey {
        OwnerKey::new(id, OwnerType::Coach).unwrap()
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let hub = BroadcastHub::new(4);
        let update = SessionUpdate::status(&key("a"), ConnectionStatus::Connecting, None);
        assert_eq!(hub.publish(&key("a"), update.clone()), 0);

        // a channel whose receivers went away is also fine
        drop(hub.subscribe(&key("a")));
        assert_eq!(hub.publish(&key("a"), update), 0);
    }

    #[tokio::test]
    async fn updates_reach_only_the_owner() {
        let hub = BroadcastHub::new(4);
        let mut rx_a = hub.subscribe(&key("a"));
        let mut rx_b = hub.subscribe(&key("b"));

        let update = SessionUpdate::status(&key("a"), ConnectionStatus::QrPending, None);
        assert_eq!(hub.publish(&key("a"), update.clone()), 1);

        assert_eq!(rx_a.recv().await.unwrap(), update);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn prune_keeps_channels_with_subscribers() {
        let hub = BroadcastHub::new(4);
        let _rx = hub.subscribe(&key("a"));
        drop(hub.subscribe(&key("b")));

        assert_eq!(hub.channel_count(), 2);
        hub.prune(&key("a"));
        assert_eq!(hub.channel_count(), 2);
        assert_eq!(hub.prune_idle(), 1);
        assert_eq!(hub.subscriber_count(&key("a")), 1);
        assert_eq!(hub.subscriber_count(&key("b")), 0);
    }

    #[test]
    fn qr_update_serializes_camel_case() {
        let qr = QrPayload::new("c".into(), "data:x".into(), Duration::from_secs(60));
        let json = serde_json::to_value(SessionUpdate::qr(&key("a"), &qr)).unwrap();
        assert_eq!(json["type"], "qr");
        assert_eq!(json["ownerId"], "a");
        assert_eq!(json["ownerType"], "coach");
        assert_eq!(json["qrCode"], "data:x");
        assert!(json["expiresInSecs"].as_u64().unwrap() <= 60);
    }
}
