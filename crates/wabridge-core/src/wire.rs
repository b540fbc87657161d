//! Sidecar wire format — JSON text frames exchanged with the process hosting
//! the WhatsApp protocol library.
//!
//! One WebSocket per session at `<bridge>/sessions/<ownerType>/<ownerId>`.
//! The first outbound frame is always `start`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{AuthState, ConnectionUpdate, CredsUpdate, DisconnectReason, SocketEvent};

/// Frames sent by wabridge to the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Start {
        #[serde(skip_serializing_if = "Option::is_none")]
        auth: Option<AuthState>,
    },
    SendText {
        request_id: u64,
        to: String,
        text: String,
    },
    Logout,
    End,
}

/// Connection state as reported by the sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireConnectionState {
    Connecting,
    Open,
    Close,
}

/// Frames received from the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Qr {
        code: String,
    },
    Connection {
        state: WireConnectionState,
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        me: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Creds {
        creds: Value,
        #[serde(default)]
        keys: BTreeMap<String, Option<Value>>,
    },
    Error {
        message: String,
    },
    SendResult {
        request_id: u64,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl InboundFrame {
    /// Map a frame to a socket event. `SendResult` is a reply, not an event.
    pub fn into_event(self) -> Option<SocketEvent> {
        match self {
            InboundFrame::Qr { code } => Some(SocketEvent::Qr(code)),
            InboundFrame::Connection {
                state,
                status_code,
                me,
                message,
            } => Some(SocketEvent::Connection(match state {
                WireConnectionState::Connecting => ConnectionUpdate::Connecting,
                WireConnectionState::Open => ConnectionUpdate::Open { me },
                WireConnectionState::Close => ConnectionUpdate::Close {
                    // A close with no code is an unexplained drop.
                    reason: status_code
                        .map(DisconnectReason::from_status_code)
                        .unwrap_or(DisconnectReason::ConnectionLost),
                    message,
                },
            })),
            InboundFrame::Creds { creds, keys } => {
                Some(SocketEvent::Creds(CredsUpdate { creds, keys }))
            }
            InboundFrame::Error { message } => Some(SocketEvent::Error(message)),
            InboundFrame::SendResult { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_frame_omits_missing_auth() {
        let text = serde_json::to_string(&OutboundFrame::Start { auth: None }).unwrap();
        assert_eq!(text, r#"{"type":"start"}"#);
    }

    #[test]
    fn close_frame_decodes_reason() {
        let frame: InboundFrame = serde_json::from_value(json!({
            "type": "connection",
            "state": "close",
            "status_code": 401,
        }))
        .unwrap();
        assert_eq!(
            frame.into_event(),
            Some(SocketEvent::Connection(ConnectionUpdate::Close {
                reason: DisconnectReason::LoggedOut,
                message: None,
            }))
        );
    }

    #[test]
    fn close_without_code_is_connection_lost() {
        let frame: InboundFrame =
            serde_json::from_value(json!({"type": "connection", "state": "close"})).unwrap();
        match frame.into_event() {
            Some(SocketEvent::Connection(ConnectionUpdate::Close { reason, .. })) => {
                assert_eq!(reason, DisconnectReason::ConnectionLost)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn creds_frame_keeps_key_deletions() {
        let frame: InboundFrame = serde_json::from_value(json!({
            "type": "creds",
            "creds": {"registered": true},
            "keys": {"pre-key-1": null, "pre-key-2": {"x": 1}},
        }))
        .unwrap();
        let Some(SocketEvent::Creds(update)) = frame.into_event() else {
            panic!("expected creds event");
        };
        assert_eq!(update.keys["pre-key-1"], None);
        assert_eq!(update.keys["pre-key-2"], Some(json!({"x": 1})));
    }

    #[test]
    fn send_result_is_not_an_event() {
        let frame = InboundFrame::SendResult {
            request_id: 1,
            message_id: Some("ABC".into()),
            error: None,
        };
        assert!(frame.into_event().is_none());
    }
}
