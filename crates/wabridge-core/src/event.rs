//! Events raised by the underlying WhatsApp socket library.
//!
//! The library is a black box: it emits `qr`, `connection.update` and
//! `creds.update`. These types are the Rust-side view of those events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque credential/key material needed to resume a paired session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub creds: Value,
    #[serde(default)]
    pub keys: BTreeMap<String, Value>,
}

/// Payload of a `creds.update` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredsUpdate {
    pub creds: Value,
    #[serde(default)]
    pub keys: BTreeMap<String, Option<Value>>,
}

/// One event from a session's socket, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// New pairing challenge to render as a QR code.
    Qr(String),
    Connection(ConnectionUpdate),
    Creds(CredsUpdate),
    /// Error reported by the library outside of a close.
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionUpdate {
    Connecting,
    /// Pairing or resume succeeded. `me` is the linked account id.
    Open { me: Option<String> },
    Close {
        reason: DisconnectReason,
        message: Option<String>,
    },
}

/// Why a socket closed, decoded from the library's status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    Forbidden,
    BadSession,
    ConnectionReplaced,
    RestartRequired,
    ConnectionClosed,
    ConnectionLost,
    MultideviceMismatch,
    Unavailable,
    Unknown(u16),
}

/// What the lifecycle manager does with a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Remote logged the device out: purge auth-state, session closed.
    LoggedOut,
    /// Stored credentials are unusable: purge auth-state, session failed.
    Corrupt,
    /// Another client took over the session: closed, no reconnect.
    Replaced,
    /// Reconnect now without consuming a retry (normal after pairing).
    Restart,
    /// Network-level failure: reconnect with backoff.
    Transient,
}

impl DisconnectReason {
    pub fn from_status_code(code: u16) -> Self {
        match code {
            401 => DisconnectReason::LoggedOut,
            403 => DisconnectReason::Forbidden,
            408 => DisconnectReason::ConnectionLost,
            411 => DisconnectReason::MultideviceMismatch,
            428 => DisconnectReason::ConnectionClosed,
            440 => DisconnectReason::ConnectionReplaced,
            500 => DisconnectReason::BadSession,
            503 => DisconnectReason::Unavailable,
            515 => DisconnectReason::RestartRequired,
            other => DisconnectReason::Unknown(other),
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            DisconnectReason::LoggedOut => 401,
            DisconnectReason::Forbidden => 403,
            DisconnectReason::ConnectionLost => 408,
            DisconnectReason::MultideviceMismatch => 411,
            DisconnectReason::ConnectionClosed => 428,
            DisconnectReason::ConnectionReplaced => 440,
            DisconnectReason::BadSession => 500,
            DisconnectReason::Unavailable => 503,
            DisconnectReason::RestartRequired => 515,
            DisconnectReason::Unknown(code) => code,
        }
    }

    pub fn class(self) -> CloseClass {
        match self {
            DisconnectReason::LoggedOut | DisconnectReason::Forbidden => CloseClass::LoggedOut,
            DisconnectReason::BadSession | DisconnectReason::MultideviceMismatch => {
                CloseClass::Corrupt
            }
            DisconnectReason::ConnectionReplaced => CloseClass::Replaced,
            DisconnectReason::RestartRequired => CloseClass::Restart,
            DisconnectReason::ConnectionClosed
            | DisconnectReason::ConnectionLost
            | DisconnectReason::Unavailable
            | DisconnectReason::Unknown(_) => CloseClass::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_roundtrip() {
        for code in [401, 403, 408, 411, 428, 440, 500, 503, 515, 999] {
            assert_eq!(DisconnectReason::from_status_code(code).status_code(), code);
        }
    }

    #[test]
    fn classification() {
        assert_eq!(DisconnectReason::from_status_code(401).class(), CloseClass::LoggedOut);
        assert_eq!(DisconnectReason::from_status_code(500).class(), CloseClass::Corrupt);
        assert_eq!(DisconnectReason::from_status_code(440).class(), CloseClass::Replaced);
        assert_eq!(DisconnectReason::from_status_code(515).class(), CloseClass::Restart);
        assert_eq!(DisconnectReason::from_status_code(428).class(), CloseClass::Transient);
        assert_eq!(DisconnectReason::from_status_code(408).class(), CloseClass::Transient);
        assert_eq!(DisconnectReason::Unknown(0).class(), CloseClass::Transient);
    }
}
