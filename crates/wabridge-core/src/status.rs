//! Connection status of a session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle position of one owner's WhatsApp link.
///
/// `Failed` and `Closed` are terminal: the session must be re-initialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    QrPending,
    Connected,
    Failed,
    Closed,
}

impl ConnectionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Failed | ConnectionStatus::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::QrPending => "qr_pending",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
            ConnectionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failed_and_closed_are_terminal() {
        use ConnectionStatus::*;
        for s in [Disconnected, Connecting, QrPending, Connected] {
            assert!(!s.is_terminal(), "{s} should not be terminal");
        }
        assert!(Failed.is_terminal());
        assert!(Closed.is_terminal());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionStatus::QrPending).unwrap();
        assert_eq!(json, "\"qr_pending\"");
        assert_eq!(ConnectionStatus::QrPending.to_string(), "qr_pending");
    }
}
