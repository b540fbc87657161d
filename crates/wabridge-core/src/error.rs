//! Session error taxonomy.

use std::path::PathBuf;
use std::time::Duration;

use crate::owner::OwnerKey;
use crate::status::ConnectionStatus;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session for {0}")]
    SessionNotFound(OwnerKey),
    #[error("session for {key} is already active ({status})")]
    SessionAlreadyActive {
        key: OwnerKey,
        status: ConnectionStatus,
    },
    #[error("auth state for {key} is corrupt: {reason}")]
    AuthStateCorrupt { key: OwnerKey, reason: String },
    #[error("{operation} timed out after {}ms", after.as_millis())]
    OperationTimedOut {
        operation: &'static str,
        after: Duration,
    },
    #[error("session for {0} was logged out by the remote device")]
    LoggedOutByRemote(OwnerKey),
    #[error("network error: {0}")]
    TransientNetworkError(String),
    #[error("session for {key} is not connected ({status})")]
    NotConnected {
        key: OwnerKey,
        status: ConnectionStatus,
    },
    #[error("initialization of {0} was cancelled")]
    Cancelled(OwnerKey),
    #[error("session task failed: {0}")]
    Internal(String),
    #[error("auth state I/O failed at {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Why a session ended up terminal. Kept on the session snapshot so callers
/// can see the cause after the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    LoggedOut,
    Replaced,
    AuthStateCorrupt(String),
    TimedOut(&'static str),
    RetriesExhausted(String),
    /// Library error, storage failure or panic caught at the session boundary.
    Crashed(String),
}

impl SessionFailure {
    /// The error a caller receives when acting on a session in this state.
    pub fn to_error(&self, key: &OwnerKey, timeout: Duration) -> SessionError {
        match self {
            SessionFailure::LoggedOut => SessionError::LoggedOutByRemote(key.clone()),
            SessionFailure::AuthStateCorrupt(reason) => SessionError::AuthStateCorrupt {
                key: key.clone(),
                reason: reason.clone(),
            },
            SessionFailure::TimedOut(operation) => SessionError::OperationTimedOut {
                operation,
                after: timeout,
            },
            SessionFailure::RetriesExhausted(reason) => {
                SessionError::TransientNetworkError(reason.clone())
            }
            SessionFailure::Crashed(reason) => SessionError::Internal(reason.clone()),
            SessionFailure::Replaced => SessionError::TransientNetworkError(
                "session was replaced by another client".to_string(),
            ),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SessionFailure::LoggedOut => "logged out by the remote device".to_string(),
            SessionFailure::Replaced => "replaced by another client".to_string(),
            SessionFailure::AuthStateCorrupt(reason) => format!("auth state corrupt: {reason}"),
            SessionFailure::TimedOut(operation) => format!("{operation} timed out"),
            SessionFailure::RetriesExhausted(reason) => {
                format!("reconnect retries exhausted: {reason}")
            }
            SessionFailure::Crashed(reason) => format!("session error: {reason}"),
        }
    }
}

impl From<&SessionError> for SessionFailure {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::AuthStateCorrupt { reason, .. } => {
                SessionFailure::AuthStateCorrupt(reason.clone())
            }
            SessionError::OperationTimedOut { operation, .. } => SessionFailure::TimedOut(operation),
            SessionError::LoggedOutByRemote(_) => SessionFailure::LoggedOut,
            SessionError::TransientNetworkError(reason) => {
                SessionFailure::RetriesExhausted(reason.clone())
            }
            SessionError::Internal(reason) => SessionFailure::Crashed(reason.clone()),
            other => SessionFailure::Crashed(other.to_string()),
        }
    }
}
