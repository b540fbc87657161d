//! HTTP API handlers — expose the session manager as JSON.

pub mod sessions;
pub mod ws;

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use wabridge_core::{OwnerError, OwnerKey, OwnerType, SessionError};
use wabridge_services::SessionManager;

#[derive(Clone)]
pub struct ApiState {
    pub manager: SessionManager,
    /// How long POST /initialize waits for the first QR or connection.
    pub initial_qr_wait: Duration,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Error body: `{ "success": false, "message": ... }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            SessionError::SessionAlreadyActive { .. }
            | SessionError::NotConnected { .. }
            | SessionError::LoggedOutByRemote(_)
            | SessionError::Cancelled(_) => StatusCode::CONFLICT,
            SessionError::TransientNetworkError(_) => StatusCode::BAD_GATEWAY,
            SessionError::OperationTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            SessionError::AuthStateCorrupt { .. }
            | SessionError::Internal(_)
            | SessionError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(error = %err, "request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl From<OwnerError> for ApiError {
    fn from(err: OwnerError) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "message": self.message }));
        (self.status, body).into_response()
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// `?ownerType=coach|staff`; coach when absent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerQuery {
    pub owner_type: Option<String>,
}

fn parse_owner(owner_id: &str, owner_type: Option<&str>) -> Result<OwnerKey, ApiError> {
    let owner_type = match owner_type {
        Some(raw) => raw.parse::<OwnerType>()?,
        None => OwnerType::default(),
    };
    Ok(OwnerKey::new(owner_id, owner_type)?)
}

pub use sessions::{
    handle_cleanup, handle_disconnect, handle_initialize, handle_logout, handle_qr, handle_send,
    handle_sessions, handle_status,
};
pub use ws::handle_ws;
