//! /api/whatsapp session handlers.

use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use wabridge_core::{ConnectionStatus, OwnerKey, OwnerType, SessionError};
use wabridge_services::SessionState;

use super::{parse_owner, ApiError, ApiState, OwnerQuery};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

impl AckResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

// ── /initialize/{owner_id} (POST) ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub owner_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub success: bool,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
    pub qr_message: String,
}

impl InitializeResponse {
    fn from_state(state: &SessionState) -> Self {
        let qr = state.current_qr();
        let qr_message = match (state.status, qr) {
            (_, Some(_)) => "Scan the QR code with WhatsApp on your phone".to_string(),
            (ConnectionStatus::Connected, None) => "WhatsApp is already connected".to_string(),
            (ConnectionStatus::Failed | ConnectionStatus::Closed, None) => state
                .failure
                .as_ref()
                .map(|f| f.describe())
                .unwrap_or_else(|| "session ended".to_string()),
            _ => "QR code not ready yet, poll /qr for it".to_string(),
        };
        Self {
            success: !state.status.is_terminal(),
            status: state.status,
            qr_code: qr.map(|q| q.data_url.clone()),
            expires_in_secs: qr.map(|q| q.expires_in().as_secs()),
            qr_message,
        }
    }
}

/// Start (or reuse) the owner's session and wait briefly for its first QR.
pub async fn handle_initialize(
    State(state): State<ApiState>,
    Path(owner_id): Path<String>,
    body: Option<Json<InitializeRequest>>,
) -> Result<Json<InitializeResponse>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let key = parse_owner(&owner_id, req.owner_type.as_deref())?;

    match state.manager.initialize(key.clone()).await {
        Ok(_) => {}
        Err(SessionError::SessionAlreadyActive { status, .. }) => {
            tracing::debug!(owner = %key, %status, "reusing active session");
        }
        Err(e) => return Err(e.into()),
    }

    if let Some(mut rx) = state.manager.watch(&key) {
        let first_result = rx.wait_for(|s| {
            s.current_qr().is_some()
                || matches!(
                    s.status,
                    ConnectionStatus::Connected | ConnectionStatus::Failed | ConnectionStatus::Closed
                )
        });
        let _ = tokio::time::timeout(state.initial_qr_wait, first_result).await;
    }

    let snapshot = state
        .manager
        .status(&key)
        .ok_or_else(|| SessionError::SessionNotFound(key.clone()))?;
    Ok(Json(InitializeResponse::from_state(&snapshot)))
}

// ── /qr/{owner_id} (GET) ──────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrResponse {
    pub success: bool,
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
    pub message: String,
}

/// Current unexpired QR as a PNG data URL. Never waits.
pub async fn handle_qr(
    State(state): State<ApiState>,
    Path(owner_id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<QrResponse>, ApiError> {
    let key = parse_owner(&owner_id, query.owner_type.as_deref())?;
    let response = match state.manager.qr_code(&key) {
        Some(qr) => QrResponse {
            success: true,
            expires_in_secs: Some(qr.expires_in().as_secs()),
            data: Some(qr.data_url),
            message: "QR code available".to_string(),
        },
        None => QrResponse {
            success: false,
            data: None,
            expires_in_secs: None,
            message: "QR code not available".to_string(),
        },
    };
    Ok(Json(response))
}

// ── /status/{owner_id} (GET) ──────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub status: ConnectionStatus,
    pub owner_id: String,
    pub owner_type: OwnerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub retry_count: u32,
    pub has_qr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub async fn handle_status(
    State(state): State<ApiState>,
    Path(owner_id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let key = parse_owner(&owner_id, query.owner_type.as_deref())?;
    let response = match state.manager.status(&key) {
        Some(snapshot) => StatusResponse {
            success: true,
            status: snapshot.status,
            owner_id: key.owner_id().to_string(),
            owner_type: key.owner_type(),
            has_qr: snapshot.current_qr().is_some(),
            phone_number: snapshot.phone_number,
            retry_count: snapshot.retry_count,
            last_error: snapshot.failure.map(|f| f.describe()),
        },
        None => StatusResponse {
            success: true,
            status: ConnectionStatus::Disconnected,
            owner_id: key.owner_id().to_string(),
            owner_type: key.owner_type(),
            phone_number: state.manager.meta().get(&key).and_then(|r| r.phone_number),
            retry_count: 0,
            has_qr: false,
            last_error: None,
        },
    };
    Ok(Json(response))
}

// ── /disconnect, /logout, /session ────────────────────────────────────────────

pub async fn handle_disconnect(
    State(state): State<ApiState>,
    Path(owner_id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<AckResponse>, ApiError> {
    let key = parse_owner(&owner_id, query.owner_type.as_deref())?;
    state.manager.disconnect(&key).await?;
    Ok(AckResponse::ok("session disconnected"))
}

pub async fn handle_logout(
    State(state): State<ApiState>,
    Path(owner_id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<AckResponse>, ApiError> {
    let key = parse_owner(&owner_id, query.owner_type.as_deref())?;
    state.manager.logout(&key).await?;
    Ok(AckResponse::ok("logged out"))
}

pub async fn handle_cleanup(
    State(state): State<ApiState>,
    Path(owner_id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<AckResponse>, ApiError> {
    let key = parse_owner(&owner_id, query.owner_type.as_deref())?;
    state.manager.cleanup(&key).await?;
    Ok(AckResponse::ok("session removed"))
}

// ── /send/{owner_id} (POST) ───────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub owner_type: Option<String>,
    pub to: String,
    pub text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message_id: String,
}

pub async fn handle_send(
    State(state): State<ApiState>,
    Path(owner_id): Path<String>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let key = parse_owner(&owner_id, req.owner_type.as_deref())?;
    if req.to.trim().is_empty() || req.text.is_empty() {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "`to` and `text` are required",
        ));
    }
    let message_id = state.manager.send_text(&key, req.to.trim(), &req.text).await?;
    tracing::info!(owner = %key, %message_id, "message sent via API");
    Ok(Json(SendResponse {
        success: true,
        message_id,
    }))
}

// ── /sessions (GET) ───────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub owner_id: String,
    pub owner_type: OwnerType,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// False for owners only known from the metadata store.
    pub live: bool,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

#[derive(Serialize)]
pub struct SessionsResponse {
    pub success: bool,
    pub sessions: Vec<SessionSummary>,
}

pub async fn handle_sessions(State(state): State<ApiState>) -> Json<SessionsResponse> {
    let mut seen: HashSet<OwnerKey> = HashSet::new();
    let mut sessions: Vec<SessionSummary> = state
        .manager
        .list()
        .into_iter()
        .map(|handle| {
            let key = handle.key().clone();
            let snapshot = handle.snapshot();
            let summary = SessionSummary {
                owner_id: key.owner_id().to_string(),
                owner_type: key.owner_type(),
                status: snapshot.status,
                phone_number: snapshot.phone_number,
                live: true,
                retry_count: snapshot.retry_count,
                updated_at: state.manager.meta().get(&key).map(|r| r.updated_at),
            };
            seen.insert(key);
            summary
        })
        .collect();

    for record in state.manager.meta().list() {
        let Ok(key) = OwnerKey::new(&record.owner_id, record.owner_type) else {
            continue;
        };
        if seen.contains(&key) {
            continue;
        }
        sessions.push(SessionSummary {
            owner_id: record.owner_id,
            owner_type: record.owner_type,
            status: record.status,
            phone_number: record.phone_number,
            live: false,
            retry_count: 0,
            updated_at: Some(record.updated_at),
        });
    }

    sessions.sort_by(|a, b| {
        (a.owner_type, &a.owner_id).cmp(&(b.owner_type, &b.owner_id))
    });
    Json(SessionsResponse {
        success: true,
        sessions,
    })
}
