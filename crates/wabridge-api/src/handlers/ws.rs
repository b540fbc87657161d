//! /ws/{owner_id} — push QR and status updates for one owner.
//!
//! The client first receives the current status (and QR, if one is
//! outstanding), then every update published for that owner until either
//! side closes. A client that falls behind skips the updates it missed.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use wabridge_core::{ConnectionStatus, OwnerKey};
use wabridge_services::SessionUpdate;

use super::{parse_owner, ApiError, ApiState, OwnerQuery};

pub async fn handle_ws(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path(owner_id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Response, ApiError> {
    let key = parse_owner(&owner_id, query.owner_type.as_deref())?;
    Ok(ws.on_upgrade(move |socket| stream_updates(socket, state, key)))
}

async fn stream_updates(socket: WebSocket, state: ApiState, key: OwnerKey) {
    let hub = state.manager.hub().clone();
    // Subscribe before taking the snapshot so nothing falls in between.
    let mut updates = hub.subscribe(&key);
    let (mut sink, mut incoming) = socket.split();
    tracing::debug!(owner = %key, "update subscriber connected");

    for update in current_updates(&state, &key) {
        if send(&mut sink, &update).await.is_err() {
            hub.prune(&key);
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => {
                    if send(&mut sink, &update).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(owner = %key, skipped, "subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(updates);
    hub.prune(&key);
    tracing::debug!(owner = %key, "update subscriber disconnected");
}

fn current_updates(state: &ApiState, key: &OwnerKey) -> Vec<SessionUpdate> {
    let Some(snapshot) = state.manager.status(key) else {
        return vec![SessionUpdate::status(key, ConnectionStatus::Disconnected, None)];
    };
    let message = snapshot.failure.as_ref().map(|f| f.describe());
    let mut out = vec![SessionUpdate::status(key, snapshot.status, message)];
    if let Some(qr) = snapshot.current_qr() {
        out.push(SessionUpdate::qr(key, qr));
    }
    out
}

async fn send(
    sink: &mut SplitSink<WebSocket, Message>,
    update: &SessionUpdate,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(update) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode session update");
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await
}
