pub mod handlers;

use std::net::SocketAddr;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::{ApiError, ApiState};

/// All routes, nested under `/api/whatsapp`.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let whatsapp_routes = Router::new()
        .route("/initialize/{owner_id}", post(handlers::handle_initialize))
        .route("/qr/{owner_id}", get(handlers::handle_qr))
        .route("/status/{owner_id}", get(handlers::handle_status))
        .route("/disconnect/{owner_id}", post(handlers::handle_disconnect))
        .route("/logout/{owner_id}", post(handlers::handle_logout))
        .route("/session/{owner_id}", delete(handlers::handle_cleanup))
        .route("/send/{owner_id}", post(handlers::handle_send))
        .route("/sessions", get(handlers::handle_sessions))
        .route("/ws/{owner_id}", get(handlers::handle_ws))
        .with_state(state);

    Router::new()
        .nest("/api/whatsapp", whatsapp_routes)
        .layer(cors)
}

pub async fn serve(state: ApiState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(listener, state).await
}

/// Serve on an already-bound listener (port 0 in tests).
pub async fn serve_listener(listener: TcpListener, state: ApiState) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
