//! `/ws/entry` WebSocket endpoint

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use jr_core::config::TlsSettings;
use jr_core::transport;
use jr_core::types::CLIENT_ID_HEADER;
use jr_core::{ClientId, Lifecycle, Tracked};

use crate::collector::{LogCollector, SessionKind};
use crate::session::{SessionTuning, StreamingSession};

/// Path of the streaming endpoint
pub const ENTRY_PATH: &str = "/ws/entry";

/// Shared state of the agent's HTTP server
pub struct AgentState {
    pub collector: Arc<LogCollector>,
    pub tuning: SessionTuning,
    pub tls: TlsSettings,
    pub lifecycle: Lifecycle,
}

/// Build the agent router
pub fn router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route(ENTRY_PATH, get(entry_handler))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, over TLS when configured
pub async fn serve(
    listener: TcpListener,
    state: Arc<AgentState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let tls = state.tls.clone();
    jr_core::serve::serve(listener, router(state), &tls, shutdown).await
}

async fn entry_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AgentState>>,
) -> Response {
    let id = ClientId::from_header(headers.get(CLIENT_ID_HEADER).and_then(|v| v.to_str().ok()));
    let peer = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("direct")
        .to_string();

    ws.on_failed_upgrade(|e| tracing::error!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| async move {
            tracing::info!("connected to ws client {} ({})", id, peer);

            let (sink, stream) = transport::from_axum(socket);
            let session = StreamingSession::new(
                id.clone(),
                sink,
                stream,
                state.tuning.clone(),
                state.lifecycle.clone(),
            );

            if let Some(previous) =
                state
                    .collector
                    .add(SessionKind::Journald, id.clone(), Arc::clone(&session))
            {
                tracing::warn!("client {} reconnected, closing its previous session", id);
                state.lifecycle.spawn(async move { previous.shutdown().await });
            }

            session.run().await;
        })
}
