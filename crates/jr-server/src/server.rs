//! `/ws/proxy` WebSocket endpoint

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
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

use crate::relay::{ForwardHeaders, RelayRegistry, RelaySession, TargetConnector, MODULE};

/// Path of the relay endpoint
pub const PROXY_PATH: &str = "/ws/proxy";

/// Shared state of the relay server
pub struct ServerState {
    pub relays: Arc<RelayRegistry>,
    pub connector: Arc<dyn TargetConnector>,
    pub settle_delay: Duration,
    pub tls: TlsSettings,
    pub lifecycle: Lifecycle,
}

/// Build the relay router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route(PROXY_PATH, get(proxy_handler))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, over TLS when configured
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let tls = state.tls.clone();
    jr_core::serve::serve(listener, router(state), &tls, shutdown).await
}

async fn proxy_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<ServerState>>,
) -> Response {
    let id = ClientId::from_header(headers.get(CLIENT_ID_HEADER).and_then(|v| v.to_str().ok()));
    let forward = ForwardHeaders::from_request(&headers, peer, state.tls.scheme(), id.clone());
    let reporter = state.lifecycle.reporter().clone();

    ws.on_failed_upgrade(move |e| {
        reporter.error(
            MODULE,
            &format!("failed to upgrade client connection to WebSocket: {}", e),
        )
    })
    .on_upgrade(move |socket| async move {
        tracing::info!("relay client {} connected from {}", id, peer);

        let (sink, stream) = transport::from_axum(socket);
        let relay = RelaySession::new(
            id.clone(),
            sink,
            forward,
            Arc::clone(&state.connector),
            state.settle_delay,
            state.lifecycle.clone(),
        );

        if let Some(previous) = state.relays.add(id.clone(), Arc::clone(&relay)) {
            tracing::warn!("client {} reconnected, closing its previous relay", id);
            state.lifecycle.spawn(async move { previous.shutdown().await });
        }

        relay.serve(stream).await;
    })
}
