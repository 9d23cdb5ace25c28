//! HTTP listener shared by the agent and the relay server
//!
//! Plaintext listeners go through `axum::serve`; TLS listeners through
//! `axum-server` with a rustls acceptor. Both expose the peer address as
//! `ConnectInfo<SocketAddr>`.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::TlsSettings;

/// How long a TLS listener waits for open connections after shutdown
const TLS_DRAIN: Duration = Duration::from_secs(5);

/// Serve `app` on `listener` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    app: Router,
    tls: &TlsSettings,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if !tls.https_enabled {
        return axum::serve(listener, make_service)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
    }

    let config = load_rustls(tls).await?;
    let handle = axum_server::Handle::new();
    let stop = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        stop.graceful_shutdown(Some(TLS_DRAIN));
    });

    axum_server::from_tcp_rustls(listener.into_std()?, config)
        .handle(handle)
        .serve(make_service)
        .await
}

async fn load_rustls(tls: &TlsSettings) -> std::io::Result<RustlsConfig> {
    // ring is the only compiled-in provider; a repeated install is a no-op
    let _ = rustls::crypto::ring::default_provider().install_default();
    RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
        .await
        .map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "failed to load TLS identity from {:?} and {:?}: {}",
                    tls.cert_file, tls.key_file, e
                ),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[tokio::test]
    async fn test_missing_tls_identity_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tls = TlsSettings::enabled(dir.path().join("agent.crt"), dir.path().join("agent.key"));

        let err = serve(listener, Router::new(), &tls, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("agent.crt"), "{}", err);
    }

    #[tokio::test]
    async fn test_plaintext_serve_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let app = Router::new().route("/", get(|| async { "ok" }));

        let server = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { serve(listener, app, &TlsSettings::default(), shutdown).await }
        });

        let body = raw_get(addr).await;
        assert!(body.contains("ok"), "{}", body);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    async fn raw_get(addr: SocketAddr) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }
}
