//! Reaching target agents
//!
//! Before dialing, the relay probes the agent with a plain HTTP request to
//! learn whether it serves TLS. A TLS agent either answers `400` asking for
//! HTTPS or drops the request; in the latter case an HTTPS request settles
//! it. The agent's streaming endpoint is then dialed over `ws://` or
//! `wss://` with the browser's forwarding headers.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::HOST;
use axum::http::HeaderMap;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{connect_async_tls_with_config, Connector};

use jr_core::config::ServerConfig;
use jr_core::transport::{self, FrameSink, FrameStream};
use jr_core::types::CLIENT_ID_HEADER;
use jr_core::ClientId;

use crate::error::DialError;

const FORWARDED_FOR: &str = "x-forwarded-for";
const FORWARDED_PROTO: &str = "x-forwarded-proto";
const FORWARDED_HOST: &str = "x-forwarded-host";

/// Transport a target agent speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `ws://`
    Plain,
    /// `wss://`
    Tls,
}

impl Scheme {
    /// Classify a probe answer. A TLS listener answers a plaintext request
    /// with `400` and a body asking for HTTPS.
    pub fn from_probe(status: u16, body: &str) -> Self {
        if status == 400 && body.contains("HTTPS") {
            Scheme::Tls
        } else {
            Scheme::Plain
        }
    }

    /// WebSocket URL of `path` on `addr`
    pub fn url(self, addr: &str, path: &str) -> String {
        match self {
            Scheme::Plain => format!("ws://{}{}", addr, path),
            Scheme::Tls => format!("wss://{}{}", addr, path),
        }
    }
}

/// Headers passed from the browser's upgrade request to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardHeaders {
    pub forwarded_for: String,
    pub forwarded_proto: &'static str,
    pub forwarded_host: Option<String>,
    pub client_id: ClientId,
}

impl ForwardHeaders {
    /// Derive the forwarding headers of an accepted upgrade request.
    ///
    /// The browser's address is appended to any `X-Forwarded-For` chain it
    /// arrived with; `proto` is the scheme of the listener that accepted it.
    pub fn from_request(
        headers: &HeaderMap,
        peer: SocketAddr,
        proto: &'static str,
        client_id: ClientId,
    ) -> Self {
        let prior: Vec<&str> = headers
            .get_all(FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let forwarded_for = if prior.is_empty() {
            peer.to_string()
        } else {
            format!("{}, {}", prior.join(", "), peer)
        };

        Self {
            forwarded_for,
            forwarded_proto: proto,
            forwarded_host: headers
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            client_id,
        }
    }

    fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = vec![
            (FORWARDED_FOR, self.forwarded_for.as_str()),
            (FORWARDED_PROTO, self.forwarded_proto),
            (CLIENT_ID_HEADER, self.client_id.as_str()),
        ];
        if let Some(host) = &self.forwarded_host {
            pairs.push((FORWARDED_HOST, host.as_str()));
        }
        pairs
    }
}

/// Probes and dials target agents
#[async_trait]
pub trait TargetConnector: Send + Sync + 'static {
    /// Find out which transport the agent at `addr` speaks
    async fn probe(&self, addr: &str) -> Result<Scheme, DialError>;

    /// Open the agent's streaming endpoint
    async fn dial(
        &self,
        addr: &str,
        scheme: Scheme,
        headers: &ForwardHeaders,
    ) -> Result<(FrameSink, FrameStream), DialError>;
}

/// Network connector: `reqwest` probe, `tokio-tungstenite` dial
pub struct WsConnector {
    http: reqwest::Client,
    tls: native_tls::TlsConnector,
    entry_path: String,
    handshake_timeout: Duration,
}

impl WsConnector {
    /// Build a connector from the server configuration.
    ///
    /// Agents commonly run with self-signed certificates, so certificate
    /// verification is disabled for probes and dials.
    pub fn new(config: &ServerConfig) -> Result<Self, DialError> {
        let http = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;

        Ok(Self {
            http,
            tls,
            entry_path: config.entry_path.clone(),
            handshake_timeout: config.handshake_timeout,
        })
    }
}

#[async_trait]
impl TargetConnector for WsConnector {
    async fn probe(&self, addr: &str) -> Result<Scheme, DialError> {
        let response = match self.http.get(format!("http://{}/", addr)).send().await {
            Ok(response) => response,
            Err(plain) => {
                // rustls listeners drop plaintext requests instead of answering 400
                return match self.http.get(format!("https://{}/", addr)).send().await {
                    Ok(response) => {
                        tracing::debug!("probe of {} answered {} over TLS", addr, response.status());
                        Ok(Scheme::Tls)
                    }
                    Err(_) => Err(DialError::Probe(plain.to_string())),
                };
            }
        };

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let scheme = Scheme::from_probe(status, &body);
        tracing::debug!("probe of {} answered {}: {:?}", addr, status, scheme);
        Ok(scheme)
    }

    async fn dial(
        &self,
        addr: &str,
        scheme: Scheme,
        headers: &ForwardHeaders,
    ) -> Result<(FrameSink, FrameStream), DialError> {
        let url = scheme.url(addr, &self.entry_path);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| DialError::Handshake(e.to_string()))?;

        for (name, value) in headers.pairs() {
            let value = HeaderValue::from_str(value).map_err(|e| DialError::Header {
                name,
                detail: e.to_string(),
            })?;
            request
                .headers_mut()
                .insert(HeaderName::from_static(name), value);
        }

        let connecting = connect_async_tls_with_config(
            request,
            None,
            false,
            Some(Connector::NativeTls(self.tls.clone())),
        );
        let (socket, _) = tokio::time::timeout(self.handshake_timeout, connecting)
            .await
            .map_err(|_| DialError::Timeout(url.clone()))?
            .map_err(|e| DialError::Handshake(e.to_string()))?;

        tracing::info!("dialed target {}", url);
        Ok(transport::from_tungstenite(socket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue as AxumHeaderValue;

    #[test]
    fn test_scheme_from_probe() {
        assert_eq!(
            Scheme::from_probe(400, "Client sent an HTTP request to an HTTPS server.\n"),
            Scheme::Tls
        );
        assert_eq!(Scheme::from_probe(400, "bad request"), Scheme::Plain);
        assert_eq!(Scheme::from_probe(404, "HTTPS"), Scheme::Plain);
        assert_eq!(Scheme::from_probe(200, ""), Scheme::Plain);
    }

    #[test]
    fn test_scheme_url() {
        assert_eq!(
            Scheme::Plain.url("10.0.0.5:9995", "/ws/entry"),
            "ws://10.0.0.5:9995/ws/entry"
        );
        assert_eq!(
            Scheme::Tls.url("agent:9995", "/ws/entry"),
            "wss://agent:9995/ws/entry"
        );
    }

    #[test]
    fn test_forward_headers_appends_peer() {
        let peer: SocketAddr = "192.168.1.7:51000".parse().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(HOST, AxumHeaderValue::from_static("console:9994"));
        let fwd = ForwardHeaders::from_request(&headers, peer, "http", "tab".into());
        assert_eq!(fwd.forwarded_for, "192.168.1.7:51000");
        assert_eq!(fwd.forwarded_host.as_deref(), Some("console:9994"));
        assert_eq!(fwd.forwarded_proto, "http");

        headers.insert(FORWARDED_FOR, AxumHeaderValue::from_static("10.1.1.1"));
        let fwd = ForwardHeaders::from_request(&headers, peer, "https", "tab".into());
        assert_eq!(fwd.forwarded_for, "10.1.1.1, 192.168.1.7:51000");
        assert_eq!(fwd.forwarded_proto, "https");
    }

    #[test]
    fn test_forward_header_pairs() {
        let fwd = ForwardHeaders {
            forwarded_for: "1.2.3.4:5".into(),
            forwarded_proto: "http",
            forwarded_host: None,
            client_id: "tab-9".into(),
        };
        let pairs = fwd.pairs();
        assert!(pairs.contains(&(CLIENT_ID_HEADER, "tab-9")));
        assert!(!pairs.iter().any(|(name, _)| *name == FORWARDED_HOST));
    }

    #[tokio::test]
    async fn test_probe_plain_http_target() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, axum::Router::new()).await.unwrap();
        });

        let connector = WsConnector::new(&ServerConfig::default()).unwrap();
        let scheme = connector.probe(&addr.to_string()).await.unwrap();
        assert_eq!(scheme, Scheme::Plain);
    }

    #[tokio::test]
    async fn test_probe_tls_target() {
        let dir = tempfile::tempdir().unwrap();
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_file = dir.path().join("agent.crt");
        let key_file = dir.path().join("agent.key");
        std::fs::write(&cert_file, certified.cert.pem()).unwrap();
        std::fs::write(&key_file, certified.key_pair.serialize_pem()).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tls = jr_core::config::TlsSettings::enabled(cert_file, key_file);
        tokio::spawn(async move {
            jr_core::serve::serve(
                listener,
                axum::Router::new(),
                &tls,
                tokio_util::sync::CancellationToken::new(),
            )
            .await
            .unwrap();
        });

        let connector = WsConnector::new(&ServerConfig::default()).unwrap();
        let scheme = connector.probe(&addr.to_string()).await.unwrap();
        assert_eq!(scheme, Scheme::Tls);
    }

    #[tokio::test]
    async fn test_probe_unreachable_target() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WsConnector::new(&ServerConfig::default()).unwrap();
        let err = connector.probe(&addr.to_string()).await.unwrap_err();
        assert!(matches!(err, DialError::Probe(_)));
    }
}
