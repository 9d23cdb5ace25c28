//! Relay server configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use super::TlsSettings;

/// Configuration for the relay server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the `/ws/proxy` endpoint listens on
    pub listen_address: String,

    /// Interval of the inactive-relay sweep
    #[serde(with = "duration_secs")]
    pub heartbeat_period: Duration,

    /// Timeout of the plaintext/TLS probe against a target agent
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Timeout of the WebSocket handshake with a target agent
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Path of the agent's streaming endpoint
    pub entry_path: String,

    /// Pause at the end of a full relay teardown
    #[serde(with = "duration_millis")]
    pub settle_delay: Duration,

    /// `https_enabled`, `cert_file` and `key_file` of the `/ws/proxy` listener
    #[serde(flatten)]
    pub tls: TlsSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:9994".to_string(),
            heartbeat_period: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(45),
            entry_path: "/ws/entry".to_string(),
            settle_delay: Duration::from_millis(100),
            tls: TlsSettings::default(),
        }
    }
}
