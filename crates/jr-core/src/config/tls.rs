//! TLS listener settings shared by the agent and the relay server

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Serve HTTPS/WSS instead of plaintext when `https_enabled` is set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Terminate TLS on the listener
    pub https_enabled: bool,

    /// PEM certificate chain
    pub cert_file: PathBuf,

    /// PEM private key
    pub key_file: PathBuf,
}

impl TlsSettings {
    /// Settings for a TLS listener using the given PEM files
    pub fn enabled(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            https_enabled: true,
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        }
    }

    /// `X-Forwarded-Proto` value for connections accepted under these settings
    pub fn scheme(&self) -> &'static str {
        if self.https_enabled {
            "https"
        } else {
            "http"
        }
    }
}
