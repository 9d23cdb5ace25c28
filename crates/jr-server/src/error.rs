//! Relay error types

use std::fmt;

use jr_core::error::TransportError;
use jr_protocol::ProtocolError;
use thiserror::Error;

/// One leg of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The browser connection
    Client,
    /// The connection to the agent
    Target,
}

impl Side {
    /// The opposite leg
    pub fn peer(self) -> Self {
        match self {
            Side::Client => Side::Target,
            Side::Target => Side::Client,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// Failure to reach a target agent
#[derive(Error, Debug)]
pub enum DialError {
    /// The plaintext/TLS probe got no answer
    #[error("fail to detect remote http/https: {0}")]
    Probe(String),

    /// The WebSocket handshake failed
    #[error("dial to target WebSocket failed: {0}")]
    Handshake(String),

    /// The WebSocket handshake did not finish in time
    #[error("dial to {0} timed out")]
    Timeout(String),

    /// A forwarded header could not be encoded
    #[error("invalid forwarded header {name}: {detail}")]
    Header { name: &'static str, detail: String },

    /// The TLS connector could not be built
    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    /// The probe HTTP client could not be built
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// Conditions observed by a relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// The browser's first message was not an agent address
    #[error("the first message must be the agent address, got type {0}")]
    FirstMessage(i64),

    /// A message from the browser could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The target could not be reached
    #[error(transparent)]
    Dial(#[from] DialError),

    /// Reading a leg failed
    #[error("error while reading {side}: {source}")]
    Read {
        side: Side,
        #[source]
        source: TransportError,
    },

    /// Writing to a leg failed
    #[error("error while writing {side}: {source}")]
    Write {
        side: Side,
        #[source]
        source: TransportError,
    },

    /// A leg closed, with or without a close handshake
    #[error("websocket {side} conn closed: {reason}")]
    Closed { side: Side, reason: String },
}

impl RelayError {
    /// Whether this is an expected condition rather than a failure
    pub fn is_clean_close(&self) -> bool {
        matches!(self, RelayError::Closed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_peer() {
        assert_eq!(Side::Client.peer(), Side::Target);
        assert_eq!(Side::Target.peer(), Side::Client);
    }

    #[test]
    fn test_error_messages() {
        let err = RelayError::FirstMessage(0);
        assert_eq!(
            err.to_string(),
            "the first message must be the agent address, got type 0"
        );

        let err = RelayError::from(DialError::Probe("connection refused".into()));
        assert!(err.to_string().contains("http/https"));
        assert!(!err.is_clean_close());

        let err = RelayError::Closed {
            side: Side::Target,
            reason: "close 1000".into(),
        };
        assert!(err.is_clean_close());
        assert!(err.to_string().starts_with("websocket target"));
    }
}
