//! Core error types for journal-relay

use jr_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the journal-relay ecosystem
#[derive(Error, Debug)]
pub enum JrError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// WebSocket transport errors
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The connection has already been closed locally
    #[error("Connection already closed")]
    Closed,

    /// The underlying WebSocket failed
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Streaming session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// The log reader could not be started
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A pipe of the log reader was not available
    #[error("Failed to acquire {0} pipe")]
    Pipe(&'static str),

    /// The log reader exited on its own with a failure status
    #[error("{program} exited abnormally with code {code}")]
    AbnormalExit { program: String, code: i32 },

    /// Reading the log reader's output failed
    #[error("Failed to read {stream}: {source}")]
    Read {
        stream: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The log reader printed a diagnostic line
    #[error("{0}")]
    Stderr(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
