//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The envelope or one of its payloads is not valid JSON
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// A message kind that requires a filter arrived without one
    #[error("Message of kind {0} carries no joptions")]
    MissingFilter(&'static str),

    /// The data payload does not have the shape its kind requires
    #[error("Unexpected payload for {kind}: {detail}")]
    UnexpectedPayload {
        kind: &'static str,
        detail: String,
    },
}
