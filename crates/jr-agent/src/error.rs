//! Journal adapter errors

use thiserror::Error;

/// Errors raised while building invocations or classifying journal output
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The `name:uid` user filter has no uid segment
    #[error("user field in filter is invalid: {0:?}")]
    InvalidUser(String),

    /// `__REALTIME_TIMESTAMP` is not an integer
    #[error("failed to parse timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    /// A journal output line is not a JSON object
    #[error("malformed journal record: {0}")]
    Record(#[from] serde_json::Error),

    /// The current user could not be resolved
    #[error("failed to look up user: {0}")]
    UserLookup(String),

    /// The release file names an OS flavor without known unit-list layout
    #[error("unsupported operating system: {0:?}")]
    UnsupportedOs(String),

    /// The release file could not be read
    #[error("failed to read {path}: {source}")]
    ReleaseFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
