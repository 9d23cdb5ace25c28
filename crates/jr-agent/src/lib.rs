//! jr-agent: Journal streaming agent
//!
//! The agent accepts WebSocket connections on `/ws/entry`, wraps a
//! `journalctl` child process per browser tab and turns its JSON output
//! into live records, paged results or unit listings.

pub mod collector;
pub mod error;
pub mod journal;
pub mod server;
pub mod session;

pub use collector::{LogCollector, SessionKind};
pub use error::AdapterError;
pub use session::{SessionTuning, StreamingSession};
