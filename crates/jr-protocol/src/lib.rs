//! jr-protocol: Wire protocol for journal streaming and relaying
//!
//! This crate defines the JSON envelope exchanged between the browser,
//! the relay server and the agent over WebSocket connections.

pub mod error;
pub mod filter;
pub mod message;
pub mod payload;

pub use error::ProtocolError;
pub use filter::Filter;
pub use message::{Message, MessageKind};
pub use payload::{DataPayload, LogRecord, Page, UnitMap};
