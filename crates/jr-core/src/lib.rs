//! jr-core: Core abstractions and configuration for journal-relay
//!
//! This crate provides the shared configuration, error taxonomy, report
//! sink, process lifecycle, HTTP/TLS listener, WebSocket frame abstraction
//! and session registry used by both the agent and the relay server.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod report;
pub mod serve;
pub mod transport;
pub mod types;

pub use error::JrError;
pub use lifecycle::Lifecycle;
pub use registry::{Registry, Tracked};
pub use report::{Reporter, Severity};
pub use types::ClientId;
