//! Double-hop WebSocket relay

mod connector;
mod faults;
mod session;

pub use connector::{ForwardHeaders, Scheme, TargetConnector, WsConnector};
pub use faults::CloseReasons;
pub use session::RelaySession;

use jr_core::Registry;

pub(crate) const MODULE: &str = "relay";

/// Heartbeat-swept index of live relays
pub type RelayRegistry = Registry<RelaySession>;
