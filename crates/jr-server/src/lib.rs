//! jr-server: WebSocket relay between browsers and journal agents
//!
//! The server accepts browser connections on `/ws/proxy`, learns the
//! target agent from the first message, dials the agent's streaming
//! endpoint and splices both connections together.

pub mod error;
pub mod relay;
pub mod server;

pub use error::{DialError, RelayError, Side};
pub use relay::{ForwardHeaders, RelayRegistry, RelaySession, Scheme, TargetConnector, WsConnector};
