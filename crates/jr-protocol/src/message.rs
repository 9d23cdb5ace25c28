//! Message types for the journal relay protocol
//!
//! Every WebSocket text frame carries one JSON envelope:
//!
//! ```text
//! {"type": <kind>, "joptions": <Filter>?, "data": <payload>?}
//! ```
//!
//! # Message Flow
//!
//! 1. Browser connects to the relay and sends `AgentAddress`
//! 2. Relay dials the agent and answers `Connected` (or `DialFailed`)
//! 3. Browser sends `ListUnits` and `UpdateFilter`, which the relay forwards
//! 4. Agent answers with `Data` messages
//! 5. In paged mode the browser walks the result with `UpdatePage`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::filter::Filter;
use crate::payload::DataPayload;

/// Message kind identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Replace the session's query (client to agent)
    UpdateFilter = 0,
    /// Target agent address (client to relay)
    AgentAddress = 1,
    /// Enumerate service units (client to agent)
    ListUnits = 2,
    /// Relay reached the agent (relay to client)
    Connected = 3,
    /// Query output (agent to client)
    Data = 4,
    /// Request another page of a buffered result (client to agent)
    UpdatePage = 5,
    /// Relay could not reach the agent (relay to client)
    DialFailed = 6,
}

impl MessageKind {
    /// Convert to the wire integer
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from the wire integer
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::UpdateFilter),
            1 => Some(Self::AgentAddress),
            2 => Some(Self::ListUnits),
            3 => Some(Self::Connected),
            4 => Some(Self::Data),
            5 => Some(Self::UpdatePage),
            6 => Some(Self::DialFailed),
            _ => None,
        }
    }

    /// Human readable name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateFilter => "update-filter",
            Self::AgentAddress => "agent-address",
            Self::ListUnits => "list-units",
            Self::Connected => "connected",
            Self::Data => "data",
            Self::UpdatePage => "update-page",
            Self::DialFailed => "dial-failed",
        }
    }
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Apply a new query
    UpdateFilter(Filter),
    /// Address (`host:port`) of the agent to relay to
    AgentAddress(String),
    /// Request the unit listing
    ListUnits,
    /// Relay acknowledgment
    Connected,
    /// Query output; `None` means the log reader failed
    Data(Option<DataPayload>),
    /// Request the page `[from, from + size)` of the buffered result
    UpdatePage { from: i64, size: i64 },
    /// Relay could not reach the requested agent
    DialFailed,
    /// A kind this build does not know
    Unknown(i64),
}

/// Raw wire envelope
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    joptions: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl Message {
    /// The kind of this message, `None` for unknown kinds
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::UpdateFilter(_) => Some(MessageKind::UpdateFilter),
            Self::AgentAddress(_) => Some(MessageKind::AgentAddress),
            Self::ListUnits => Some(MessageKind::ListUnits),
            Self::Connected => Some(MessageKind::Connected),
            Self::Data(_) => Some(MessageKind::Data),
            Self::UpdatePage { .. } => Some(MessageKind::UpdatePage),
            Self::DialFailed => Some(MessageKind::DialFailed),
            Self::Unknown(_) => None,
        }
    }

    /// The integer carried in the envelope's `type` field
    pub fn wire_kind(&self) -> i64 {
        match self {
            Self::Unknown(kind) => *kind,
            known => known.kind().map(|k| k.as_u8() as i64).unwrap_or_default(),
        }
    }

    /// Decode a message from a text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_envelope(envelope)
    }

    /// Decode a message from a binary frame
    pub fn decode_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        Self::from_envelope(envelope)
    }

    /// Encode the message as a JSON text frame
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&self.to_envelope()?)?)
    }

    fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let Some(kind) = MessageKind::from_i64(envelope.kind) else {
            return Ok(Self::Unknown(envelope.kind));
        };

        let message = match kind {
            MessageKind::UpdateFilter => Self::UpdateFilter(
                envelope
                    .joptions
                    .ok_or(ProtocolError::MissingFilter(kind.name()))?,
            ),
            MessageKind::AgentAddress => match envelope.data {
                Some(Value::String(addr)) => Self::AgentAddress(addr),
                other => {
                    return Err(ProtocolError::UnexpectedPayload {
                        kind: kind.name(),
                        detail: format!("expected address string, got {:?}", other),
                    })
                }
            },
            MessageKind::ListUnits => Self::ListUnits,
            MessageKind::Connected => Self::Connected,
            MessageKind::Data => match envelope.data {
                None | Some(Value::Null) => Self::Data(None),
                Some(value) => Self::Data(Some(serde_json::from_value(value).map_err(|e| {
                    ProtocolError::UnexpectedPayload {
                        kind: kind.name(),
                        detail: e.to_string(),
                    }
                })?)),
            },
            MessageKind::UpdatePage => {
                let filter = envelope
                    .joptions
                    .ok_or(ProtocolError::MissingFilter(kind.name()))?;
                Self::UpdatePage {
                    from: filter.from,
                    size: filter.size,
                }
            }
            MessageKind::DialFailed => Self::DialFailed,
        };
        Ok(message)
    }

    fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        let mut envelope = Envelope {
            kind: self.wire_kind(),
            joptions: None,
            data: None,
        };
        match self {
            Self::UpdateFilter(filter) => envelope.joptions = Some(filter.clone()),
            Self::AgentAddress(addr) => envelope.data = Some(Value::String(addr.clone())),
            Self::Data(payload) => {
                envelope.data = Some(match payload {
                    Some(payload) => serde_json::to_value(payload)?,
                    None => Value::Null,
                })
            }
            Self::UpdatePage { from, size } => {
                envelope.joptions = Some(Filter {
                    from: *from,
                    size: *size,
                    ..Filter::default()
                })
            }
            Self::ListUnits | Self::Connected | Self::DialFailed | Self::Unknown(_) => {}
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{LogRecord, Page};

    #[test]
    fn test_kind_roundtrip() {
        for value in 0..=6 {
            let kind = MessageKind::from_i64(value).unwrap();
            assert_eq!(kind.as_u8() as i64, value);
        }
        assert!(MessageKind::from_i64(7).is_none());
        assert!(MessageKind::from_i64(-1).is_none());
    }

    #[test]
    fn test_decode_update_filter() {
        let msg = Message::decode(r#"{"type":0,"joptions":{"unit":"sshd","notail":false}}"#)
            .unwrap();
        assert_eq!(msg, Message::UpdateFilter(Filter::follow_unit("sshd")));
    }

    #[test]
    fn test_decode_update_filter_without_joptions_fails() {
        let err = Message::decode(r#"{"type":0}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingFilter("update-filter")));
    }

    #[test]
    fn test_decode_agent_address() {
        let msg = Message::decode(r#"{"type":1,"data":"10.0.0.5:9995"}"#).unwrap();
        assert_eq!(msg, Message::AgentAddress("10.0.0.5:9995".into()));

        let err = Message::decode(r#"{"type":1,"data":42}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedPayload { .. }));
    }

    #[test]
    fn test_decode_update_page() {
        let msg = Message::decode(r#"{"type":5,"joptions":{"from":10,"size":10}}"#).unwrap();
        assert_eq!(msg, Message::UpdatePage { from: 10, size: 10 });
    }

    #[test]
    fn test_decode_unknown_kind_is_not_an_error() {
        let msg = Message::decode(r#"{"type":42,"data":{"x":1}}"#).unwrap();
        assert_eq!(msg, Message::Unknown(42));
        assert!(msg.kind().is_none());
    }

    #[test]
    fn test_decode_malformed_json() {
        assert!(matches!(
            Message::decode("{not json").unwrap_err(),
            ProtocolError::Json(_)
        ));
        assert!(Message::decode_slice(b"[]").is_err());
    }

    #[test]
    fn test_encode_data_null_means_failure() {
        let text = Message::Data(None).encode().unwrap();
        assert_eq!(text, r#"{"type":4,"data":null}"#);
        assert_eq!(Message::decode(&text).unwrap(), Message::Data(None));
    }

    #[test]
    fn test_encode_page() {
        let page = Page {
            total: 25,
            hits: vec![LogRecord {
                message: Some("m".into()),
                ..Default::default()
            }],
        };
        let text = Message::Data(Some(page.clone().into())).encode().unwrap();
        assert_eq!(text, r#"{"type":4,"data":{"total":25,"hits":[{"message":"m"}]}}"#);
        assert_eq!(
            Message::decode(&text).unwrap(),
            Message::Data(Some(DataPayload::Page(page)))
        );
    }

    #[test]
    fn test_encode_bare_kinds() {
        assert_eq!(Message::Connected.encode().unwrap(), r#"{"type":3}"#);
        assert_eq!(Message::DialFailed.encode().unwrap(), r#"{"type":6}"#);
        assert_eq!(Message::ListUnits.encode().unwrap(), r#"{"type":2}"#);
    }
}
