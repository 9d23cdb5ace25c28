//! Data payload shapes carried by `data` messages

use serde::{Deserialize, Serialize};

/// One journal record in the shape the browser renders.
///
/// Absent source fields stay absent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Millisecond epoch as a decimal string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Journal priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Message text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unit name or syslog identifier, depending on transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targetname: Option<String>,
}

/// One page of a paged query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Number of records in the whole buffered result
    pub total: usize,
    /// Records of the requested page, ascending by timestamp
    pub hits: Vec<LogRecord>,
}

/// Selectable filter values offered to the browser
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMap {
    /// Known `name:uid` users
    pub user: Vec<String>,
    /// Transport classes beyond the default journal transport
    pub transport: Vec<String>,
    /// Active service unit names without the `.service` suffix
    pub systemd: Vec<String>,
}

/// Payload of a `data` message, distinguished by shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataPayload {
    /// Paged query result
    Page(Page),
    /// Unit listing
    Units(UnitMap),
    /// A single live record
    Record(LogRecord),
}

impl From<LogRecord> for DataPayload {
    fn from(record: LogRecord) -> Self {
        Self::Record(record)
    }
}

impl From<Page> for DataPayload {
    fn from(page: Page) -> Self {
        Self::Page(page)
    }
}

impl From<UnitMap> for DataPayload {
    fn from(units: UnitMap) -> Self {
        Self::Units(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_omits_missing_fields() {
        let record = LogRecord {
            message: Some("hello".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"message":"hello"}"#);
    }

    #[test]
    fn test_payload_shapes_are_distinguished() {
        let page: DataPayload = serde_json::from_str(r#"{"total":3,"hits":[]}"#).unwrap();
        assert!(matches!(page, DataPayload::Page(Page { total: 3, .. })));

        let units: DataPayload =
            serde_json::from_str(r#"{"user":["root:0"],"transport":[],"systemd":["sshd"]}"#)
                .unwrap();
        assert!(matches!(units, DataPayload::Units(_)));

        let record: DataPayload =
            serde_json::from_str(r#"{"timestamp":"1700000000000","targetname":"sshd"}"#).unwrap();
        match record {
            DataPayload::Record(r) => assert_eq!(r.targetname.as_deref(), Some("sshd")),
            other => panic!("expected record, got {:?}", other),
        }
    }
}
