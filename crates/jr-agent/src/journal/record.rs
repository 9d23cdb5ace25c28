//! Journal record classification

use jr_protocol::LogRecord;
use serde_json::{Map, Value};

use crate::error::AdapterError;

/// One `journalctl --output=json` record
pub type RawEntry = Map<String, Value>;

const REALTIME: &str = "__REALTIME_TIMESTAMP";

/// Width of a millisecond epoch, used when the timestamp does not parse
const FALLBACK_TIMESTAMP_WIDTH: usize = 13;

fn field<'a>(raw: &'a RawEntry, name: &str) -> Option<&'a str> {
    raw.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Convert a raw record to the browser shape.
///
/// A timestamp that is not an integer is passed through truncated and the
/// parse failure is handed back for reporting.
pub fn to_log_record(raw: &RawEntry) -> (LogRecord, Option<AdapterError>) {
    let mut record = LogRecord::default();
    let mut issue = None;

    if let Some(value) = field(raw, REALTIME) {
        match value.parse::<i64>() {
            Ok(micros) => record.timestamp = Some((micros / 1000).to_string()),
            Err(source) => {
                record.timestamp = Some(value.chars().take(FALLBACK_TIMESTAMP_WIDTH).collect());
                issue = Some(AdapterError::Timestamp {
                    value: value.to_string(),
                    source,
                });
            }
        }
    }

    record.level = field(raw, "PRIORITY").map(str::to_string);
    record.message = field(raw, "MESSAGE").map(str::to_string);
    record.targetname = match field(raw, "_TRANSPORT") {
        Some("journal") => field(raw, "UNIT").or_else(|| field(raw, "SYSLOG_IDENTIFIER")),
        Some("syslog" | "kernel" | "audit") => field(raw, "SYSLOG_IDENTIFIER"),
        _ => None,
    }
    .map(str::to_string);

    (record, issue)
}

/// Sort raw JSON lines ascending by `__REALTIME_TIMESTAMP`.
///
/// Lines without a parseable timestamp sort first; the sort is stable.
pub fn sort_by_timestamp(lines: &mut [String]) {
    lines.sort_by_cached_key(|line| {
        serde_json::from_str::<RawEntry>(line)
            .ok()
            .and_then(|raw| field(&raw, REALTIME).and_then(|v| v.parse::<i64>().ok()))
    });
}
