//! Log-source adapter for the systemd journal
//!
//! Builds `journalctl` / `systemctl` command lines from a [`Filter`] and
//! classifies their output into the shapes the browser renders.
//!
//! [`Filter`]: jr_protocol::Filter

mod args;
mod record;
mod units;

pub use args::{Invocation, ReadMode, DEFAULT_JOURNAL_ARGS, UNIT_LIST_ARGS};
pub use record::{sort_by_timestamp, to_log_record, RawEntry};
pub use units::{build_unit_map, known_users, parse_unit_list, OsFlavor, TRANSPORT_CLASSES};
