//! Journal query filter

use serde::{Deserialize, Serialize};

/// A browser-supplied journal query.
///
/// Field names follow the wire format exactly. Equality is by value, which
/// is what the agent uses to rate-limit repeated identical requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    /// Start of the time window (paged mode only)
    pub since: String,
    /// End of the time window (paged mode only)
    pub until: String,
    /// Systemd unit name
    pub unit: String,
    /// Syslog identifier
    pub identifier: String,
    /// Journal priority
    pub severity: String,
    /// Journal transport (journal, syslog, kernel, audit)
    pub transport: String,
    /// Paged historical query instead of live follow
    pub notail: bool,
    /// `name:uid` pair
    pub user: String,
    /// Page offset
    pub from: i64,
    /// Page size
    pub size: i64,
}

impl Filter {
    /// Filter for a live tail of one unit
    pub fn follow_unit(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            ..Self::default()
        }
    }

    /// Filter for a paged query starting at `from`
    pub fn paged(from: i64, size: i64) -> Self {
        Self {
            notail: true,
            from,
            size,
            ..Self::default()
        }
    }

    /// Half-open range `[start, end)` of a page over `len` buffered records.
    ///
    /// Both ends are clamped to `len`, negative values count as zero.
    pub fn page_bounds(&self, len: usize) -> (usize, usize) {
        let from = usize::try_from(self.from.max(0)).unwrap_or(usize::MAX);
        let size = usize::try_from(self.size.max(0)).unwrap_or(usize::MAX);
        let start = from.min(len);
        let end = from.saturating_add(size).min(len);
        (start, end)
    }
}
