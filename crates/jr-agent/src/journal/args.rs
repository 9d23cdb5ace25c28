//! Command line construction

use std::path::{Path, PathBuf};

use jr_protocol::Filter;

use crate::error::AdapterError;

/// Arguments every journal invocation starts with
pub const DEFAULT_JOURNAL_ARGS: [&str; 3] = ["--quiet", "--utc", "--output=json"];

/// Fixed arguments of the service unit listing
pub const UNIT_LIST_ARGS: [&str; 4] = ["list-units", "--no-legend", "--type=service", "--no-pager"];

/// How the output of an invocation is read and classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// One JSON record per line, indefinitely
    Follow,
    /// Whole output read once, sorted and paged
    Paged,
    /// Plain-text unit listing read once
    Units,
}

/// A program plus its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub mode: ReadMode,
}

impl Invocation {
    /// Journal query for `filter`.
    ///
    /// A user filter without a uid segment still yields an `_UID=` match;
    /// the problem is handed back for reporting.
    pub fn journal(program: &Path, filter: &Filter) -> (Self, Option<AdapterError>) {
        let mut args: Vec<String> = DEFAULT_JOURNAL_ARGS.iter().map(|s| s.to_string()).collect();
        let mut issue = None;

        if filter.notail {
            args.push("--no-tail".into());
        } else {
            args.push("--follow".into());
        }
        if filter.notail && !filter.since.is_empty() && !filter.until.is_empty() {
            args.extend([
                "--since".into(),
                filter.since.clone(),
                "--until".into(),
                filter.until.clone(),
            ]);
        }
        if !filter.unit.is_empty() {
            args.extend(["--unit".into(), filter.unit.clone()]);
        }
        if !filter.identifier.is_empty() {
            args.extend(["--identifier".into(), filter.identifier.clone()]);
        }
        if !filter.severity.is_empty() {
            args.extend(["--priority".into(), filter.severity.clone()]);
        }
        if !filter.transport.is_empty() {
            args.push(format!("_TRANSPORT={}", filter.transport));
        }
        if !filter.user.is_empty() {
            let uid = filter.user.split(':').nth(1).unwrap_or_default();
            if uid.is_empty() {
                issue = Some(AdapterError::InvalidUser(filter.user.clone()));
            }
            args.push(format!("_UID={}", uid));
        }

        let mode = if filter.notail {
            ReadMode::Paged
        } else {
            ReadMode::Follow
        };

        (
            Self {
                program: program.to_path_buf(),
                args,
                mode,
            },
            issue,
        )
    }

    /// Active service unit listing
    pub fn units(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
            args: UNIT_LIST_ARGS.iter().map(|s| s.to_string()).collect(),
            mode: ReadMode::Units,
        }
    }
}
