//! Unit listing classification and host flavor detection

use std::path::Path;

use jr_protocol::UnitMap;

use crate::error::AdapterError;

/// Transport classes offered besides the default journal transport
pub const TRANSPORT_CLASSES: [&str; 2] = ["audit", "kernel"];

const SERVICE_SUFFIX: &str = ".service";

/// Host OS flavor; decides how unit-list lines are split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OsFlavor {
    /// Leading whitespace is stripped before splitting
    #[default]
    OpenEuler,
    /// Lines are split as printed
    Kylin,
}

impl OsFlavor {
    /// Classify the first word of a release file
    pub fn from_release(contents: &str) -> Result<Self, AdapterError> {
        let name = contents.split(' ').next().unwrap_or_default().trim();
        match name {
            "openEuler" => Ok(Self::OpenEuler),
            "Kylin" => Ok(Self::Kylin),
            other => Err(AdapterError::UnsupportedOs(other.to_string())),
        }
    }

    /// Read and classify the release file at `path`
    pub fn detect(path: &Path) -> Result<Self, AdapterError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| AdapterError::ReleaseFile {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_release(&contents)
    }
}

/// Extract service names (without `.service`) from `systemctl list-units` output
pub fn parse_unit_list(raw: &str, flavor: OsFlavor) -> Vec<String> {
    raw.lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let line = match flavor {
                OsFlavor::OpenEuler => line.trim_start_matches(' '),
                OsFlavor::Kylin => line,
            };
            line.split(' ')
                .find(|token| token.contains(SERVICE_SUFFIX))
                .and_then(|token| token.split(SERVICE_SUFFIX).next())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        })
        .collect()
}

/// `root:0`, plus `name:uid` of the current user when that is not root
#[cfg(unix)]
pub fn known_users() -> Result<Vec<String>, AdapterError> {
    use nix::unistd::{Uid, User};

    let lookup = |e: nix::Error| AdapterError::UserLookup(e.to_string());

    let root = User::from_name("root")
        .map_err(lookup)?
        .ok_or_else(|| AdapterError::UserLookup("no root user".into()))?;
    let mut users = vec![format!("{}:{}", root.name, root.uid)];

    let current = User::from_uid(Uid::effective())
        .map_err(lookup)?
        .ok_or_else(|| AdapterError::UserLookup("current user has no passwd entry".into()))?;
    if current.name != "root" {
        users.push(format!("{}:{}", current.name, current.uid));
    }
    Ok(users)
}

/// `root:0` only; user databases are not consulted on this platform
#[cfg(not(unix))]
pub fn known_users() -> Result<Vec<String>, AdapterError> {
    Ok(vec!["root:0".to_string()])
}

/// Assemble the unit map sent in answer to a unit listing
pub fn build_unit_map(raw: &str, flavor: OsFlavor) -> Result<UnitMap, AdapterError> {
    Ok(UnitMap {
        user: known_users()?,
        transport: TRANSPORT_CLASSES.iter().map(|s| s.to_string()).collect(),
        systemd: parse_unit_list(raw, flavor),
    })
}
