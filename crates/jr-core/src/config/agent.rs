//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use super::TlsSettings;

/// Configuration for the journal streaming agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address the `/ws/entry` endpoint listens on
    pub listen_address: String,

    /// Journal reader program
    pub journalctl: PathBuf,

    /// Unit listing program
    pub systemctl: PathBuf,

    /// File naming the host OS flavor
    pub os_release_path: PathBuf,

    /// Interval of the inactive-session sweep
    #[serde(with = "duration_secs")]
    pub heartbeat_period: Duration,

    /// Upper bound on draining the journal reader's stderr during teardown
    #[serde(with = "duration_secs")]
    pub stderr_drain_timeout: Duration,

    /// Pause at the end of every teardown
    #[serde(with = "duration_millis")]
    pub settle_delay: Duration,

    /// Pause applied instead of restarting when the same filter arrives again
    #[serde(with = "duration_millis")]
    pub same_filter_delay: Duration,

    /// Capacity of the record and stderr queues
    pub record_channel_capacity: usize,

    /// `https_enabled`, `cert_file` and `key_file`
    #[serde(flatten)]
    pub tls: TlsSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:9995".to_string(),
            journalctl: PathBuf::from("journalctl"),
            systemctl: PathBuf::from("systemctl"),
            os_release_path: PathBuf::from("/etc/system-release"),
            heartbeat_period: Duration::from_secs(5),
            stderr_drain_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_millis(1000),
            same_filter_delay: Duration::from_millis(1000),
            record_channel_capacity: 10,
            tls: TlsSettings::default(),
        }
    }
}
