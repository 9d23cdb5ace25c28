//! Registry of live streaming sessions, one map per session kind

use std::sync::Arc;
use std::time::Duration;

use jr_core::{ClientId, Lifecycle, Registry};

use crate::session::StreamingSession;

/// Kind of log source a session streams from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// systemd journal via `journalctl`
    Journald,
}

/// All streaming sessions of this agent
pub struct LogCollector {
    journald: Arc<Registry<StreamingSession>>,
}

impl LogCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            journald: Arc::new(Registry::new("journald")),
        }
    }

    /// Registry holding sessions of `kind`
    pub fn registry(&self, kind: SessionKind) -> &Arc<Registry<StreamingSession>> {
        match kind {
            SessionKind::Journald => &self.journald,
        }
    }

    /// Register a session, returning the one it replaced
    pub fn add(
        &self,
        kind: SessionKind,
        id: ClientId,
        session: Arc<StreamingSession>,
    ) -> Option<Arc<StreamingSession>> {
        self.registry(kind).add(id, session)
    }

    /// Look up a session
    pub fn get(&self, kind: SessionKind, id: &ClientId) -> Option<Arc<StreamingSession>> {
        self.registry(kind).get(id)
    }

    /// Remove a session from the index
    pub fn delete(&self, kind: SessionKind, id: &ClientId) -> Option<Arc<StreamingSession>> {
        self.registry(kind).delete(id)
    }

    /// Start the inactive-session sweep of every registry
    pub fn spawn_heartbeat(&self, lifecycle: &Lifecycle, period: Duration) {
        lifecycle.spawn(Arc::clone(&self.journald).run_heartbeat(period));
    }

    /// Stop the sweeps and close every session
    pub async fn close_all(&self) {
        self.journald.close_all().await;
    }
}

impl Default for LogCollector {
    fn default() -> Self {
        Self::new()
    }
}
