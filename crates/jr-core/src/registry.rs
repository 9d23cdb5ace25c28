//! Heartbeat-swept session registry
//!
//! A registry indexes live sessions by [`ClientId`]. It never owns a
//! session's lifetime: sessions run on their own tasks and flip their
//! `active` flag off when they tear down. The heartbeat sweep then drops
//! the map entry, which is the only way sessions whose browser vanished
//! without a close handshake are reclaimed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::types::ClientId;

/// A session the registry can observe and tear down
#[async_trait]
pub trait Tracked: Send + Sync + 'static {
    /// Whether the session still serves its browser connection
    fn is_active(&self) -> bool;

    /// Tear the session down completely
    async fn shutdown(&self);
}

/// Keyed collection of sessions of one kind
pub struct Registry<T> {
    name: &'static str,
    entries: DashMap<ClientId, Arc<T>>,
    heartbeat_done: CancellationToken,
    closed: AtomicBool,
}

impl<T: Tracked> Registry<T> {
    /// Create an empty registry; `name` is used in logs
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            heartbeat_done: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Insert a session, returning the one it replaced
    pub fn add(&self, id: ClientId, session: Arc<T>) -> Option<Arc<T>> {
        tracing::debug!("{} registry: add {}", self.name, id);
        self.entries.insert(id, session)
    }

    /// Get a session by ID
    pub fn get(&self, id: &ClientId) -> Option<Arc<T>> {
        self.entries.get(id).map(|r| Arc::clone(&r))
    }

    /// Remove a session by ID
    pub fn delete(&self, id: &ClientId) -> Option<Arc<T>> {
        self.entries.remove(id).map(|(_, session)| session)
    }

    /// List all sessions
    pub fn list(&self) -> Vec<Arc<T>> {
        self.entries.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every inactive session; returns how many were removed
    pub fn sweep(&self) -> usize {
        let inactive: Vec<ClientId> = self
            .entries
            .iter()
            .filter(|r| !r.value().is_active())
            .map(|r| r.key().clone())
            .collect();

        let mut removed = 0;
        for id in inactive {
            if self
                .entries
                .remove_if(&id, |_, session| !session.is_active())
                .is_some()
            {
                tracing::debug!("{} registry: evicted inactive session {}", self.name, id);
                removed += 1;
            }
        }
        removed
    }

    /// Run the sweep every `period` until [`close_all`](Self::close_all)
    pub async fn run_heartbeat(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);

        tracing::info!(
            "Starting {} heartbeat sweep (period: {:?})",
            self.name,
            period
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::info!("{} registry: removed {} inactive sessions", self.name, removed);
                    }
                }
                _ = self.heartbeat_done.cancelled() => {
                    tracing::info!("{} heartbeat sweep shutting down", self.name);
                    break;
                }
            }
        }
    }

    /// Stop the sweep and tear down every session. Runs once.
    pub async fn close_all(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.heartbeat_done.cancel();

        let sessions: Vec<Arc<T>> = {
            let ids: Vec<ClientId> = self.entries.iter().map(|r| r.key().clone()).collect();
            ids.iter().filter_map(|id| self.delete(id)).collect()
        };

        tracing::info!("{} registry: closing {} sessions", self.name, sessions.len());
        futures::future::join_all(sessions.iter().map(|s| s.shutdown())).await;
    }

    /// Whether [`close_all`](Self::close_all) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeSession {
        active: AtomicBool,
        shutdowns: AtomicUsize,
    }

    impl FakeSession {
        fn new(active: bool) -> Arc<Self> {
            Arc::new(Self {
                active: AtomicBool::new(active),
                shutdowns: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Tracked for FakeSession {
        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        async fn shutdown(&self) {
            self.active.store(false, Ordering::SeqCst);
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_add_get_delete() {
        let registry = Registry::new("test");
        let session = FakeSession::new(true);

        assert!(registry.add("a".into(), session.clone()).is_none());
        assert!(registry.get(&"a".into()).is_some());
        assert!(registry.add("a".into(), FakeSession::new(true)).is_some());
        assert_eq!(registry.len(), 1);

        assert!(registry.delete(&"a".into()).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_inactive() {
        let registry = Registry::new("test");
        registry.add("live".into(), FakeSession::new(true));
        registry.add("dead-1".into(), FakeSession::new(false));
        registry.add("dead-2".into(), FakeSession::new(false));

        assert_eq!(registry.sweep(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&"live".into()).is_some());
        assert_eq!(registry.sweep(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_evicts_and_stops() {
        let registry = Arc::new(Registry::new("test"));
        let session = FakeSession::new(true);
        registry.add("x".into(), session.clone());

        let sweep = tokio::spawn(Arc::clone(&registry).run_heartbeat(Duration::from_millis(10)));

        session.active.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.is_empty());

        registry.close_all().await;
        tokio::time::timeout(Duration::from_secs(1), sweep)
            .await
            .expect("sweep did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_all_runs_once() {
        let registry = Registry::new("test");
        let a = FakeSession::new(true);
        let b = FakeSession::new(true);
        registry.add("a".into(), a.clone());
        registry.add("b".into(), b.clone());

        registry.close_all().await;
        registry.close_all().await;

        assert!(registry.is_closed());
        assert!(registry.is_empty());
        assert_eq!(a.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(b.shutdowns.load(Ordering::SeqCst), 1);
    }
}
