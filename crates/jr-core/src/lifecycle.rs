//! Process-scoped lifecycle: root cancellation, global wait-group, signals

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::report::Reporter;

/// Root context shared by every session in the process
#[derive(Debug, Clone)]
pub struct Lifecycle {
    root: CancellationToken,
    tracker: TaskTracker,
    reporter: Reporter,
}

impl Lifecycle {
    /// Create a new lifecycle with a fresh root token
    pub fn new() -> Self {
        let root = CancellationToken::new();
        Self {
            reporter: Reporter::new(root.clone()),
            root,
            tracker: TaskTracker::new(),
        }
    }

    /// Root cancellation token
    pub fn root(&self) -> &CancellationToken {
        &self.root
    }

    /// Report sink bound to the root token
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Global wait-group
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Spawn a task that shutdown will wait for
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Cancel the root and wait up to `grace` for tracked tasks to drain.
    ///
    /// Returns `false` if the grace period ran out first.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.root.cancel();
        self.tracker.close();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    "{} tasks still running after {:?} shutdown grace period",
                    self.tracker.len(),
                    grace
                );
                false
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for Ctrl+C, SIGTERM or SIGQUIT
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
            (Ok(mut term), Ok(mut quit)) => {
                tokio::select! {
                    _ = term.recv() => tracing::info!("Received SIGTERM, initiating shutdown..."),
                    _ = quit.recv() => tracing::info!("Received SIGQUIT, initiating shutdown..."),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_waits_for_tracked_tasks() {
        let lifecycle = Lifecycle::new();
        let root = lifecycle.root().clone();
        lifecycle.spawn(async move {
            root.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        });

        assert!(lifecycle.shutdown(Duration::from_secs(2)).await);
        assert!(lifecycle.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_grace_expires() {
        let lifecycle = Lifecycle::new();
        lifecycle.spawn(std::future::pending::<()>());

        assert!(!lifecycle.shutdown(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_fatal_report_cancels_lifecycle() {
        let lifecycle = Lifecycle::new();
        lifecycle
            .reporter()
            .report("startup", crate::Severity::Error, &"bind failed", true, false);
        assert!(lifecycle.root().is_cancelled());
    }
}
