//! Central error report sink
//!
//! Every failure observed by a worker ends up here with a severity, a
//! `fatal` flag that cancels the process root token, and a `trace` flag
//! that attaches a captured backtrace. Workers never panic the process.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Severity of a reported condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    fn index(self) -> usize {
        match self {
            Severity::Debug => 0,
            Severity::Info => 1,
            Severity::Warn => 2,
            Severity::Error => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Cloneable handle to the process-wide report sink
#[derive(Debug, Clone)]
pub struct Reporter {
    root: CancellationToken,
    counts: Arc<[AtomicUsize; 4]>,
}

impl Reporter {
    /// Create a reporter that cancels `root` on fatal reports
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            counts: Arc::new(Default::default()),
        }
    }

    /// Report a condition.
    pub fn report(
        &self,
        module: &str,
        severity: Severity,
        err: &dyn fmt::Display,
        fatal: bool,
        trace: bool,
    ) {
        self.counts[severity.index()].fetch_add(1, Ordering::Relaxed);

        let backtrace = if trace {
            format!("\n{}", Backtrace::force_capture())
        } else {
            String::new()
        };

        match severity {
            Severity::Debug => tracing::debug!(module, "{}{}", err, backtrace),
            Severity::Info => tracing::info!(module, "{}{}", err, backtrace),
            Severity::Warn => tracing::warn!(module, "{}{}", err, backtrace),
            Severity::Error => tracing::error!(module, "{}{}", err, backtrace),
        }

        if fatal {
            tracing::error!(module, "fatal condition reported, shutting down");
            self.root.cancel();
        }
    }

    /// Report a non-fatal error without a trace
    pub fn error(&self, module: &str, err: &dyn fmt::Display) {
        self.report(module, Severity::Error, err, false, false);
    }

    /// Report a non-fatal warning
    pub fn warn(&self, module: &str, err: &dyn fmt::Display) {
        self.report(module, Severity::Warn, err, false, false);
    }

    /// Report an expected condition, such as a clean remote close
    pub fn info(&self, module: &str, err: &dyn fmt::Display) {
        self.report(module, Severity::Info, err, false, false);
    }

    /// Number of reports seen at `severity`
    pub fn count(&self, severity: Severity) -> usize {
        self.counts[severity.index()].load(Ordering::Relaxed)
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}
