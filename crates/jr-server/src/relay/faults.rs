//! Relay error processor
//!
//! Copy loops never report directly: they push [`RelayError`]s into one
//! channel drained by a single processor task, which reports them and
//! records the reason each side will see in its close frame.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use jr_core::Reporter;

use super::MODULE;
use crate::error::{RelayError, Side};

/// Reasons sent with the final close frames
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloseReasons {
    pub client: String,
    pub target: String,
}

impl CloseReasons {
    fn set(&mut self, side: Side, reason: String) {
        match side {
            Side::Client => self.client = reason,
            Side::Target => self.target = reason,
        }
    }

    /// Record `err` against the side(s) that should learn about it.
    ///
    /// A closed leg is explained to its peer; setup failures only concern
    /// the browser; copy failures concern both legs.
    pub fn record(&mut self, err: &RelayError) {
        let text = err.to_string();
        match err {
            RelayError::Closed { side, .. } => self.set(side.peer(), text),
            RelayError::FirstMessage(_) | RelayError::Protocol(_) | RelayError::Dial(_) => {
                self.set(Side::Client, text)
            }
            RelayError::Read { .. } | RelayError::Write { .. } => {
                self.set(Side::Client, text.clone());
                self.set(Side::Target, text);
            }
        }
    }
}

/// Drain `rx` until `end` fires, then record whatever is still queued
pub(super) async fn process(
    mut rx: mpsc::UnboundedReceiver<RelayError>,
    end: CancellationToken,
    reasons: Arc<Mutex<CloseReasons>>,
    reporter: Reporter,
) {
    loop {
        let err = tokio::select! {
            biased;
            _ = end.cancelled() => break,
            err = rx.recv() => match err {
                Some(err) => err,
                None => break,
            },
        };
        handle(&err, &reasons, &reporter).await;
    }

    while let Ok(err) = rx.try_recv() {
        handle(&err, &reasons, &reporter).await;
    }
    tracing::debug!("relay error processor done");
}

async fn handle(err: &RelayError, reasons: &Mutex<CloseReasons>, reporter: &Reporter) {
    if err.is_clean_close() {
        reporter.info(MODULE, err);
    } else {
        reporter.error(MODULE, err);
    }
    reasons.lock().await.record(err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use jr_core::error::TransportError;
    use jr_core::Severity;

    #[test]
    fn test_closed_leg_is_explained_to_peer() {
        let mut reasons = CloseReasons::default();
        reasons.record(&RelayError::Closed {
            side: Side::Target,
            reason: "close 1000".into(),
        });
        assert!(reasons.client.contains("target"));
        assert!(reasons.target.is_empty());
    }

    #[test]
    fn test_copy_failure_recorded_for_both() {
        let mut reasons = CloseReasons::default();
        reasons.record(&RelayError::Write {
            side: Side::Client,
            source: TransportError::Closed,
        });
        assert_eq!(reasons.client, reasons.target);
        assert!(!reasons.client.is_empty());
    }

    #[tokio::test]
    async fn test_processor_drains_queue_on_end() {
        let (tx, rx) = mpsc::unbounded_channel();
        let end = CancellationToken::new();
        let reasons = Arc::new(Mutex::new(CloseReasons::default()));
        let reporter = Reporter::default();

        tx.send(RelayError::FirstMessage(2)).unwrap();
        tx.send(RelayError::Closed {
            side: Side::Client,
            reason: "bye".into(),
        })
        .unwrap();
        end.cancel();

        process(rx, end, Arc::clone(&reasons), reporter.clone()).await;

        let reasons = reasons.lock().await;
        assert!(reasons.client.contains("first message"));
        assert!(reasons.target.contains("client"));
        assert_eq!(reporter.count(Severity::Error), 1);
        assert_eq!(reporter.count(Severity::Info), 1);
    }
}
