//! Relay session: one browser connection spliced onto one agent connection
//!
//! Workers:
//! - client-to-target copy loop, alive for the whole session; it also
//!   handles re-target requests
//! - target-to-client copy loop, one per dialed target
//! - `connected` acknowledgment writer, one per dialed target
//! - the error processor
//!
//! Each outbound half sits behind its own mutex, so the acknowledgment
//! writer and the copy loops never interleave frames on one connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use jr_core::error::TransportError;
use jr_core::transport::{next_inbound, Frame, FrameSink, FrameStream, Inbound, CLOSE_ABNORMAL};
use jr_core::{ClientId, Lifecycle, Tracked};
use jr_protocol::Message;

use super::connector::{ForwardHeaders, TargetConnector};
use super::faults::{self, CloseReasons};
use super::MODULE;
use crate::error::{RelayError, Side};

struct TargetLeg {
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// Double-hop WebSocket relay bound to one browser connection
pub struct RelaySession {
    id: ClientId,
    headers: ForwardHeaders,
    connector: Arc<dyn TargetConnector>,
    lifecycle: Lifecycle,
    settle_delay: Duration,
    cancel: CancellationToken,
    workers: TaskTracker,
    client_out: Mutex<Option<FrameSink>>,
    target_out: Mutex<Option<FrameSink>>,
    target_leg: Mutex<Option<TargetLeg>>,
    faults: mpsc::UnboundedSender<RelayError>,
    faults_end: CancellationToken,
    processor: Mutex<Option<JoinHandle<()>>>,
    reasons: Arc<Mutex<CloseReasons>>,
    active: AtomicBool,
    closing: AtomicBool,
    closed: CancellationToken,
}

impl RelaySession {
    /// Create a relay for an accepted browser connection.
    ///
    /// Starts the error processor; call [`serve`](Self::serve) with the
    /// connection's inbound half next.
    pub fn new(
        id: ClientId,
        client: FrameSink,
        headers: ForwardHeaders,
        connector: Arc<dyn TargetConnector>,
        settle_delay: Duration,
        lifecycle: Lifecycle,
    ) -> Arc<Self> {
        let (faults, rx) = mpsc::unbounded_channel();
        let faults_end = CancellationToken::new();
        let reasons = Arc::new(Mutex::new(CloseReasons::default()));
        let processor = lifecycle.spawn(faults::process(
            rx,
            faults_end.clone(),
            Arc::clone(&reasons),
            lifecycle.reporter().clone(),
        ));

        Arc::new(Self {
            id,
            headers,
            connector,
            settle_delay,
            cancel: lifecycle.root().child_token(),
            lifecycle,
            workers: TaskTracker::new(),
            client_out: Mutex::new(Some(client)),
            target_out: Mutex::new(None),
            target_leg: Mutex::new(None),
            faults,
            faults_end,
            processor: Mutex::new(Some(processor)),
            reasons,
            active: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
        })
    }

    /// Client ID this relay is registered under
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Whether the relay still serves its browser connection
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether no worker is running
    pub fn workers_idle(&self) -> bool {
        self.workers.is_empty()
    }

    /// Read the mandatory agent address, reach the target and start relaying.
    ///
    /// Returns once the copy loops are running or the relay was closed.
    pub async fn serve(self: &Arc<Self>, mut client_in: FrameStream) {
        let first = tokio::select! {
            _ = self.cancel.cancelled() => return,
            next = next_inbound(&mut client_in) => next,
        };

        let addr = match agent_address(first) {
            Ok(addr) => addr,
            Err(err) => {
                self.fault(err);
                self.close().await;
                return;
            }
        };

        if !self.connect(&addr).await {
            self.close().await;
            return;
        }
        self.workers
            .spawn(Arc::clone(self).client_to_target(client_in));
    }

    /// Probe and dial `addr`, then start the target leg.
    ///
    /// A failed probe is announced to the browser with `dial-failed`.
    async fn connect(self: &Arc<Self>, addr: &str) -> bool {
        let probed = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            probed = self.connector.probe(addr) => probed,
        };
        let scheme = match probed {
            Ok(scheme) => scheme,
            Err(e) => {
                if let Err(write_err) = self.send_message(&Message::DialFailed).await {
                    self.fault(write_err);
                }
                self.fault(e.into());
                return false;
            }
        };

        let dialed = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            dialed = self.connector.dial(addr, scheme, &self.headers) => dialed,
        };
        let (sink, stream) = match dialed {
            Ok(halves) => halves,
            Err(e) => {
                self.fault(e.into());
                return false;
            }
        };
        tracing::info!("relay {} connected to {} ({:?})", self.id, addr, scheme);

        *self.target_out.lock().await = Some(sink);
        let leg = self.cancel.child_token();
        let reader = self
            .workers
            .spawn(Arc::clone(self).target_to_client(stream, leg.clone()));
        *self.target_leg.lock().await = Some(TargetLeg {
            cancel: leg.clone(),
            reader,
        });
        self.workers.spawn(Arc::clone(self).acknowledge(leg));
        true
    }

    /// Drop the current target and connect to `addr` instead.
    ///
    /// The browser connection and its copy loop stay untouched.
    async fn retarget(self: &Arc<Self>, addr: &str) -> bool {
        tracing::info!("relay {} re-targeting to {}", self.id, addr);
        self.close_target().await;
        self.connect(addr).await
    }

    async fn close_target(&self) {
        let leg = self.target_leg.lock().await.take();
        if let Some(leg) = leg {
            leg.cancel.cancel();
            if let Err(e) = leg.reader.await {
                if e.is_panic() {
                    self.lifecycle
                        .reporter()
                        .error(MODULE, &format!("target reader panicked: {}", e));
                }
            }
        }

        let sink = self.target_out.lock().await.take();
        if let Some(mut sink) = sink {
            let reason = self.reasons.lock().await.target.clone();
            send_close(&mut sink, Side::Target, reason).await;
        }
    }

    async fn client_to_target(self: Arc<Self>, mut client_in: FrameStream) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = next_inbound(&mut client_in) => next,
            };
            let frame = match classify(Side::Client, next) {
                Ok(frame) => frame,
                Err(err) => {
                    self.fault(err);
                    self.spawn_close();
                    break;
                }
            };

            match Message::decode_slice(frame.as_bytes().unwrap_or_default()) {
                Ok(Message::AgentAddress(addr)) => {
                    if !self.retarget(&addr).await {
                        self.spawn_close();
                        break;
                    }
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    self.fault(e.into());
                    self.spawn_close();
                    break;
                }
            }

            let written = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                written = self.write(Side::Target, frame) => written,
            };
            if let Err(err) = written {
                self.fault(err);
                self.spawn_close();
                break;
            }
        }
        tracing::debug!("relay {} client-to-target loop done", self.id);
    }

    async fn target_to_client(self: Arc<Self>, mut target_in: FrameStream, leg: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = leg.cancelled() => break,
                next = next_inbound(&mut target_in) => next,
            };
            let frame = match classify(Side::Target, next) {
                Ok(frame) => frame,
                Err(err) => {
                    self.fault(err);
                    self.spawn_close();
                    break;
                }
            };

            let written = tokio::select! {
                biased;
                _ = leg.cancelled() => break,
                written = self.write(Side::Client, frame) => written,
            };
            if let Err(err) = written {
                self.fault(err);
                self.spawn_close();
                break;
            }
        }
        tracing::debug!("relay {} target-to-client loop done", self.id);
    }

    async fn acknowledge(self: Arc<Self>, leg: CancellationToken) {
        let sent = tokio::select! {
            biased;
            _ = leg.cancelled() => return,
            sent = self.send_message(&Message::Connected) => sent,
        };
        if let Err(err) = sent {
            self.fault(err);
        }
    }

    async fn write(&self, side: Side, frame: Frame) -> Result<(), RelayError> {
        let out = match side {
            Side::Client => &self.client_out,
            Side::Target => &self.target_out,
        };
        let mut out = out.lock().await;
        let sink = out.as_mut().ok_or(RelayError::Write {
            side,
            source: TransportError::Closed,
        })?;
        sink.send(frame)
            .await
            .map_err(|source| RelayError::Write { side, source })
    }

    async fn send_message(&self, message: &Message) -> Result<(), RelayError> {
        let text = message.encode()?;
        self.write(Side::Client, Frame::Text(text)).await
    }

    fn fault(&self, err: RelayError) {
        if let Err(mpsc::error::SendError(err)) = self.faults.send(err) {
            self.lifecycle.reporter().warn(MODULE, &err);
        }
    }

    /// Run the full teardown on its own task; workers cannot await it
    /// because it waits for them.
    fn spawn_close(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.lifecycle.spawn(async move { this.close().await });
    }

    /// Full teardown of both legs.
    ///
    /// Runs once; concurrent callers wait until the first one finished.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            self.closed.cancelled().await;
            return;
        }

        self.cancel.cancel();
        self.workers.close();
        self.workers.wait().await;
        tracing::debug!("relay {} workers done", self.id);

        self.faults_end.cancel();
        let processor = self.processor.lock().await.take();
        if let Some(processor) = processor {
            let _ = processor.await;
        }

        let reasons = self.reasons.lock().await.clone();
        let legs = [
            (Side::Client, &self.client_out, reasons.client),
            (Side::Target, &self.target_out, reasons.target),
        ];
        for (side, out, reason) in legs {
            let sink = out.lock().await.take();
            if let Some(mut sink) = sink {
                send_close(&mut sink, side, reason).await;
            }
        }
        self.target_leg.lock().await.take();

        self.active.store(false, Ordering::SeqCst);
        tracing::info!("relay {} closed", self.id);

        tokio::time::sleep(self.settle_delay).await;
        self.closed.cancel();
    }
}

#[async_trait]
impl Tracked for RelaySession {
    fn is_active(&self) -> bool {
        RelaySession::is_active(self)
    }

    async fn shutdown(&self) {
        self.close().await;
    }
}

/// Extract the target from the browser's first message
fn agent_address(first: Inbound) -> Result<String, RelayError> {
    let frame = classify(Side::Client, first)?;
    match Message::decode_slice(frame.as_bytes().unwrap_or_default())? {
        Message::AgentAddress(addr) => Ok(addr),
        other => Err(RelayError::FirstMessage(other.wire_kind())),
    }
}

/// Data frames pass; anything else ends the leg
fn classify(side: Side, inbound: Inbound) -> Result<Frame, RelayError> {
    match inbound {
        Inbound::Data(frame) => Ok(frame),
        Inbound::Closed(reason) => Err(RelayError::Closed {
            side,
            reason: reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "no close reason".to_string()),
        }),
        Inbound::Abnormal => Err(RelayError::Closed {
            side,
            reason: format!("abnormal closure ({})", CLOSE_ABNORMAL),
        }),
        Inbound::Failed(source) => Err(RelayError::Read { side, source }),
    }
}

async fn send_close(sink: &mut FrameSink, side: Side, reason: String) {
    if let Err(e) = sink.send(Frame::close_normal(reason)).await {
        tracing::debug!("close frame to {} not delivered: {}", side, e);
    }
    let _ = sink.close().await;
}
