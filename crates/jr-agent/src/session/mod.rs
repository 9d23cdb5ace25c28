//! Streaming session
//!
//! A [`StreamingSession`] serves one browser connection. Its read loop
//! dispatches protocol messages; each applied filter or unit listing starts
//! a run (child process, stdout and stderr readers, process-wait task and a
//! writer loop). Teardown is serialized, and the `active` flag and the
//! terminal `channels_closed` flag make repeated or concurrent closes
//! harmless: at most one close frame is ever sent.
//!
//! # Run lifecycle
//!
//! idle -> process running -> streaming (follow) or buffering (paged) ->
//! idle again once the run is torn down.

mod run;
mod writer;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use jr_core::config::AgentConfig;
use jr_core::error::TransportError;
use jr_core::transport::{next_inbound, Frame, FrameSink, FrameStream, Inbound};
use jr_core::{ClientId, JrError, Lifecycle, Severity, Tracked};
use jr_protocol::{Filter, Message};

use crate::journal::{Invocation, OsFlavor, ReadMode};
use run::Run;
use writer::Output;

pub(crate) const MODULE: &str = "journald";

/// Per-session knobs, normally derived from [`AgentConfig`]
#[derive(Debug, Clone)]
pub struct SessionTuning {
    /// Journal reader program
    pub journalctl: PathBuf,
    /// Unit listing program
    pub systemctl: PathBuf,
    /// Unit-list splitting flavor
    pub flavor: OsFlavor,
    /// Upper bound on draining stderr during teardown
    pub stderr_drain_timeout: Duration,
    /// Pause at the end of every teardown
    pub settle_delay: Duration,
    /// Pause applied when the same filter arrives again
    pub same_filter_delay: Duration,
    /// Capacity of the record and stderr queues
    pub channel_capacity: usize,
}

impl SessionTuning {
    /// Derive tuning from the agent configuration
    pub fn from_config(config: &AgentConfig, flavor: OsFlavor) -> Self {
        Self {
            journalctl: config.journalctl.clone(),
            systemctl: config.systemctl.clone(),
            flavor,
            stderr_drain_timeout: config.stderr_drain_timeout,
            settle_delay: config.settle_delay,
            same_filter_delay: config.same_filter_delay,
            channel_capacity: config.record_channel_capacity,
        }
    }
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default(), OsFlavor::default())
    }
}

/// Teardown switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseOptions {
    /// Send a close frame and drop the outbound connection
    pub close_conn: bool,
    /// Make the session terminal: stop the read loop, refuse new runs
    pub close_channels: bool,
    /// Surface the journal reader's remaining stderr first
    pub print_stderr: bool,
}

impl CloseOptions {
    /// Close the browser connection
    pub fn connection() -> Self {
        Self {
            close_conn: true,
            ..Self::default()
        }
    }

    /// Close everything; used by registry shutdown and fatal errors
    pub fn terminal() -> Self {
        Self {
            close_conn: true,
            close_channels: true,
            print_stderr: false,
        }
    }
}

/// Which runs a teardown stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    All,
    Query,
    Units,
    Generation(u64),
}

#[derive(Default)]
struct Runs {
    query: Option<Run>,
    units: Option<Run>,
}

impl Runs {
    fn take(&mut self, scope: Scope) -> Vec<Run> {
        let mut taken = Vec::new();
        let query_matches = |run: &Run| match scope {
            Scope::All | Scope::Query => true,
            Scope::Generation(g) => run.generation == g,
            Scope::Units => false,
        };
        let units_matches = |run: &Run| match scope {
            Scope::All | Scope::Units => true,
            Scope::Generation(g) => run.generation == g,
            Scope::Query => false,
        };
        if self.query.as_ref().is_some_and(query_matches) {
            taken.extend(self.query.take());
        }
        if self.units.as_ref().is_some_and(units_matches) {
            taken.extend(self.units.take());
        }
        taken
    }
}

/// Journal streaming session bound to one browser connection
pub struct StreamingSession {
    id: ClientId,
    tuning: SessionTuning,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    active: AtomicBool,
    channels_closed: AtomicBool,
    generation: AtomicU64,
    outbound: Mutex<Option<FrameSink>>,
    inbound: Mutex<Option<FrameStream>>,
    filter: Mutex<Option<Filter>>,
    page: Mutex<Vec<String>>,
    runs: Mutex<Runs>,
    teardown_lock: Mutex<()>,
}

impl StreamingSession {
    /// Create a session over an accepted connection
    pub fn new(
        id: ClientId,
        sink: FrameSink,
        stream: FrameStream,
        tuning: SessionTuning,
        lifecycle: Lifecycle,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            tuning,
            cancel: lifecycle.root().child_token(),
            lifecycle,
            active: AtomicBool::new(true),
            channels_closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            outbound: Mutex::new(Some(sink)),
            inbound: Mutex::new(Some(stream)),
            filter: Mutex::new(None),
            page: Mutex::new(Vec::new()),
            runs: Mutex::new(Runs::default()),
            teardown_lock: Mutex::new(()),
        })
    }

    /// Client ID this session is registered under
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Currently applied filter
    pub async fn current_filter(&self) -> Option<Filter> {
        self.filter.lock().await.clone()
    }

    /// Number of records held for paging
    pub async fn buffered_records(&self) -> usize {
        self.page.lock().await.len()
    }

    /// Inbound message pump; returns once the session stops serving.
    pub async fn run(self: Arc<Self>) {
        let Some(mut inbound) = self.inbound.lock().await.take() else {
            return;
        };
        let reporter = self.lifecycle.reporter().clone();

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = next_inbound(&mut inbound) => next,
            };

            match next {
                Inbound::Data(frame) => {
                    let Some(bytes) = frame.as_bytes() else {
                        continue;
                    };
                    match Message::decode_slice(bytes) {
                        Ok(message) => self.dispatch(message).await,
                        Err(e) => {
                            reporter.report(MODULE, Severity::Error, &e, false, true);
                            self.close(CloseOptions::connection()).await;
                            break;
                        }
                    }
                    if !self.is_active() {
                        break;
                    }
                }
                Inbound::Closed(reason) => {
                    if self.is_active() {
                        let reason = reason.map(|r| r.to_string()).unwrap_or_default();
                        reporter.info(MODULE, &format!("client {} closed the connection {}", self.id, reason));
                        self.close(CloseOptions::connection()).await;
                    }
                    break;
                }
                Inbound::Abnormal => {
                    if self.is_active() {
                        reporter.warn(MODULE, &format!("client {} vanished without a close frame", self.id));
                        self.close(CloseOptions {
                            print_stderr: true,
                            ..CloseOptions::connection()
                        })
                        .await;
                    }
                    break;
                }
                Inbound::Failed(e) => {
                    if self.is_active() {
                        reporter.error(MODULE, &e);
                        self.close(CloseOptions {
                            print_stderr: true,
                            ..CloseOptions::connection()
                        })
                        .await;
                    }
                    break;
                }
            }
        }
        tracing::debug!("read loop for {} finished", self.id);
    }

    async fn dispatch(self: &Arc<Self>, message: Message) {
        match message {
            Message::UpdateFilter(filter) => self.apply(filter).await,
            Message::ListUnits => self.list_units().await,
            Message::UpdatePage { from, size } => self.request_page(from, size).await,
            Message::Unknown(kind) => self
                .lifecycle
                .reporter()
                .error(MODULE, &format!("unknown message type: {}", kind)),
            other => self.lifecycle.reporter().error(
                MODULE,
                &format!("unsupported message type: {:?}", other.kind()),
            ),
        }
    }

    /// Replace the query. An identical filter is rate-limited instead.
    pub async fn apply(self: &Arc<Self>, filter: Filter) {
        if self.filter.lock().await.as_ref() == Some(&filter) {
            tokio::time::sleep(self.tuning.same_filter_delay).await;
            return;
        }

        if self.runs.lock().await.query.is_some() {
            self.teardown(CloseOptions::default(), Scope::Query).await;
        }

        *self.filter.lock().await = Some(filter.clone());
        self.page.lock().await.clear();

        let (invocation, issue) = Invocation::journal(&self.tuning.journalctl, &filter);
        if let Some(issue) = issue {
            self.lifecycle.reporter().error(MODULE, &issue);
        }
        self.launch(invocation).await;
    }

    /// Start the unit listing
    pub async fn list_units(self: &Arc<Self>) {
        if self.runs.lock().await.units.is_some() {
            self.teardown(CloseOptions::default(), Scope::Units).await;
        }
        self.launch(Invocation::units(&self.tuning.systemctl)).await;
    }

    /// Push `[from, from + size)` of the buffered result to the writer.
    ///
    /// Ignored when nothing is buffered. The buffer belongs to the running
    /// query and is cleared when that query is torn down.
    pub async fn request_page(&self, from: i64, size: i64) {
        let (hits, total) = {
            let page = self.page.lock().await;
            if page.is_empty() {
                return;
            }
            let (start, end) = Filter::paged(from, size).page_bounds(page.len());
            (page[start..end].to_vec(), page.len())
        };

        if let Some(filter) = self.filter.lock().await.as_mut() {
            filter.from = from;
            filter.size = size;
        }

        let records = self.runs.lock().await.query.as_ref().map(Run::records);
        let delivered = match records {
            Some(records) => records.send(Output::Slice { hits, total }).await.is_ok(),
            None => false,
        };
        if !delivered {
            self.lifecycle.reporter().warn(
                MODULE,
                &format!("page request from {} dropped: no query is running", self.id),
            );
        }
    }

    async fn launch(self: &Arc<Self>, invocation: Invocation) {
        if self.channels_closed.load(Ordering::SeqCst) {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mode = invocation.mode;

        // Held across the start so an early exit cannot tear down a run
        // that has not been stored yet.
        let mut runs = self.runs.lock().await;
        match Run::start(self, invocation, generation) {
            Ok(run) => match mode {
                ReadMode::Units => runs.units = Some(run),
                ReadMode::Follow | ReadMode::Paged => runs.query = Some(run),
            },
            Err(e) => {
                drop(runs);
                self.lifecycle.reporter().error(MODULE, &e);
                self.close(CloseOptions::connection()).await;
            }
        }
    }

    /// Tear the session (or parts of it) down; see [`CloseOptions`].
    pub async fn close(&self, options: CloseOptions) {
        self.teardown(options, Scope::All).await;
    }

    pub(crate) async fn teardown(&self, options: CloseOptions, scope: Scope) {
        let _serial = self.teardown_lock.lock().await;

        if options.close_conn && self.active.swap(false, Ordering::SeqCst) {
            self.close_connection().await;
        }

        let runs = self.runs.lock().await.take(scope);
        if runs.iter().any(|run| run.mode != ReadMode::Units) {
            self.page.lock().await.clear();
        }
        for run in runs {
            tracing::debug!("stopping {:?} run {} of {}", run.mode, run.generation, self.id);
            run.stop(
                options.print_stderr,
                self.tuning.stderr_drain_timeout,
                self.lifecycle.reporter(),
            )
            .await;
        }

        if options.close_channels && !self.channels_closed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
            self.page.lock().await.clear();
        }

        tokio::time::sleep(self.tuning.settle_delay).await;
    }

    async fn close_connection(&self) {
        let Some(mut sink) = self.outbound.lock().await.take() else {
            return;
        };
        if let Err(e) = sink.send(Frame::close_normal("")).await {
            tracing::debug!("close frame to {} not delivered: {}", self.id, e);
        }
        let _ = sink.close().await;
    }

    pub(crate) async fn send_message(&self, message: &Message) -> Result<(), JrError> {
        let text = message.encode()?;
        let mut outbound = self.outbound.lock().await;
        let sink = outbound.as_mut().ok_or(TransportError::Closed)?;
        sink.send(Frame::Text(text)).await?;
        Ok(())
    }

    pub(crate) async fn page_window(&self) -> (i64, i64) {
        self.filter
            .lock()
            .await
            .as_ref()
            .map(|f| (f.from, f.size))
            .unwrap_or_default()
    }

    pub(crate) async fn store_page(&self, lines: Vec<String>) {
        *self.page.lock().await = lines;
    }

    /// Whether the browser connection is still served
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tracked for StreamingSession {
    fn is_active(&self) -> bool {
        StreamingSession::is_active(self)
    }

    async fn shutdown(&self) {
        self.close(CloseOptions::terminal()).await;
    }
}
