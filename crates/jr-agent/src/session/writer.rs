//! Writer loop: turns reader output into `data` messages

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use jr_core::Severity;
use jr_protocol::{DataPayload, Filter, LogRecord, Message, Page};

use super::{CloseOptions, StreamingSession, MODULE};
use crate::error::AdapterError;
use crate::journal::{build_unit_map, sort_by_timestamp, to_log_record, RawEntry, ReadMode};

/// Items flowing from the readers (and page requests) to the writer
#[derive(Debug)]
pub(crate) enum Output {
    /// One follow-mode record line
    Line(String),
    /// Complete output of a paged query or unit listing
    Whole(String),
    /// A page cut from the buffered result
    Slice { hits: Vec<String>, total: usize },
    /// The reader failed; the browser gets `data: null`
    Failed,
}

pub(super) struct Writer {
    session: Arc<StreamingSession>,
    mode: ReadMode,
    generation: u64,
}

impl Writer {
    pub(super) fn new(session: Arc<StreamingSession>, mode: ReadMode, generation: u64) -> Self {
        Self {
            session,
            mode,
            generation,
        }
    }

    pub(super) async fn run(self, mut rx: mpsc::Receiver<Output>, stop: CancellationToken) {
        loop {
            let output = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                output = rx.recv() => match output {
                    Some(output) => output,
                    None => break,
                },
            };

            let message = match self.convert(output).await {
                Ok(message) => message,
                Err(e) => {
                    self.reporter().report(MODULE, Severity::Error, &e, false, true);
                    self.close_session();
                    break;
                }
            };
            self.write(&message).await;
        }
    }

    async fn write(&self, message: &Message) {
        if let Err(e) = self.session.send_message(message).await {
            self.reporter().warn(MODULE, &e);
        }
    }

    /// Corrupt journal output ends the session. Teardown waits for the
    /// writer, so it runs from a separate task.
    fn close_session(&self) {
        let session = Arc::clone(&self.session);
        tracing::warn!(
            "closing session {} after bad output of run {}",
            session.id(),
            self.generation
        );
        self.session
            .lifecycle
            .spawn(async move { session.close(CloseOptions::terminal()).await });
    }

    async fn convert(&self, output: Output) -> Result<Message, AdapterError> {
        let payload: DataPayload = match output {
            Output::Failed => return Ok(Message::Data(None)),
            Output::Line(line) => {
                let raw: RawEntry = serde_json::from_str(&line)?;
                self.record(&raw).into()
            }
            Output::Whole(text) if self.mode == ReadMode::Units => {
                build_unit_map(&text, self.session.tuning.flavor)?.into()
            }
            Output::Whole(text) => self.first_page(&text).await?.into(),
            Output::Slice { hits, total } => self.page(&hits, total)?.into(),
        };
        Ok(Message::Data(Some(payload)))
    }

    /// Buffer the sorted result and cut the page the filter asks for
    async fn first_page(&self, text: &str) -> Result<Page, AdapterError> {
        let mut lines: Vec<String> = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        sort_by_timestamp(&mut lines);

        let (from, size) = self.session.page_window().await;
        let (start, end) = Filter::paged(from, size).page_bounds(lines.len());
        let page = self.page(&lines[start..end], lines.len())?;

        self.session.store_page(lines).await;
        Ok(page)
    }

    fn page(&self, hits: &[String], total: usize) -> Result<Page, AdapterError> {
        let hits = hits
            .iter()
            .map(|line| {
                serde_json::from_str::<RawEntry>(line).map(|raw| self.record(&raw))
            })
            .collect::<Result<Vec<LogRecord>, _>>()?;
        Ok(Page { total, hits })
    }

    fn record(&self, raw: &RawEntry) -> LogRecord {
        let (record, issue) = to_log_record(raw);
        if let Some(issue) = issue {
            self.reporter().report(MODULE, Severity::Error, &issue, false, true);
        }
        record
    }

    fn reporter(&self) -> &jr_core::Reporter {
        self.session.lifecycle.reporter()
    }
}
