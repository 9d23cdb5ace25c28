//! One journal invocation and the workers attached to it

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use jr_core::error::SessionError;
use jr_core::{Reporter, Severity};

use super::writer::{Output, Writer};
use super::{Scope, StreamingSession, MODULE};
use crate::journal::{Invocation, ReadMode};

/// A running (or finished but not yet torn down) invocation
pub(super) struct Run {
    pub(super) generation: u64,
    pub(super) mode: ReadMode,
    cancel: CancellationToken,
    kill: CancellationToken,
    exited: CancellationToken,
    readers: TaskTracker,
    records: mpsc::Sender<Output>,
    stderr: mpsc::Receiver<String>,
    writer_stop: CancellationToken,
    writer: JoinHandle<()>,
}

impl Run {
    /// Spawn the child process and attach its workers.
    pub(super) fn start(
        session: &Arc<StreamingSession>,
        invocation: Invocation,
        generation: u64,
    ) -> Result<Self, SessionError> {
        let program = invocation.program.display().to_string();
        tracing::debug!("spawning {} {:?}", program, invocation.args);

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(SessionError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SessionError::Pipe("stderr"))?;

        let capacity = session.tuning.channel_capacity.max(1);
        let (records_tx, records_rx) = mpsc::channel(capacity);
        let (stderr_tx, stderr_rx) = mpsc::channel(capacity);

        let cancel = session.cancel.child_token();
        let kill = CancellationToken::new();
        let exited = CancellationToken::new();
        let writer_stop = session.cancel.child_token();
        let reporter = session.lifecycle.reporter().clone();
        let (status_tx, status_rx) = watch::channel(None);

        let readers = TaskTracker::new();
        readers.spawn(read_stdout(
            stdout,
            invocation.mode,
            records_tx.clone(),
            status_rx,
            cancel.clone(),
            kill.clone(),
            reporter.clone(),
        ));
        readers.spawn(read_stderr(stderr, stderr_tx, cancel.clone(), reporter));
        readers.close();

        session.lifecycle.spawn(wait_process(
            Arc::clone(session),
            child,
            kill.clone(),
            exited.clone(),
            status_tx,
            generation,
            program,
        ));

        let writer = Writer::new(Arc::clone(session), invocation.mode, generation);
        let writer = session
            .lifecycle
            .spawn(writer.run(records_rx, writer_stop.clone()));

        Ok(Self {
            generation,
            mode: invocation.mode,
            cancel,
            kill,
            exited,
            readers,
            records: records_tx,
            stderr: stderr_rx,
            writer_stop,
            writer,
        })
    }

    /// Producer handle used to push buffered pages to the writer
    pub(super) fn records(&self) -> mpsc::Sender<Output> {
        self.records.clone()
    }

    /// Stop the process and every worker of this run.
    ///
    /// When the process already exited on its own, the readers and the
    /// writer get up to `drain_timeout` to flush what is left before they
    /// are cancelled.
    pub(super) async fn stop(mut self, print_stderr: bool, drain_timeout: Duration, reporter: &Reporter) {
        if print_stderr {
            self.drain_stderr(drain_timeout, reporter).await;
        }

        let natural = self.exited.is_cancelled();
        if natural {
            let _ = tokio::time::timeout(drain_timeout, self.readers.wait()).await;
        }
        self.kill.cancel();
        self.cancel.cancel();
        self.readers.wait().await;

        drop(self.records);
        if !natural {
            self.writer_stop.cancel();
        }
        let joined = match tokio::time::timeout(drain_timeout, &mut self.writer).await {
            Ok(joined) => joined,
            Err(_) => {
                self.writer_stop.cancel();
                (&mut self.writer).await
            }
        };
        if let Err(e) = joined {
            if e.is_panic() {
                reporter.report(MODULE, Severity::Error, &format!("writer panicked: {}", e), false, true);
            }
        }
    }

    async fn drain_stderr(&mut self, timeout: Duration, reporter: &Reporter) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.stderr.recv()).await {
                Ok(Some(line)) => reporter.error(MODULE, &SessionError::Stderr(line)),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("stopped draining stderr after {:?}", timeout);
                    break;
                }
            }
        }
    }
}

/// Feed stdout into the record queue.
///
/// Follow mode forwards line by line. The other modes read the whole
/// output exactly once and hold it until the exit status is known: only a
/// successful exit forwards the output, anything else forwards `Failed`.
async fn read_stdout(
    stdout: ChildStdout,
    mode: ReadMode,
    tx: mpsc::Sender<Output>,
    mut status: watch::Receiver<Option<bool>>,
    cancel: CancellationToken,
    kill: CancellationToken,
    reporter: Reporter,
) {
    let outcome = match mode {
        ReadMode::Follow => {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => return,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) if line.is_empty() => continue,
                    Ok(Some(line)) => {
                        if !forward(&tx, &cancel, Output::Line(line)).await {
                            return;
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(source) => break Err(SessionError::Read {
                        stream: "stdout",
                        source,
                    }),
                }
            }
        }
        ReadMode::Paged | ReadMode::Units => {
            let mut stdout = stdout;
            let mut buf = String::new();
            let read = tokio::select! {
                _ = cancel.cancelled() => return,
                read = stdout.read_to_string(&mut buf) => read,
            };
            match read {
                Ok(_) => {
                    let succeeded = tokio::select! {
                        _ = cancel.cancelled() => return,
                        exit = status.wait_for(Option::is_some) => {
                            exit.map(|exit| *exit == Some(true)).unwrap_or(false)
                        }
                    };
                    if kill.is_cancelled() {
                        return;
                    }
                    let output = if succeeded {
                        Output::Whole(buf)
                    } else {
                        Output::Failed
                    };
                    forward(&tx, &cancel, output).await;
                    return;
                }
                Err(source) => Err(SessionError::Read {
                    stream: "stdout",
                    source,
                }),
            }
        }
    };

    if kill.is_cancelled() {
        return;
    }
    match outcome {
        Ok(()) => reporter.info(MODULE, &"journal output reached EOF"),
        Err(e) => reporter.error(MODULE, &e),
    }
    forward(&tx, &cancel, Output::Failed).await;
}

async fn forward(tx: &mpsc::Sender<Output>, cancel: &CancellationToken, output: Output) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(output) => sent.is_ok(),
    }
}

/// Keep the most recent diagnostics for teardown; drop lines when full
async fn read_stderr(
    stderr: ChildStderr,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    reporter: Reporter,
) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if tx.try_send(line).is_err() {
                    tracing::debug!("stderr queue full, dropping diagnostic line");
                }
            }
            Ok(None) => return,
            Err(source) => {
                reporter.error(
                    MODULE,
                    &SessionError::Read {
                        stream: "stderr",
                        source,
                    },
                );
                return;
            }
        }
    }
}

/// Own the child until it exits or is killed.
///
/// A natural exit with a failure status tears down this run with stderr
/// capture; an exit caused by `kill` is not a failure. `exited` marks a
/// natural exit and `outcome` carries whether it succeeded.
async fn wait_process(
    session: Arc<StreamingSession>,
    mut child: Child,
    kill: CancellationToken,
    exited: CancellationToken,
    outcome: watch::Sender<Option<bool>>,
    generation: u64,
    program: String,
) {
    let status = tokio::select! {
        _ = kill.cancelled() => {
            if let Err(e) = child.start_kill() {
                tracing::debug!("{} already gone: {}", program, e);
            }
            let _ = child.wait().await;
            return;
        }
        status = child.wait() => status,
    };
    outcome.send_replace(Some(matches!(&status, Ok(s) if s.success())));
    exited.cancel();

    match status {
        Ok(status) if status.success() => {
            tracing::debug!("{} exited", program);
        }
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            if code == -1 {
                tracing::debug!("{} terminated by signal", program);
                return;
            }
            session.lifecycle.reporter().error(
                MODULE,
                &SessionError::AbnormalExit {
                    program: program.clone(),
                    code,
                },
            );
            session
                .teardown(
                    super::CloseOptions {
                        print_stderr: true,
                        ..Default::default()
                    },
                    Scope::Generation(generation),
                )
                .await;
        }
        Err(e) => {
            session
                .lifecycle
                .reporter()
                .error(MODULE, &format!("failed to wait for {}: {}", program, e));
        }
    }
}
