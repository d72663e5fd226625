//! The stage manager: process startup/teardown and the four-mode timing
//! protocol that decides when the child starts and when each stream is
//! bound.
//!
//! | Input mode   | Output mode  | Behavior                                   |
//! |--------------|--------------|--------------------------------------------|
//! | synchronous  | synchronous  | start on `run()`, stdin + stdout bound live |
//! | synchronous  | asynchronous | start on `run()`, output pumped after exit  |
//! | asynchronous | synchronous  | `run()` is a no-op, start on `close()`      |
//! | asynchronous | asynchronous | start on `close()`, output pumped after exit|

use std::io;
use std::sync::Arc;

use tokio::process::ChildStdout;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::command::CommandLine;
use crate::handler::{
    DiagnosticSink, InputHandler, InputMode, OutputHandler, OutputMode, RecordSink,
    StderrDiagnostics,
};
use crate::process::{self, ChildHandle, UNKNOWN_EXIT_STATUS};
use crate::pump::{self, Counters, HandlerFailure};
use crate::record::Record;

const SUCCESS: i32 = 0;

/// Hard failures surfaced to the caller of `run()`/`close()`.
///
/// Stream-level handler failures are deliberately absent: those are
/// contained and only observable through logs, the auxiliary
/// [`StageManager::handler_failures`] channel, and ultimately the child's
/// exit status.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The child could not be spawned.
    #[error("failed to launch {command}: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },

    /// A stream could not be bound to its handler.
    #[error("failed to bind {stream}: {source}")]
    Bind {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    /// The child terminated with a non-zero or never-reported status.
    #[error("{command} failed with exit status: {status}")]
    ProcessFailed { command: String, status: i32 },

    /// An operation was called outside the state that permits it.
    #[error("{op} is not valid in the {state} state")]
    InvalidState { op: &'static str, state: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unconfigured,
    Configured,
    /// Synchronous input: the child is live and accepting records.
    Running,
    /// Asynchronous input: no child yet; the input handler accumulates
    /// records until `close()` starts the process.
    Deferred,
    Closing,
    Succeeded,
    Failed,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Unconfigured => "unconfigured",
            State::Configured => "configured",
            State::Running => "running",
            State::Deferred => "deferred",
            State::Closing => "closing",
            State::Succeeded => "terminated (success)",
            State::Failed => "terminated (failed)",
        }
    }
}

/// Manages one external child process as a streaming transform stage.
///
/// Exactly one child per manager; no branch of the timing protocol starts
/// it twice and a terminated manager never restarts it. `configure` attaches
/// the handlers and the downstream sink, `run` executes the
/// synchronous-input branch, `add` pushes records, and `close` drives
/// termination and reports the final status.
///
/// `close()` blocks without a timeout: it waits on process exit and then on
/// both pumps, so a hung child or a stalled handler stalls the caller.
pub struct StageManager<R: Record> {
    command: CommandLine,
    state: State,
    input_mode: InputMode,
    output_mode: OutputMode,
    input_handler: Option<Box<dyn InputHandler<R>>>,
    output_handler: Option<Box<dyn OutputHandler<R>>>,
    sink: Option<Box<dyn RecordSink<R>>>,
    diagnostics: Arc<dyn DiagnosticSink>,
    child: Option<ChildHandle>,
    output_pump: Option<JoinHandle<()>>,
    error_pump: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
    failure_tx: mpsc::UnboundedSender<HandlerFailure>,
    failure_rx: Option<mpsc::UnboundedReceiver<HandlerFailure>>,
    exit_status: i32,
}

impl<R: Record> StageManager<R> {
    pub fn new(command: CommandLine) -> Self {
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        Self {
            command,
            state: State::Unconfigured,
            input_mode: InputMode::Synchronous,
            output_mode: OutputMode::Synchronous,
            input_handler: None,
            output_handler: None,
            sink: None,
            diagnostics: Arc::new(StderrDiagnostics),
            child: None,
            output_pump: None,
            error_pump: None,
            counters: Arc::new(Counters::default()),
            failure_tx,
            failure_rx: Some(failure_rx),
            exit_status: UNKNOWN_EXIT_STATUS,
        }
    }

    /// Replace the default stderr pass-through diagnostic sink.
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    /// Attach the handlers and the downstream sink, snapshotting both mode
    /// flags. Must be called exactly once, before `run()`.
    pub fn configure(
        &mut self,
        input_handler: Box<dyn InputHandler<R>>,
        output_handler: Box<dyn OutputHandler<R>>,
        sink: Box<dyn RecordSink<R>>,
    ) -> Result<(), StageError> {
        if self.state != State::Unconfigured {
            return Err(self.invalid("configure"));
        }
        self.input_mode = input_handler.input_mode();
        self.output_mode = output_handler.output_mode();
        self.input_handler = Some(input_handler);
        self.output_handler = Some(output_handler);
        self.sink = Some(sink);
        self.state = State::Configured;
        Ok(())
    }

    /// Auxiliary channel carrying contained handler failures.
    ///
    /// The child's exit status stays the authoritative failure signal; this
    /// channel exists so callers can observe the raw stream-level errors.
    /// The receiver can be taken at most once.
    pub fn handler_failures(&mut self) -> Option<mpsc::UnboundedReceiver<HandlerFailure>> {
        self.failure_rx.take()
    }

    /// Total bytes pushed through the input handler so far.
    pub fn input_bytes(&self) -> u64 {
        self.counters.input_bytes()
    }

    /// Total bytes delivered to the downstream sink so far.
    pub fn output_bytes(&self) -> u64 {
        self.counters.output_bytes()
    }

    /// Exit status of the child. Meaningful only after `close()` returns;
    /// before that it holds [`UNKNOWN_EXIT_STATUS`].
    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    /// Start the child now if input is synchronous; otherwise defer
    /// everything to `close()`.
    pub async fn run(&mut self) -> Result<(), StageError> {
        if self.state != State::Configured {
            return Err(self.invalid("run"));
        }

        if self.input_mode == InputMode::Asynchronous {
            self.state = State::Deferred;
            return Ok(());
        }

        // A failed start is terminal: the process is never retried, and a
        // child that did spawn has already been reaped by the error path.
        match self.start_running().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    async fn start_running(&mut self) -> Result<(), StageError> {
        let mut child = self.exec().await?;

        let Some(stdin) = child.take_stdin() else {
            child.terminate().await;
            return Err(StageError::Bind {
                stream: "stdin",
                source: io::Error::other("stdin not captured"),
            });
        };
        if let Some(handler) = self.input_handler.as_mut()
            && let Err(source) = handler.bind(stdin).await
        {
            child.terminate().await;
            return Err(StageError::Bind {
                stream: "stdin",
                source,
            });
        }

        self.child = Some(child);
        self.state = State::Running;
        Ok(())
    }

    /// Push one record through the input handler.
    ///
    /// Valid while the stage is accepting input: after `run()`, before
    /// `close()`. A put failure is contained: logged, reported on the
    /// auxiliary channel, and the handler is closed; records pushed after
    /// that are dropped with a warning rather than raised.
    pub async fn add(&mut self, record: R) -> Result<(), StageError> {
        if self.state != State::Running && self.state != State::Deferred {
            return Err(self.invalid("add"));
        }

        let Some(handler) = self.input_handler.as_mut() else {
            tracing::warn!("Record dropped: input handler closed after failure");
            return Ok(());
        };

        let size = record.size_bytes();
        match handler.put(record).await {
            Ok(()) => {
                self.counters.add_input(size);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Input handler failed");
                let _ = self.failure_tx.send(HandlerFailure::Input(e));
                if let Some(mut handler) = self.input_handler.take()
                    && let Err(e) = handler.close().await
                {
                    tracing::debug!(error = %e, "Closing failed input handler");
                }
                Ok(())
            }
        }
    }

    /// Drive the stage to termination and report the final status.
    ///
    /// Closes the input handler, starts the child if the asynchronous-input
    /// branch deferred it, waits for process exit, joins both pumps without
    /// a timeout, destroys the process handle, and converts a non-zero or
    /// unknown exit status into [`StageError::ProcessFailed`]. On success,
    /// an asynchronous output handler is bound, pumped, and awaited before
    /// returning.
    pub async fn close(&mut self) -> Result<(), StageError> {
        if self.state != State::Running && self.state != State::Deferred {
            return Err(self.invalid("close"));
        }
        self.state = State::Closing;

        // Closing the input handler is what lets pipe-backed children see
        // end-of-input and terminate.
        if let Some(mut handler) = self.input_handler.take()
            && let Err(e) = handler.close().await
        {
            tracing::warn!(error = %e, "Input handler close failed");
            let _ = self.failure_tx.send(HandlerFailure::Input(e));
        }

        // Asynchronous input: the child starts only now that its input is
        // finalized.
        let mut child = match self.child.take() {
            Some(child) => child,
            None => match self.exec().await {
                Ok(child) => child,
                Err(e) => {
                    self.state = State::Failed;
                    return Err(e);
                }
            },
        };

        self.exit_status = child.wait_for_exit().await;

        // Unbounded joins: buffered output and diagnostics must be flushed
        // before the caller proceeds.
        if let Some(pump) = self.output_pump.take()
            && let Err(e) = pump.await
        {
            tracing::warn!(error = %e, "Output pump task failed");
        }
        if let Some(pump) = self.error_pump.take()
            && let Err(e) = pump.await
        {
            tracing::warn!(error = %e, "Error pump task failed");
        }

        child.terminate().await;
        tracing::debug!(status = self.exit_status, "Child process exited");

        if self.exit_status != SUCCESS {
            self.state = State::Failed;
            return Err(StageError::ProcessFailed {
                command: self.command.to_string(),
                status: self.exit_status,
            });
        }

        // Asynchronous output: pump whatever artifact the finished child
        // left, synchronously.
        if self.output_mode == OutputMode::Asynchronous {
            if let Err(e) = self.start_output_pump(None).await {
                self.state = State::Failed;
                return Err(e);
            }
            if let Some(pump) = self.output_pump.take()
                && let Err(e) = pump.await
            {
                tracing::warn!(error = %e, "Output pump task failed");
            }
        }

        self.state = State::Succeeded;
        Ok(())
    }

    /// Spawn the child, begin the error pump immediately, and in
    /// synchronous output mode bind stdout and begin the output pump.
    ///
    /// On a post-spawn failure the child is terminated before the error
    /// returns, so no path hands back both an error and a live process.
    async fn exec(&mut self) -> Result<ChildHandle, StageError> {
        let mut child = process::spawn(&self.command).map_err(|source| StageError::Launch {
            command: self.command.to_string(),
            source,
        })?;

        if let Some(stderr) = child.take_stderr() {
            self.error_pump = Some(pump::spawn_error_pump(
                stderr,
                Arc::clone(&self.diagnostics),
                self.failure_tx.clone(),
            ));
        }

        if self.output_mode == OutputMode::Synchronous {
            let Some(stdout) = child.take_stdout() else {
                child.terminate().await;
                return Err(StageError::Bind {
                    stream: "stdout",
                    source: io::Error::other("stdout not captured"),
                });
            };
            if let Err(e) = self.start_output_pump(Some(stdout)).await {
                child.terminate().await;
                return Err(e);
            }
        }

        Ok(child)
    }

    async fn start_output_pump(&mut self, stdout: Option<ChildStdout>) -> Result<(), StageError> {
        let stream = if stdout.is_some() {
            "stdout"
        } else {
            "deferred output"
        };
        let mut handler = self
            .output_handler
            .take()
            .ok_or_else(|| self.invalid("output pump start"))?;
        handler
            .bind(stdout)
            .await
            .map_err(|source| StageError::Bind { stream, source })?;
        let sink = self
            .sink
            .take()
            .ok_or_else(|| self.invalid("output pump start"))?;
        self.output_pump = Some(pump::spawn_output_pump(
            handler,
            sink,
            Arc::clone(&self.counters),
            self.failure_tx.clone(),
        ));
        Ok(())
    }

    fn invalid(&self, op: &'static str) -> StageError {
        StageError::InvalidState {
            op,
            state: self.state.name(),
        }
    }
}
