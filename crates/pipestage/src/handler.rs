//! Contracts for the external collaborators of a stage.
//!
//! Serialization into and out of the child's byte streams lives behind
//! these traits; the manager only decides when each one is bound and
//! driven. Each handler declares its mode once, and the mode never changes
//! after the handlers are attached.

use std::io;

use async_trait::async_trait;
use tokio::process::{ChildStdin, ChildStdout};

use crate::record::Record;

/// When the child's stdin can be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Records are written to the live child's stdin.
    Synchronous,
    /// Input is finalized before the child starts (e.g. a side file the
    /// child reads).
    Asynchronous,
}

/// When the child's stdout becomes readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Records are decoded from stdout while the child runs.
    Synchronous,
    /// Output is retrieved after the child exits (e.g. a side artifact the
    /// child wrote).
    Asynchronous,
}

/// Serializes outgoing records into the child's input.
#[async_trait]
pub trait InputHandler<R: Record>: Send {
    fn input_mode(&self) -> InputMode;

    /// Attach the live child's stdin. Called only in synchronous input
    /// mode.
    async fn bind(&mut self, stdin: ChildStdin) -> io::Result<()>;

    async fn put(&mut self, record: R) -> io::Result<()>;

    /// Finalize input. For pipe-backed handlers this drops the child's
    /// stdin, which is what lets the child see end-of-input and terminate.
    async fn close(&mut self) -> io::Result<()>;
}

/// Decodes records produced by the child.
#[async_trait]
pub trait OutputHandler<R: Record>: Send {
    fn output_mode(&self) -> OutputMode;

    /// Attach the output source: `Some` carries the live child's stdout in
    /// synchronous mode, `None` tells an asynchronous handler to open
    /// whatever artifact the finished child produced.
    async fn bind(&mut self, stdout: Option<ChildStdout>) -> io::Result<()>;

    /// Next decoded record, or `None` at end of stream.
    async fn next(&mut self) -> io::Result<Option<R>>;

    async fn close(&mut self) -> io::Result<()>;
}

/// Downstream consumer of produced records. Assumed non-blocking or
/// internally buffering.
#[async_trait]
pub trait RecordSink<R: Record>: Send {
    async fn accept(&mut self, record: R);
}

/// Receives the child's stderr, one line at a time.
///
/// Each delivered line is terminated by a single newline regardless of how
/// the child flushed it, in the order the child wrote it.
pub trait DiagnosticSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Default diagnostic sink: pass the child's stderr through to our own.
#[derive(Debug, Default)]
pub struct StderrDiagnostics;

impl DiagnosticSink for StderrDiagnostics {
    fn write_line(&self, line: &str) {
        eprint!("{line}");
    }
}
