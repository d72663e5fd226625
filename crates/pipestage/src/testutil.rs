//! Test doubles for the handler and sink contracts.
//!
//! Records are newline-terminated `String`s throughout: the pipe-backed
//! handlers move the bytes verbatim, so the input and output byte counters
//! can be compared directly in tests.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};

use crate::handler::{
    DiagnosticSink, InputHandler, InputMode, OutputHandler, OutputMode, RecordSink,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Synchronous input: writes each record verbatim to the live child's
/// stdin.
pub struct PipeInputHandler {
    stdin: Option<ChildStdin>,
}

impl PipeInputHandler {
    pub fn new() -> Self {
        Self { stdin: None }
    }
}

#[async_trait]
impl InputHandler<String> for PipeInputHandler {
    fn input_mode(&self) -> InputMode {
        InputMode::Synchronous
    }

    async fn bind(&mut self, stdin: ChildStdin) -> io::Result<()> {
        self.stdin = Some(stdin);
        Ok(())
    }

    async fn put(&mut self, record: String) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::other("stdin not bound"))?;
        stdin.write_all(record.as_bytes()).await?;
        stdin.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        // Dropping the pipe is what signals end-of-input to the child.
        self.stdin.take();
        Ok(())
    }
}

/// Asynchronous input: accumulates records and writes them to a file the
/// child will read, at close time.
pub struct FileInputHandler {
    path: PathBuf,
    buf: String,
}

impl FileInputHandler {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            buf: String::new(),
        }
    }
}

#[async_trait]
impl InputHandler<String> for FileInputHandler {
    fn input_mode(&self) -> InputMode {
        InputMode::Asynchronous
    }

    async fn bind(&mut self, _stdin: ChildStdin) -> io::Result<()> {
        Err(io::Error::other("asynchronous input is never bound to stdin"))
    }

    async fn put(&mut self, record: String) -> io::Result<()> {
        self.buf.push_str(&record);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        fs::write(&self.path, &self.buf).await
    }
}

/// Synchronous input handler whose bind always fails.
pub struct BrokenBindInputHandler;

#[async_trait]
impl InputHandler<String> for BrokenBindInputHandler {
    fn input_mode(&self) -> InputMode {
        InputMode::Synchronous
    }

    async fn bind(&mut self, _stdin: ChildStdin) -> io::Result<()> {
        Err(io::Error::other("bind refused"))
    }

    async fn put(&mut self, _record: String) -> io::Result<()> {
        Err(io::Error::other("stdin not bound"))
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Synchronous output: decodes newline-terminated records from the live
/// child's stdout.
pub struct PipeOutputHandler {
    reader: Option<BufReader<ChildStdout>>,
}

impl PipeOutputHandler {
    pub fn new() -> Self {
        Self { reader: None }
    }
}

#[async_trait]
impl OutputHandler<String> for PipeOutputHandler {
    fn output_mode(&self) -> OutputMode {
        OutputMode::Synchronous
    }

    async fn bind(&mut self, stdout: Option<ChildStdout>) -> io::Result<()> {
        let stdout = stdout.ok_or_else(|| io::Error::other("expected live stdout"))?;
        self.reader = Some(BufReader::new(stdout));
        Ok(())
    }

    async fn next(&mut self) -> io::Result<Option<String>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| io::Error::other("stdout not bound"))?;
        let mut line = String::new();
        match reader.read_line(&mut line).await? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.reader.take();
        Ok(())
    }
}

/// Asynchronous output: reads newline-terminated records from an artifact
/// after the child has exited. Refuses a live stdout, so a mistimed bind
/// fails the test.
pub struct FileOutputHandler {
    path: PathBuf,
    pending: VecDeque<String>,
}

impl FileOutputHandler {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl OutputHandler<String> for FileOutputHandler {
    fn output_mode(&self) -> OutputMode {
        OutputMode::Asynchronous
    }

    async fn bind(&mut self, stdout: Option<ChildStdout>) -> io::Result<()> {
        if stdout.is_some() {
            return Err(io::Error::other("expected deferred artifact, got live stdout"));
        }
        let text = fs::read_to_string(&self.path).await?;
        self.pending = text.split_inclusive('\n').map(String::from).collect();
        Ok(())
    }

    async fn next(&mut self) -> io::Result<Option<String>> {
        Ok(self.pending.pop_front())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Synchronous output handler driven by a script: yields the given records,
/// then either ends the stream or fails.
pub struct ScriptedOutputHandler {
    records: VecDeque<String>,
    fail_at_end: bool,
    fail_on_bind: bool,
    stdout: Option<ChildStdout>,
    closed: Arc<Mutex<bool>>,
}

impl ScriptedOutputHandler {
    pub fn new(records: Vec<String>) -> Self {
        Self {
            records: records.into(),
            fail_at_end: false,
            fail_on_bind: false,
            stdout: None,
            closed: Arc::new(Mutex::new(false)),
        }
    }

    pub fn failing(records: Vec<String>) -> Self {
        Self {
            fail_at_end: true,
            ..Self::new(records)
        }
    }

    pub fn bind_failing() -> Self {
        Self {
            fail_on_bind: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn closed_flag(&self) -> Arc<Mutex<bool>> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl OutputHandler<String> for ScriptedOutputHandler {
    fn output_mode(&self) -> OutputMode {
        OutputMode::Synchronous
    }

    async fn bind(&mut self, stdout: Option<ChildStdout>) -> io::Result<()> {
        if self.fail_on_bind {
            return Err(io::Error::other("bind refused"));
        }
        // Retain the live stdout handle; dropping it here would close the
        // child's pipe mid-run.
        self.stdout = stdout;
        Ok(())
    }

    async fn next(&mut self) -> io::Result<Option<String>> {
        match self.records.pop_front() {
            Some(record) => Ok(Some(record)),
            None if self.fail_at_end => Err(io::Error::other("scripted decode failure")),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Sink collecting records for assertions.
#[derive(Clone, Default)]
pub struct VecSink {
    records: Arc<Mutex<Vec<String>>>,
}

impl VecSink {
    pub fn records(&self) -> Vec<String> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink<String> for VecSink {
    async fn accept(&mut self, record: String) {
        self.records.lock().unwrap().push(record);
    }
}

/// Diagnostic sink capturing the child's stderr text.
#[derive(Clone, Default)]
pub struct CapturedDiagnostics {
    text: Arc<Mutex<String>>,
}

impl CapturedDiagnostics {
    pub fn text(&self) -> String {
        self.text.lock().unwrap().clone()
    }
}

impl DiagnosticSink for CapturedDiagnostics {
    fn write_line(&self, line: &str) {
        self.text.lock().unwrap().push_str(line);
    }
}
