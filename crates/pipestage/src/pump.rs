//! Background workers draining the child's stdout and stderr.
//!
//! Each pump is one spawned task bound to exactly one stream and one
//! handler. Pump failures never interrupt the caller; they are logged and
//! reported on the auxiliary failure channel, and the child's own exit
//! status stays the authoritative failure signal.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::handler::{DiagnosticSink, OutputHandler, RecordSink};
use crate::record::Record;

/// Input/output byte totals for a stage.
///
/// Each counter has a single writer: the caller's push path for input, the
/// output pump for output. Totals never decrease.
#[derive(Debug, Default)]
pub struct Counters {
    input_bytes: AtomicU64,
    output_bytes: AtomicU64,
}

impl Counters {
    pub(crate) fn add_input(&self, n: u64) {
        self.input_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_output(&self, n: u64) {
        self.output_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn input_bytes(&self) -> u64 {
        self.input_bytes.load(Ordering::Relaxed)
    }

    pub fn output_bytes(&self) -> u64 {
        self.output_bytes.load(Ordering::Relaxed)
    }
}

/// A handler failure observed on a pump or on the push path.
///
/// Contained failures: each is logged and reported on the channel returned
/// by [`crate::StageManager::handler_failures`], without raising an error
/// on the caller's path.
#[derive(Debug, thiserror::Error)]
pub enum HandlerFailure {
    #[error("input handler failed: {0}")]
    Input(#[source] io::Error),
    #[error("output handler failed: {0}")]
    Output(#[source] io::Error),
    #[error("error stream failed: {0}")]
    ErrorStream(#[source] io::Error),
}

/// Drain decoded records from the output handler into the sink until
/// end-of-stream, keeping the output byte counter current.
pub(crate) fn spawn_output_pump<R: Record>(
    mut handler: Box<dyn OutputHandler<R>>,
    mut sink: Box<dyn RecordSink<R>>,
    counters: Arc<Counters>,
    failures: mpsc::UnboundedSender<HandlerFailure>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match handler.next().await {
                Ok(Some(record)) => {
                    let size = record.size_bytes();
                    sink.accept(record).await;
                    counters.add_output(size);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Output handler failed");
                    let _ = failures.send(HandlerFailure::Output(e));
                    if let Err(e) = handler.close().await {
                        tracing::debug!(error = %e, "Closing failed output handler");
                    }
                    return;
                }
            }
        }

        if let Err(e) = handler.close().await {
            tracing::debug!(error = %e, "Closing output handler");
        }
        tracing::debug!("Output pump done");
    })
}

/// Forward the child's stderr to the diagnostic sink, line by line, each
/// line's newline restored, in the order the child wrote them.
pub(crate) fn spawn_error_pump(
    stderr: ChildStderr,
    sink: Arc<dyn DiagnosticSink>,
    failures: mpsc::UnboundedSender<HandlerFailure>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => sink.write_line(&format!("{line}\n")),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Error stream read failed");
                    let _ = failures.send(HandlerFailure::ErrorStream(e));
                    break;
                }
            }
        }
        tracing::debug!("Error pump done");
    })
}
