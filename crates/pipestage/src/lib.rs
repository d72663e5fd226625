//! pipestage: manages one external executable as a streaming transform
//! stage in a data pipeline.
//!
//! The stage manager starts the child process, feeds it input records via
//! stdin, collects output records and stderr diagnostics, and reports a
//! terminal status. Record serialization lives behind the handler contracts
//! in [`handler`]; when each stream is bound depends on the handlers'
//! input/output modes, and that timing protocol lives in [`manager`].

mod command;
mod handler;
mod manager;
mod process;
mod pump;
mod record;

#[cfg(test)]
mod testutil;

pub use command::CommandLine;
pub use handler::{
    DiagnosticSink, InputHandler, InputMode, OutputHandler, OutputMode, RecordSink,
    StderrDiagnostics,
};
pub use manager::{StageError, StageManager};
pub use process::UNKNOWN_EXIT_STATUS;
pub use pump::{Counters, HandlerFailure};
pub use record::Record;
