//! Child process lifecycle: spawn, stream capture, wait, teardown.

use std::io;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::command::CommandLine;

/// Exit status before the child has terminated, and the value reported when
/// the OS never produced one (e.g. death by signal).
pub const UNKNOWN_EXIT_STATUS: i32 = -127;

/// Handle to the single child process owned by a stage.
#[derive(Debug)]
pub(crate) struct ChildHandle {
    child: Child,
}

/// Spawn the child with all three streams piped.
///
/// Argument unquoting happens here, once, just before the spawn.
pub(crate) fn spawn(command: &CommandLine) -> io::Result<ChildHandle> {
    let argv = command.unquoted_argv();
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argument vector"))?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    tracing::debug!(command = %command, pid = child.id(), "Started child process");
    Ok(ChildHandle { child })
}

impl ChildHandle {
    pub(crate) fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub(crate) fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub(crate) fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Block until the child terminates and return its exit status.
    ///
    /// Wait-level failures are swallowed so teardown always proceeds; the
    /// status stays at the unknown sentinel in that case. A signal death
    /// also reports the sentinel.
    pub(crate) async fn wait_for_exit(&mut self) -> i32 {
        match self.child.wait().await {
            Ok(status) => status.code().unwrap_or(UNKNOWN_EXIT_STATUS),
            Err(e) => {
                tracing::warn!(error = %e, "Wait for child process failed");
                UNKNOWN_EXIT_STATUS
            }
        }
    }

    /// Forcibly release process resources. Safe on an already-exited child.
    pub(crate) async fn terminate(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::trace!(error = %e, "Kill after exit");
        }
    }
}
