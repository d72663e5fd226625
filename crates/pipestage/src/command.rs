//! Command-line description of the external executable.

use std::fmt;

/// Immutable executable-plus-arguments description for the child process.
///
/// An argument bounded by a matching pair of single quotes is unquoted once
/// at spawn time; everything else passes through verbatim. The `Display`
/// form (space-joined argv) is what failure payloads carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    argv: Vec<String>,
}

impl CommandLine {
    pub fn new(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Argument vector with matched single-quote pairs stripped.
    pub(crate) fn unquoted_argv(&self) -> Vec<String> {
        self.argv.iter().map(|arg| unquote(arg)).collect()
    }
}

fn unquote(arg: &str) -> String {
    if arg.len() >= 2 && arg.starts_with('\'') && arg.ends_with('\'') {
        arg[1..arg.len() - 1].to_string()
    } else {
        arg.to_string()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}
