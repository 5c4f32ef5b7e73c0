//! Error types for storepush-sync.
//!
//! Every variant is terminal for the current phase.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use storepush_core::{CommandOutput, ConfigError, Invocation, RunnerError, SnapshotError};

/// Exit status of an external process; `None` when killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub Option<i32>);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "killed by signal"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// The cache endpoint could not be determined.
    #[error("cannot resolve cache endpoint: {0}")]
    Resolution(String),

    /// A value written to the nix configuration is not visible in the
    /// effective configuration.
    #[error("effective nix configuration does not contain `{missing}`; the substituter was not registered")]
    ConfigVerification { missing: String },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// The root-descriptor probe returned neither "found" nor "not found".
    #[error("cannot tell whether {url} is initialized: {detail}")]
    InitializationProbe { url: String, detail: String },

    /// An external tool exited non-zero.
    #[error("`{command}` failed ({code}): {stderr}")]
    UtilityInvocation {
        command: String,
        code: ExitCode,
        stderr: String,
    },

    /// The store listing call exited non-zero.
    #[error("store listing failed ({code}): {stderr}")]
    StoreQuery { code: ExitCode, stderr: String },

    /// The push utility exited non-zero.
    #[error("push of {artifacts} store path(s) failed ({code}): {stderr}")]
    PushFailed {
        artifacts: usize,
        code: ExitCode,
        stderr: String,
    },

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// [`SyncError::UtilityInvocation`] for a finished, failed command.
pub(crate) fn utility_failure(invocation: &Invocation, output: &CommandOutput) -> SyncError {
    SyncError::UtilityInvocation {
        command: invocation.command_line(),
        code: ExitCode(output.code),
        stderr: output.stderr.trim().to_string(),
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
