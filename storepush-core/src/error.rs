//! Error types for storepush-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while assembling an [`crate::ActionConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not provided by any layer.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    /// A setting was provided but could not be interpreted.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The configuration file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error; carries serde_yaml's line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors raised by the snapshot recorder.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The setup phase never recorded a snapshot for this state directory.
    #[error("no pre-build snapshot at {path}; did the setup phase run?")]
    Missing { path: PathBuf },

    /// The stored payload is not a snapshot (partial write or tampering).
    #[error("malformed pre-build snapshot at {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// The snapshot belongs to another run.
    #[error("pre-build snapshot was recorded by run `{recorded}`, refusing to reuse it in run `{current}`")]
    Stale { recorded: String, current: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while running an external command.
///
/// A command that runs and exits non-zero is *not* an error at this level;
/// callers inspect [`crate::CommandOutput::code`].
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The scripted runner has no response for this command line.
    #[error("no scripted response for `{command}`")]
    Unscripted { command: String },
}

/// Convenience constructor for [`SnapshotError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.into(),
        source,
    }
}
