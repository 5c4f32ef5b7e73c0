//! Host automation interface (GitHub Actions workflow commands).
//!
//! Under Actions, steps are framed with `::group::`/`::endgroup::`, fatal
//! errors become one `::error::` line, outputs and state go to the files
//! named by `$GITHUB_OUTPUT` and `$GITHUB_STATE`, and secrets are masked.
//! Elsewhere the same calls degrade to plain log lines.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{io_err, SyncError};

enum Sink {
    Stdout,
    Buffer(Arc<Mutex<Vec<u8>>>),
}

pub struct Host {
    actions: bool,
    output_file: Option<PathBuf>,
    state_file: Option<PathBuf>,
    sink: Sink,
}

impl Host {
    /// Host for the current process, writing workflow commands to stdout.
    pub fn new(actions: bool, output_file: Option<PathBuf>, state_file: Option<PathBuf>) -> Self {
        Self {
            actions,
            output_file,
            state_file,
            sink: Sink::Stdout,
        }
    }

    /// Host writing workflow commands into a shared buffer instead of stdout.
    pub fn buffered(
        actions: bool,
        output_file: Option<PathBuf>,
        state_file: Option<PathBuf>,
    ) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let host = Self {
            actions,
            output_file,
            state_file,
            sink: Sink::Buffer(Arc::clone(&buffer)),
        };
        (host, buffer)
    }

    fn emit(&self, line: &str) {
        match &self.sink {
            Sink::Stdout => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                let _ = writeln!(lock, "{line}");
                let _ = lock.flush();
            }
            Sink::Buffer(buffer) => {
                let mut buffer = buffer.lock().unwrap_or_else(|p| p.into_inner());
                let _ = writeln!(buffer, "{line}");
            }
        }
    }

    /// Open a log group; it closes when the guard drops.
    pub fn group(&self, title: &str) -> Group<'_> {
        if self.actions {
            self.emit(&format!("::group::storepush: {title}"));
        } else {
            tracing::info!("==> {title}");
        }
        Group { host: self }
    }

    /// Ask the host to redact `secret` from all later log output.
    pub fn mask(&self, secret: &str) {
        if !self.actions {
            return;
        }
        for line in secret.lines().map(str::trim).filter(|l| !l.is_empty()) {
            self.emit(&format!("::add-mask::{line}"));
        }
    }

    /// Publish a step output.
    pub fn set_output(&self, name: &str, value: &str) -> Result<(), SyncError> {
        match &self.output_file {
            Some(path) => append_key_value(path, name, value),
            None => {
                tracing::info!(name, value, "output");
                Ok(())
            }
        }
    }

    /// Save a value the post step can read back as `STATE_<name>`.
    pub fn save_state(&self, name: &str, value: &str) -> Result<(), SyncError> {
        match &self.state_file {
            Some(path) => append_key_value(path, name, value),
            None => {
                tracing::debug!(name, value, "no state file; state not saved");
                Ok(())
            }
        }
    }

    /// Report the single terminal failure of the run.
    pub fn fail(&self, message: &str) {
        if self.actions {
            self.emit(&format!("::error::{}", escape_data(message)));
        } else {
            tracing::error!("{message}");
        }
    }
}

/// Closes its log group on drop.
pub struct Group<'a> {
    host: &'a Host,
}

impl Drop for Group<'_> {
    fn drop(&mut self) {
        if self.host.actions {
            self.host.emit("::endgroup::");
        }
    }
}

/// Workflow-command data escaping.
pub fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn append_key_value(path: &Path, name: &str, value: &str) -> Result<(), SyncError> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    let entry = if value.contains('\n') {
        let delimiter = format!("storepush_{}", std::process::id());
        format!("{name}<<{delimiter}\n{value}\n{delimiter}\n")
    } else {
        format!("{name}={value}\n")
    };
    file.write_all(entry.as_bytes()).map_err(|e| io_err(path, e))
}
