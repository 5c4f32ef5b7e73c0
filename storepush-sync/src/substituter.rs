//! Registers the cache as an extra substituter in the user's nix
//! configuration.
//!
//! 1. Derive the public key from the signing key (`nix key
//!    convert-secret-to-public`).
//! 2. Write `<state>/nix.conf` with `extra-substituters` and
//!    `extra-trusted-public-keys`.
//! 3. Append `include <state>/nix.conf` to the user-level `nix.conf` unless
//!    the line is already there.
//! 4. Re-read `nix show-config` and require both values verbatim.

use std::io::Write;
use std::path::Path;

use storepush_core::{CommandRunner, Endpoint, Repository, StateLayout};

use crate::error::{io_err, utility_failure, ExitCode, SyncError};
use crate::nix;

/// Values written into the nix configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub substituter: String,
    pub public_key: String,
}

impl Registration {
    /// Contents of the generated `nix.conf` fragment.
    pub fn fragment(&self) -> String {
        format!(
            "extra-substituters = {}\nextra-trusted-public-keys = {}\n",
            self.substituter, self.public_key
        )
    }
}

/// `<endpoint>/<registry>/<p1>/<p2>[?priority=<n>]`
pub fn substituter_url(endpoint: &Endpoint, repository: &Repository, priority: Option<u32>) -> String {
    let url = repository.cache_url(endpoint);
    match priority {
        Some(priority) => format!("{url}?priority={priority}"),
        None => url,
    }
}

/// Derive the public half of `signing_key`.
pub fn public_key(runner: &dyn CommandRunner, nix_bin: &str, signing_key: &str) -> Result<String, SyncError> {
    let invocation = nix::command(nix_bin, ["key", "convert-secret-to-public"]).stdin(signing_key);
    let output = runner.run(&invocation)?;
    if !output.success() {
        return Err(utility_failure(&invocation, &output));
    }
    let key = output.stdout.trim().to_string();
    if key.is_empty() {
        return Err(SyncError::UtilityInvocation {
            command: invocation.command_line(),
            code: ExitCode(output.code),
            stderr: "no public key printed".to_string(),
        });
    }
    Ok(key)
}

/// Write the fragment, include it from `user_conf`, and verify the result.
pub fn register(
    runner: &dyn CommandRunner,
    nix_bin: &str,
    layout: &StateLayout,
    user_conf: &Path,
    registration: &Registration,
) -> Result<(), SyncError> {
    layout.ensure().map_err(|e| io_err(layout.root(), e))?;
    let fragment_path = layout.nix_conf();
    std::fs::write(&fragment_path, registration.fragment()).map_err(|e| io_err(&fragment_path, e))?;

    include_fragment(user_conf, &fragment_path)?;
    verify(runner, nix_bin, registration)?;
    tracing::info!(substituter = %registration.substituter, "registered substituter");
    Ok(())
}

/// Append `include <fragment>` to `user_conf` (creating it) unless present.
pub fn include_fragment(user_conf: &Path, fragment: &Path) -> Result<(), SyncError> {
    let line = format!("include {}", fragment.display());
    let existing = match std::fs::read_to_string(user_conf) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(io_err(user_conf, err)),
    };
    if existing.lines().any(|l| l.trim() == line) {
        tracing::warn!(path = %user_conf.display(), "include line already present, not appending");
        return Ok(());
    }

    if let Some(dir) = user_conf.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(user_conf)
        .map_err(|e| io_err(user_conf, e))?;
    write!(file, "\n# storepush\n{line}\n").map_err(|e| io_err(user_conf, e))?;
    Ok(())
}

/// Fail with [`SyncError::ConfigVerification`] unless `nix show-config`
/// lists the substituter and the public key as whole values of their
/// settings.
pub fn verify(runner: &dyn CommandRunner, nix_bin: &str, registration: &Registration) -> Result<(), SyncError> {
    let invocation = nix::command(nix_bin, ["show-config"]);
    let output = runner.run(&invocation)?;
    if !output.success() {
        return Err(utility_failure(&invocation, &output));
    }
    for (setting, value) in [
        ("substituters", &registration.substituter),
        ("trusted-public-keys", &registration.public_key),
    ] {
        if !setting_values(&output.stdout, setting).any(|v| v == value.as_str()) {
            return Err(SyncError::ConfigVerification {
                missing: value.clone(),
            });
        }
    }
    Ok(())
}

/// Whitespace-separated values of `setting` (or `extra-<setting>`) in
/// `key = value` configuration output.
fn setting_values<'a>(config: &'a str, setting: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    config
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter(move |(key, _)| {
            let key = key.trim();
            key == setting || key.strip_prefix("extra-") == Some(setting)
        })
        .flat_map(|(_, values)| values.split_whitespace())
}
