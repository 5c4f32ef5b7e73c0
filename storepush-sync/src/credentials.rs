//! Signing key handling and the push utility's credential environment.

use std::path::Path;

use storepush_core::{ActionConfig, Credentials, Invocation, StateLayout};

use crate::error::{io_err, SyncError};

pub const ENV_USERNAME: &str = "ORANC_USERNAME";
pub const ENV_PASSWORD: &str = "ORANC_PASSWORD";
pub const ENV_SIGNING_KEY: &str = "ORANC_SIGNING_KEY";

/// The configured signing key, or the one persisted by the setup phase.
pub fn signing_key(config: &ActionConfig, layout: &StateLayout) -> Result<Option<String>, SyncError> {
    if let Some(key) = &config.signing_key {
        return Ok(Some(key.clone()));
    }
    let path = layout.signing_key();
    match std::fs::read_to_string(&path) {
        Ok(key) => {
            let key = key.trim().to_string();
            Ok((!key.is_empty()).then_some(key))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(&path, err)),
    }
}

/// Write the signing key to `<state>/signing-key` with mode `0600`.
pub fn persist_signing_key(layout: &StateLayout, key: &str) -> Result<(), SyncError> {
    layout.ensure().map_err(|e| io_err(layout.root(), e))?;
    let path = layout.signing_key();
    write_private(&path, key)?;
    tracing::debug!(path = %path.display(), "persisted signing key");
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> Result<(), SyncError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> Result<(), SyncError> {
    std::fs::write(path, contents).map_err(|e| io_err(path, e))
}

/// Attach credentials and signing key to a utility invocation. Anonymous
/// mode strips the credential variables from the inherited environment.
pub fn apply_env(
    invocation: Invocation,
    credentials: Option<&Credentials>,
    signing_key: Option<&str>,
) -> Invocation {
    let invocation = match credentials {
        Some(creds) => invocation
            .env(ENV_USERNAME, &creds.username)
            .env(ENV_PASSWORD, &creds.password),
        None => invocation.env_remove(ENV_USERNAME).env_remove(ENV_PASSWORD),
    };
    match signing_key {
        Some(key) => invocation.env(ENV_SIGNING_KEY, key),
        None => invocation,
    }
}
