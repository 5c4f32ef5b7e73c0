//! Snapshot recorder: persists the pre-build artifact listing.
//!
//! Two files are written into the run-scoped state directory, each with the
//! atomic `.tmp` + rename pattern:
//!
//! - `store-paths-pre-build`: JSON array of artifact ids (sorted)
//! - `run.json`: [`RunState`]: which run recorded the snapshot, the cache
//!   endpoint resolved during setup, and a SHA-256 digest of the snapshot
//!   bytes
//!
//! [`load_at`] refuses snapshots recorded by another run and snapshots whose
//! bytes no longer match the recorded digest. [`consume_at`] removes both
//! files after a completed upload, so a snapshot is read at most once.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{io_err, SnapshotError};
use crate::paths::StateLayout;
use crate::types::{ArtifactId, Endpoint, Snapshot};

/// Metadata recorded next to the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub endpoint: Endpoint,
    pub recorded_at: DateTime<Utc>,
    pub artifact_count: usize,
    pub snapshot_sha256: String,
}

/// A loaded snapshot together with its run metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub snapshot: Snapshot,
    pub run: RunState,
}

/// Hex SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Persist `snapshot` for `run_id`. Last writer wins.
pub fn save_at(
    layout: &StateLayout,
    snapshot: &Snapshot,
    run_id: &str,
    endpoint: &Endpoint,
) -> Result<RunState, SnapshotError> {
    layout.ensure().map_err(|e| io_err(layout.root(), e))?;

    let payload = serde_json::to_vec(&snapshot.sorted())?;
    write_atomic(&layout.store_paths_pre_build(), &payload)?;

    let run = RunState {
        run_id: run_id.to_string(),
        endpoint: endpoint.clone(),
        recorded_at: Utc::now(),
        artifact_count: snapshot.len(),
        snapshot_sha256: digest(&payload),
    };
    let run_json = serde_json::to_vec_pretty(&run)?;
    write_atomic(&layout.run_state(), &run_json)?;

    tracing::debug!(
        path = %layout.store_paths_pre_build().display(),
        artifacts = run.artifact_count,
        "recorded pre-build snapshot"
    );
    Ok(run)
}

/// Load the snapshot recorded for `run_id`.
pub fn load_at(layout: &StateLayout, run_id: &str) -> Result<Recorded, SnapshotError> {
    let path = layout.store_paths_pre_build();
    let payload = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(SnapshotError::Missing { path });
        }
        Err(err) => return Err(io_err(&path, err)),
    };

    let run_path = layout.run_state();
    let run_json = match std::fs::read(&run_path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(SnapshotError::Malformed {
                path: run_path,
                reason: "run state is missing next to the snapshot".to_string(),
            });
        }
        Err(err) => return Err(io_err(&run_path, err)),
    };
    let run: RunState =
        serde_json::from_slice(&run_json).map_err(|err| SnapshotError::Malformed {
            path: run_path.clone(),
            reason: err.to_string(),
        })?;

    if run.run_id != run_id {
        return Err(SnapshotError::Stale {
            recorded: run.run_id,
            current: run_id.to_string(),
        });
    }

    if digest(&payload) != run.snapshot_sha256 {
        return Err(SnapshotError::Malformed {
            path,
            reason: "contents do not match the digest recorded at setup".to_string(),
        });
    }

    let ids = decode(&path, &payload)?;
    Ok(Recorded {
        snapshot: Snapshot::new(ids),
        run,
    })
}

/// Remove the snapshot and its run state once the upload has used them, so
/// a later upload without a fresh setup fails with `Missing`.
pub fn consume_at(layout: &StateLayout) -> Result<(), SnapshotError> {
    for path in [layout.store_paths_pre_build(), layout.run_state()] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(&path, err)),
        }
    }
    tracing::debug!(path = %layout.root().display(), "consumed pre-build snapshot");
    Ok(())
}

fn decode(path: &Path, payload: &[u8]) -> Result<Vec<ArtifactId>, SnapshotError> {
    serde_json::from_slice::<Vec<ArtifactId>>(payload).map_err(|err| SnapshotError::Malformed {
        path: path.to_path_buf(),
        reason: format!("expected a JSON array of strings: {err}"),
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let Some(name) = path.file_name() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid state file path"),
        ));
    };
    let tmp = path.with_file_name(format!("{}.tmp", name.to_string_lossy()));
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}
