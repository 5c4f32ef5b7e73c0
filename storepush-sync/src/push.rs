//! Push orchestrator.
//!
//! One blocking utility invocation per run. Parallelism and per-path retry
//! live inside the utility; a non-zero exit here is terminal.

use storepush_core::{ActionConfig, CommandRunner, Delta, TuningParams};

use crate::error::{ExitCode, SyncError};
use crate::utility::PushUtility;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The delta was empty; the utility was not started.
    NothingToPush,
    Pushed { artifacts: usize },
}

/// Utility-level knobs for a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSettings {
    pub tuning: TuningParams,
    pub push_closure: bool,
    pub extra_args: Vec<String>,
}

impl PushSettings {
    pub fn from_config(config: &ActionConfig) -> Self {
        Self {
            tuning: config.tuning,
            push_closure: config.push_closure,
            extra_args: config.extra_push_args.clone(),
        }
    }
}

/// Push `delta` through `utility`.
pub fn push(
    runner: &dyn CommandRunner,
    utility: &PushUtility,
    delta: &Delta,
    settings: &PushSettings,
) -> Result<PushOutcome, SyncError> {
    if delta.is_empty() {
        tracing::info!("no new store paths to push");
        return Ok(PushOutcome::NothingToPush);
    }

    let invocation = utility.push_invocation(
        delta,
        &settings.tuning,
        settings.push_closure,
        &settings.extra_args,
    );
    tracing::info!(
        artifacts = delta.len(),
        parallel = settings.tuning.parallel,
        max_retry = settings.tuning.max_retry,
        "pushing store paths"
    );
    let output = runner.run(&invocation)?;
    for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
        tracing::info!(target: "oranc", "{line}");
    }
    if !output.success() {
        return Err(SyncError::PushFailed {
            artifacts: delta.len(),
            code: ExitCode(output.code),
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(PushOutcome::Pushed {
        artifacts: delta.len(),
    })
}
