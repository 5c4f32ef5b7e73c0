//! The external push utility (`oranc`): locating it and building its
//! command lines.

use storepush_core::{
    ActionConfig, CommandRunner, Credentials, Delta, InitializeParams, Invocation, Repository,
    TuningParams, UtilitySource,
};

use crate::credentials;
use crate::error::{utility_failure, ExitCode, SyncError};
use crate::nix;

/// Name of the executable inside an installed utility's `bin/`.
pub const UTILITY_EXECUTABLE: &str = "oranc";

/// Resolve the program to run. An installable is built with `nix build`
/// (a no-op when already in the store) and its `bin/oranc` is used.
pub fn locate(config: &ActionConfig, runner: &dyn CommandRunner) -> Result<String, SyncError> {
    match &config.utility {
        UtilitySource::Program(program) => Ok(program.clone()),
        UtilitySource::Installable(installable) => {
            let invocation = nix::command(
                &config.nix_bin,
                ["build", "--no-link", "--print-out-paths", installable.as_str()],
            );
            let output = runner.run(&invocation)?;
            if !output.success() {
                return Err(utility_failure(&invocation, &output));
            }
            let Some(out_path) = output
                .stdout
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
            else {
                return Err(SyncError::UtilityInvocation {
                    command: invocation.command_line(),
                    code: ExitCode(output.code),
                    stderr: "no output path printed".to_string(),
                });
            };
            let program = format!("{out_path}/bin/{UTILITY_EXECUTABLE}");
            tracing::info!(program = %program, "installed push utility");
            Ok(program)
        }
    }
}

/// A resolved utility bound to one repository and one set of credentials.
#[derive(Debug, Clone)]
pub struct PushUtility {
    pub program: String,
    pub repository: Repository,
    pub credentials: Option<Credentials>,
    pub signing_key: Option<String>,
}

impl PushUtility {
    /// `<program> push --registry <r> --repository <p1>/<p2>` plus env.
    fn base(&self) -> Invocation {
        let invocation = Invocation::new(&self.program)
            .arg("push")
            .args(["--registry", self.repository.registry.as_str()])
            .args(["--repository", self.repository.path().as_str()]);
        credentials::apply_env(
            invocation,
            self.credentials.as_ref(),
            self.signing_key.as_deref(),
        )
    }

    /// Push `delta`, fed newline-delimited on stdin.
    pub fn push_invocation(
        &self,
        delta: &Delta,
        tuning: &TuningParams,
        push_closure: bool,
        extra_args: &[String],
    ) -> Invocation {
        let mut invocation = self
            .base()
            .args(["--parallel".to_string(), tuning.parallel.to_string()])
            .args(["--max-retry".to_string(), tuning.max_retry.to_string()])
            .args(["--zstd-level".to_string(), tuning.zstd_level.to_string()]);
        if !push_closure {
            invocation = invocation.arg("--no-closure");
        }
        invocation.args(extra_args.iter().cloned()).stdin(delta.to_lines())
    }

    /// Create the cache's root descriptor.
    pub fn initialize_invocation(&self, params: &InitializeParams) -> Invocation {
        let invocation = self
            .base()
            .arg("initialize")
            .args(["--priority".to_string(), params.priority.to_string()]);
        if params.mass_query {
            invocation
        } else {
            invocation.arg("--no-mass-query")
        }
    }
}
