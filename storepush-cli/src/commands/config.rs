//! Config flags shared by every subcommand.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use storepush_core::config::{non_blank, parse_flag, parse_value};
use storepush_core::{ActionConfig, ConfigError, ConfigLayer};

/// Settings, each with a GitHub Actions input fallback. Values arrive as
/// strings so an empty input counts as unset.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// YAML file with lower-precedence settings (snake_case keys).
    #[arg(long, env = "STOREPUSH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Registry host, e.g. `ghcr.io`.
    #[arg(long, env = "INPUT_REGISTRY")]
    pub registry: Option<String>,

    #[arg(long = "repository-part1", env = "INPUT_REPOSITORYPART1")]
    pub repository_part1: Option<String>,

    #[arg(long = "repository-part2", env = "INPUT_REPOSITORYPART2")]
    pub repository_part2: Option<String>,

    /// Proxy URL serving the cache.
    #[arg(long, env = "INPUT_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Container whose network address serves the proxy.
    #[arg(long, env = "INPUT_ENDPOINTCONTAINER")]
    pub endpoint_container: Option<String>,

    /// Push without registry credentials.
    #[arg(long, env = "INPUT_ANONYMOUS", num_args = 0..=1, default_missing_value = "true")]
    pub anonymous: Option<String>,

    #[arg(long, env = "INPUT_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "INPUT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Nix secret key used to sign pushed paths.
    #[arg(long, env = "INPUT_SIGNINGKEY", hide_env_values = true)]
    pub signing_key: Option<String>,

    /// Keep the signing key in the state directory for the upload phase.
    #[arg(long, env = "INPUT_PERSISTSIGNINGKEY", num_args = 0..=1, default_missing_value = "true")]
    pub persist_signing_key: Option<String>,

    #[arg(long, env = "INPUT_PARALLEL")]
    pub parallel: Option<String>,

    #[arg(long, env = "INPUT_MAXRETRY")]
    pub max_retry: Option<String>,

    #[arg(long, env = "INPUT_ZSTDLEVEL", allow_hyphen_values = true)]
    pub zstd_level: Option<String>,

    /// Push only the new paths, not their closure.
    #[arg(long, env = "INPUT_NOCLOSURE", num_args = 0..=1, default_missing_value = "true")]
    pub no_closure: Option<String>,

    /// Extra arguments for the push utility, split on whitespace. No quoting
    /// is recognized; an argument containing spaces must come from the
    /// `extra_push_args` list of the `--config` file.
    #[arg(long, env = "INPUT_EXTRAPUSHARGS", allow_hyphen_values = true)]
    pub extra_push_args: Option<String>,

    /// `auto`, `force` or `skip`.
    #[arg(long, env = "INPUT_INITIALIZE")]
    pub initialize: Option<String>,

    #[arg(long, env = "INPUT_INITIALIZEPRIORITY")]
    pub initialize_priority: Option<String>,

    #[arg(long, env = "INPUT_NOMASSQUERY", num_args = 0..=1, default_missing_value = "true")]
    pub no_mass_query: Option<String>,

    /// Appended to the substituter URL as `?priority=<n>`.
    #[arg(long, env = "INPUT_SUBSTITUTERPRIORITY")]
    pub substituter_priority: Option<String>,

    #[arg(long, env = "INPUT_STATEDIR")]
    pub state_dir: Option<String>,

    /// Flake reference the push utility is built from.
    #[arg(long, env = "INPUT_ORANC")]
    pub utility_installable: Option<String>,

    #[arg(long, env = "STOREPUSH_UTILITY_BIN")]
    pub utility_bin: Option<String>,

    #[arg(long, env = "STOREPUSH_NIX_BIN")]
    pub nix_bin: Option<String>,

    #[arg(long, env = "STOREPUSH_DOCKER_BIN")]
    pub docker_bin: Option<String>,

    /// User-level nix.conf that includes the generated fragment.
    #[arg(long, env = "STOREPUSH_NIX_USER_CONF")]
    pub nix_user_conf: Option<String>,

    /// Identifier shared by the setup and upload phases of one run.
    #[arg(long, env = "STOREPUSH_RUN_ID")]
    pub run_id: Option<String>,

    #[arg(long, env = "GITHUB_RUN_ID", hide = true)]
    pub github_run_id: Option<String>,

    #[arg(long, env = "GITHUB_RUN_ATTEMPT", hide = true)]
    pub github_run_attempt: Option<String>,

    #[arg(long, env = "GITHUB_JOB", hide = true)]
    pub github_job: Option<String>,
}

impl ConfigArgs {
    /// Flags merged over the `--config` file.
    pub fn to_layer(&self) -> Result<ConfigLayer, ConfigError> {
        let flags = ConfigLayer {
            registry: non_blank(self.registry.as_deref()),
            repository_part1: non_blank(self.repository_part1.as_deref()),
            repository_part2: non_blank(self.repository_part2.as_deref()),
            endpoint: non_blank(self.endpoint.as_deref()),
            endpoint_container: non_blank(self.endpoint_container.as_deref()),
            anonymous: parse_flag("anonymous", self.anonymous.as_deref())?,
            username: non_blank(self.username.as_deref()),
            password: non_blank(self.password.as_deref()),
            signing_key: non_blank(self.signing_key.as_deref()),
            persist_signing_key: parse_flag(
                "persist_signing_key",
                self.persist_signing_key.as_deref(),
            )?,
            parallel: parse_value("parallel", self.parallel.as_deref())?,
            max_retry: parse_value("max_retry", self.max_retry.as_deref())?,
            zstd_level: parse_value("zstd_level", self.zstd_level.as_deref())?,
            no_closure: parse_flag("no_closure", self.no_closure.as_deref())?,
            extra_push_args: non_blank(self.extra_push_args.as_deref())
                .map(|raw| raw.split_whitespace().map(str::to_string).collect()),
            initialize: parse_value("initialize", self.initialize.as_deref())?,
            initialize_priority: parse_value(
                "initialize_priority",
                self.initialize_priority.as_deref(),
            )?,
            no_mass_query: parse_flag("no_mass_query", self.no_mass_query.as_deref())?,
            substituter_priority: parse_value(
                "substituter_priority",
                self.substituter_priority.as_deref(),
            )?,
            state_dir: non_blank(self.state_dir.as_deref()).map(PathBuf::from),
            nix_bin: non_blank(self.nix_bin.as_deref()),
            docker_bin: non_blank(self.docker_bin.as_deref()),
            utility_bin: non_blank(self.utility_bin.as_deref()),
            utility_installable: non_blank(self.utility_installable.as_deref()),
            nix_user_conf: non_blank(self.nix_user_conf.as_deref()).map(PathBuf::from),
            run_id: non_blank(self.run_id.as_deref()).or_else(|| self.host_run_id()),
        };

        let file = match &self.config {
            Some(path) => ConfigLayer::load_yaml(path)?,
            None => ConfigLayer::default(),
        };
        Ok(flags.merge(file))
    }

    /// Resolve the full configuration.
    pub fn resolve(&self) -> Result<ActionConfig> {
        let layer = self.to_layer().context("cannot read configuration")?;
        let config = ActionConfig::from_layer(layer).context("invalid configuration")?;
        tracing::debug!(
            run_id = %config.run_id,
            state_dir = %config.state_dir.display(),
            "resolved configuration"
        );
        Ok(config)
    }

    /// `<run id>-<attempt>-<job>` from the Actions runner, if present.
    fn host_run_id(&self) -> Option<String> {
        let run = non_blank(self.github_run_id.as_deref())?;
        let attempt = non_blank(self.github_run_attempt.as_deref()).unwrap_or_else(|| "1".to_string());
        match non_blank(self.github_job.as_deref()) {
            Some(job) => Some(format!("{run}-{attempt}-{job}")),
            None => Some(format!("{run}-{attempt}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storepush_core::InitializeMode;

    fn args() -> ConfigArgs {
        ConfigArgs {
            registry: Some("ghcr.io".into()),
            repository_part1: Some("octo".into()),
            repository_part2: Some("cache".into()),
            endpoint: Some("http://127.0.0.1:5000".into()),
            anonymous: Some("true".into()),
            ..ConfigArgs::default()
        }
    }

    #[test]
    fn empty_inputs_count_as_unset() {
        let layer = ConfigArgs {
            parallel: Some(String::new()),
            username: Some("  ".into()),
            ..args()
        }
        .to_layer()
        .unwrap();
        assert_eq!(layer.parallel, None);
        assert_eq!(layer.username, None);
    }

    #[test]
    fn run_id_comes_from_runner_environment() {
        let layer = ConfigArgs {
            github_run_id: Some("1234".into()),
            github_run_attempt: Some("2".into()),
            github_job: Some("build".into()),
            ..args()
        }
        .to_layer()
        .unwrap();
        assert_eq!(layer.run_id.as_deref(), Some("1234-2-build"));
    }

    #[test]
    fn explicit_run_id_wins() {
        let layer = ConfigArgs {
            run_id: Some("mine".into()),
            github_run_id: Some("1234".into()),
            ..args()
        }
        .to_layer()
        .unwrap();
        assert_eq!(layer.run_id.as_deref(), Some("mine"));
    }

    #[test]
    fn typed_inputs_are_parsed() {
        let config = ConfigArgs {
            zstd_level: Some("-3".into()),
            initialize: Some("false".into()),
            extra_push_args: Some("--exclude  -source$".into()),
            ..args()
        }
        .resolve()
        .unwrap();
        assert_eq!(config.tuning.zstd_level, -3);
        assert_eq!(config.initialize.mode, InitializeMode::Skip);
        assert_eq!(config.extra_push_args, vec!["--exclude", "-source$"]);
    }

    #[test]
    fn flags_override_config_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("storepush.yaml");
        std::fs::write(&path, "parallel: 2\nmax_retry: 9\n").unwrap();
        let config = ConfigArgs {
            config: Some(path),
            parallel: Some("16".into()),
            ..args()
        }
        .resolve()
        .unwrap();
        assert_eq!(config.tuning.parallel, 16);
        assert_eq!(config.tuning.max_retry, 9);
    }

    #[test]
    fn spaced_push_argument_survives_from_config_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("storepush.yaml");
        std::fs::write(&path, "extra_push_args: [\"--exclude\", \"^/nix/store/.* source$\"]\n").unwrap();
        let config = ConfigArgs {
            config: Some(path),
            ..args()
        }
        .resolve()
        .unwrap();
        assert_eq!(config.extra_push_args, vec!["--exclude", "^/nix/store/.* source$"]);
    }

    #[test]
    fn extra_push_args_flag_splits_on_whitespace() {
        let config = ConfigArgs {
            extra_push_args: Some("--exclude 'a b'".into()),
            ..args()
        }
        .resolve()
        .unwrap();
        assert_eq!(config.extra_push_args, vec!["--exclude", "'a", "b'"]);
    }

    #[test]
    fn bad_flag_names_the_field() {
        let err = ConfigArgs {
            anonymous: Some("maybe".into()),
            ..args()
        }
        .to_layer()
        .unwrap_err();
        assert!(err.to_string().contains("anonymous"));
    }
}
