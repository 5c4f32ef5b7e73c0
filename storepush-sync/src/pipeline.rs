//! The two phases, callable independently.
//!
//! Setup (before the build):
//! 1. Prepare the state directory.
//! 2. Resolve the cache endpoint.
//! 3. Register the substituter and verify the effective nix configuration.
//! 4. Record `store-paths-pre-build`.
//! 5. Locate (or install) the push utility.
//! 6. Initialize the remote cache if needed.
//!
//! Upload (after the build):
//! 1. Load the snapshot recorded by setup in this run.
//! 2. List the store and compute the delta.
//! 3. Push the delta.
//! 4. Consume the snapshot, so it is never read twice. A dry run or a failed
//!    push leaves it in place.
//!
//! The snapshot is taken before the utility is installed, so the utility's
//! own store paths land in the delta when it is built during setup.

use storepush_core::{
    snapshot, ActionConfig, CommandRunner, ConfigError, Delta, Endpoint, EndpointSource, Snapshot,
};

use crate::error::{io_err, SyncError};
use crate::host::Host;
use crate::initializer::{CacheProbe, InitOutcome};
use crate::push::{PushOutcome, PushSettings};
use crate::substituter::Registration;
use crate::utility::PushUtility;
use crate::{credentials, delta, endpoint, initializer, inspector, push, substituter, utility};

/// Everything a phase needs, passed by reference.
pub struct PhaseContext<'a> {
    pub config: &'a ActionConfig,
    pub runner: &'a dyn CommandRunner,
    pub probe: &'a dyn CacheProbe,
    pub host: &'a Host,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    pub endpoint: Endpoint,
    pub substituter: String,
    pub snapshot_size: usize,
    pub init: InitOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub endpoint: Endpoint,
    pub delta: Delta,
    /// `None` for a dry run.
    pub outcome: Option<PushOutcome>,
}

/// Run everything that has to happen before the build.
pub fn run_setup_phase(ctx: &PhaseContext<'_>) -> Result<SetupReport, SyncError> {
    let config = ctx.config;
    let layout = config.state();

    if let Some(creds) = &config.credentials {
        ctx.host.mask(&creds.password);
    }
    if let Some(key) = &config.signing_key {
        ctx.host.mask(key);
    }

    {
        let _group = ctx.host.group("setting up state directory");
        layout.ensure().map_err(|e| io_err(layout.root(), e))?;
    }

    let endpoint = {
        let _group = ctx.host.group("resolving cache endpoint");
        let endpoint = endpoint::resolve(&config.endpoint, &config.docker_bin, ctx.runner)?;
        if matches!(config.endpoint, EndpointSource::Container(_)) {
            ctx.host.set_output("endpoint", endpoint.as_str())?;
        }
        endpoint
    };

    let signing_key = config
        .signing_key
        .as_deref()
        .ok_or(ConfigError::Missing("signing_key"))?;

    let registration = {
        let _group = ctx.host.group("setting up substituters and trusted-public-keys");
        let public_key = substituter::public_key(ctx.runner, &config.nix_bin, signing_key)?;
        let registration = Registration {
            substituter: substituter::substituter_url(
                &endpoint,
                &config.repository,
                config.substituter_priority,
            ),
            public_key,
        };
        let user_conf = config.nix_user_conf()?;
        substituter::register(ctx.runner, &config.nix_bin, &layout, &user_conf, &registration)?;
        if config.persist_signing_key {
            credentials::persist_signing_key(&layout, signing_key)?;
        }
        registration
    };

    let snapshot_size = {
        let _group = ctx.host.group("recording store-paths-pre-build");
        let snapshot = Snapshot::new(inspector::list_artifacts(ctx.runner, &config.nix_bin)?);
        snapshot::save_at(&layout, &snapshot, &config.run_id, &endpoint)?;
        tracing::info!(artifacts = snapshot.len(), run_id = %config.run_id, "recorded snapshot");
        snapshot.len()
    };

    let program = {
        let _group = ctx.host.group("locating push utility");
        utility::locate(config, ctx.runner)?
    };

    let init = {
        let _group = ctx.host.group("initializing remote cache");
        let utility = PushUtility {
            program,
            repository: config.repository.clone(),
            credentials: config.credentials.clone(),
            signing_key: Some(signing_key.to_string()),
        };
        initializer::ensure_initialized(
            ctx.runner,
            ctx.probe,
            &utility,
            &config.initialize,
            &config.repository.cache_url(&endpoint),
        )?
    };

    Ok(SetupReport {
        endpoint,
        substituter: registration.substituter,
        snapshot_size,
        init,
    })
}

/// Run everything that has to happen after the build. With `dry_run` the
/// delta is computed but nothing is pushed.
pub fn run_upload_phase(ctx: &PhaseContext<'_>, dry_run: bool) -> Result<UploadReport, SyncError> {
    let config = ctx.config;
    let layout = config.state();

    if let Some(creds) = &config.credentials {
        ctx.host.mask(&creds.password);
    }

    let recorded = {
        let _group = ctx.host.group("loading store-paths-pre-build");
        let recorded = snapshot::load_at(&layout, &config.run_id)?;
        tracing::info!(
            artifacts = recorded.snapshot.len(),
            recorded_at = %recorded.run.recorded_at,
            "loaded snapshot"
        );
        recorded
    };

    let delta = {
        let _group = ctx.host.group("computing store paths to push");
        let current = inspector::list_artifacts(ctx.runner, &config.nix_bin)?;
        let delta = delta::compute(&current, &recorded.snapshot);
        tracing::info!(current = current.len(), new = delta.len(), "computed delta");
        delta
    };

    if dry_run {
        return Ok(UploadReport {
            endpoint: recorded.run.endpoint,
            delta,
            outcome: None,
        });
    }

    let signing_key = credentials::signing_key(config, &layout)?;
    if let Some(key) = &signing_key {
        ctx.host.mask(key);
    }

    let outcome = {
        let _group = ctx.host.group("pushing store paths");
        if delta.is_empty() {
            tracing::info!("no new store paths to push");
            PushOutcome::NothingToPush
        } else {
            let utility = PushUtility {
                program: utility::locate(config, ctx.runner)?,
                repository: config.repository.clone(),
                credentials: config.credentials.clone(),
                signing_key,
            };
            push::push(ctx.runner, &utility, &delta, &PushSettings::from_config(config))?
        }
    };
    snapshot::consume_at(&layout)?;

    Ok(UploadReport {
        endpoint: recorded.run.endpoint,
        delta,
        outcome: Some(outcome),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initializer::ProbeResponse;
    use storepush_core::{ArtifactId, CommandOutput, ConfigLayer, ScriptedRunner, SnapshotError};
    use tempfile::TempDir;

    struct StaticProbe(ProbeResponse);

    impl CacheProbe for StaticProbe {
        fn probe(&self, _url: &str) -> ProbeResponse {
            self.0.clone()
        }
    }

    const SUBSTITUTER: &str = "http://127.0.0.1:5000/ghcr.io/octo/cache";

    fn config(tmp: &TempDir, run_id: &str) -> ActionConfig {
        ActionConfig::from_layer(ConfigLayer {
            registry: Some("ghcr.io".into()),
            repository_part1: Some("octo".into()),
            repository_part2: Some("cache".into()),
            endpoint: Some("http://127.0.0.1:5000".into()),
            anonymous: Some(true),
            signing_key: Some("cache-1:SECRET".into()),
            state_dir: Some(tmp.path().join("state")),
            nix_user_conf: Some(tmp.path().join("nix.conf")),
            run_id: Some(run_id.into()),
            ..ConfigLayer::default()
        })
        .expect("config")
    }

    fn runner(before: &str, after: &str) -> ScriptedRunner {
        ScriptedRunner::new()
            .on(&["convert-secret-to-public"], CommandOutput::ok("cache-1:PUBLIC\n"))
            .on(
                &["show-config"],
                CommandOutput::ok(format!(
                    "extra-substituters = {SUBSTITUTER}\nextra-trusted-public-keys = cache-1:PUBLIC\n"
                )),
            )
            .on(&["path-info", "--all"], CommandOutput::ok(before))
            .on(&["path-info", "--all"], CommandOutput::ok(after))
            .on(&["initialize"], CommandOutput::ok(""))
            .on(&["--parallel"], CommandOutput::ok(""))
    }

    #[test]
    fn setup_then_upload_pushes_only_new_paths() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, "7-1-build");
        let runner = runner(
            "/nix/store/a\n/nix/store/b\n",
            "/nix/store/a\n/nix/store/b\n/nix/store/c\n/nix/store/d.drv\n",
        );
        let probe = StaticProbe(ProbeResponse::NotFound);
        let (host, _) = Host::buffered(false, None, None);
        let ctx = PhaseContext {
            config: &config,
            runner: &runner,
            probe: &probe,
            host: &host,
        };

        let setup = run_setup_phase(&ctx).expect("setup");
        assert_eq!(setup.substituter, SUBSTITUTER);
        assert_eq!(setup.snapshot_size, 2);
        assert_eq!(setup.init, InitOutcome::Initialized { forced: false });

        let upload = run_upload_phase(&ctx, false).expect("upload");
        assert_eq!(upload.delta.ids(), &[ArtifactId::from("/nix/store/c")]);
        assert_eq!(upload.outcome, Some(PushOutcome::Pushed { artifacts: 1 }));
        assert_eq!(upload.endpoint, Endpoint::new("http://127.0.0.1:5000"));

        let pushes = runner.calls_with(&["--parallel"]);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].stdin.as_deref(), Some("/nix/store/c\n"));
    }

    #[test]
    fn dry_run_pushes_nothing() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, "7-1-build");
        let runner = runner("/nix/store/a\n", "/nix/store/a\n/nix/store/b\n");
        let probe = StaticProbe(ProbeResponse::Found);
        let (host, _) = Host::buffered(false, None, None);
        let ctx = PhaseContext {
            config: &config,
            runner: &runner,
            probe: &probe,
            host: &host,
        };

        run_setup_phase(&ctx).expect("setup");
        let upload = run_upload_phase(&ctx, true).expect("upload");
        assert_eq!(upload.delta.len(), 1);
        assert!(upload.outcome.is_none());
        assert!(runner.calls_with(&["--parallel"]).is_empty());
        assert!(runner.calls_with(&["initialize"]).is_empty());
    }

    #[test]
    fn unchanged_store_runs_no_push() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, "7-1-build");
        let runner = runner("/nix/store/a\n", "/nix/store/a\n");
        let probe = StaticProbe(ProbeResponse::Found);
        let (host, _) = Host::buffered(false, None, None);
        let ctx = PhaseContext {
            config: &config,
            runner: &runner,
            probe: &probe,
            host: &host,
        };

        run_setup_phase(&ctx).expect("setup");
        let upload = run_upload_phase(&ctx, false).expect("upload");
        assert_eq!(upload.outcome, Some(PushOutcome::NothingToPush));
        assert!(runner.calls_with(&["--parallel"]).is_empty());
    }

    #[test]
    fn second_upload_without_setup_finds_no_snapshot() {
        let tmp = TempDir::new().unwrap();
        let config = ActionConfig {
            run_id: storepush_core::config::LOCAL_RUN_ID.to_string(),
            ..config(&tmp, "unused")
        };
        let runner = runner("/nix/store/a\n", "/nix/store/a\n/nix/store/b\n");
        let probe = StaticProbe(ProbeResponse::Found);
        let (host, _) = Host::buffered(false, None, None);
        let ctx = PhaseContext {
            config: &config,
            runner: &runner,
            probe: &probe,
            host: &host,
        };

        run_setup_phase(&ctx).expect("setup");
        run_upload_phase(&ctx, true).expect("dry run");
        let first = run_upload_phase(&ctx, false).expect("upload");
        assert_eq!(first.outcome, Some(PushOutcome::Pushed { artifacts: 1 }));

        let err = run_upload_phase(&ctx, false).unwrap_err();
        assert!(matches!(err, SyncError::Snapshot(SnapshotError::Missing { .. })));
        assert_eq!(runner.calls_with(&["--parallel"]).len(), 1);
    }

    #[test]
    fn failed_push_keeps_snapshot_for_retry() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, "7-1-build");
        let runner = ScriptedRunner::new()
            .on(&["convert-secret-to-public"], CommandOutput::ok("cache-1:PUBLIC\n"))
            .on(
                &["show-config"],
                CommandOutput::ok(format!(
                    "extra-substituters = {SUBSTITUTER}\nextra-trusted-public-keys = cache-1:PUBLIC\n"
                )),
            )
            .on(&["path-info", "--all"], CommandOutput::ok("/nix/store/a\n"))
            .on(&["path-info", "--all"], CommandOutput::ok("/nix/store/a\n/nix/store/b\n"))
            .on(&["--parallel"], CommandOutput::failed(1, "registry unavailable"))
            .on(&["--parallel"], CommandOutput::ok(""));
        let probe = StaticProbe(ProbeResponse::Found);
        let (host, _) = Host::buffered(false, None, None);
        let ctx = PhaseContext {
            config: &config,
            runner: &runner,
            probe: &probe,
            host: &host,
        };

        run_setup_phase(&ctx).expect("setup");
        let err = run_upload_phase(&ctx, false).unwrap_err();
        assert!(matches!(err, SyncError::PushFailed { .. }));

        let retry = run_upload_phase(&ctx, false).expect("retry");
        assert_eq!(retry.outcome, Some(PushOutcome::Pushed { artifacts: 1 }));
    }

    #[test]
    fn upload_without_setup_fails_before_listing() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, "7-1-build");
        let runner = runner("", "");
        let probe = StaticProbe(ProbeResponse::Found);
        let (host, _) = Host::buffered(false, None, None);
        let ctx = PhaseContext {
            config: &config,
            runner: &runner,
            probe: &probe,
            host: &host,
        };

        let err = run_upload_phase(&ctx, false).unwrap_err();
        assert!(matches!(err, SyncError::Snapshot(SnapshotError::Missing { .. })));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn snapshot_from_another_run_is_stale() {
        let tmp = TempDir::new().unwrap();
        let runner = runner("/nix/store/a\n", "/nix/store/a\n");
        let probe = StaticProbe(ProbeResponse::Found);
        let (host, _) = Host::buffered(false, None, None);

        let earlier = config(&tmp, "6-1-build");
        run_setup_phase(&PhaseContext {
            config: &earlier,
            runner: &runner,
            probe: &probe,
            host: &host,
        })
        .expect("setup");

        let current = config(&tmp, "7-1-build");
        let err = run_upload_phase(
            &PhaseContext {
                config: &current,
                runner: &runner,
                probe: &probe,
                host: &host,
            },
            false,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Snapshot(SnapshotError::Stale { .. })));
    }

    #[test]
    fn missing_signing_key_fails_setup() {
        let tmp = TempDir::new().unwrap();
        let config = ActionConfig {
            signing_key: None,
            ..config(&tmp, "7-1-build")
        };
        let runner = runner("", "");
        let probe = StaticProbe(ProbeResponse::Found);
        let (host, _) = Host::buffered(false, None, None);
        let err = run_setup_phase(&PhaseContext {
            config: &config,
            runner: &runner,
            probe: &probe,
            host: &host,
        })
        .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Config(ConfigError::Missing("signing_key"))
        ));
    }

    #[test]
    fn secrets_are_masked_under_actions() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, "7-1-build");
        let runner = runner("/nix/store/a\n", "/nix/store/a\n");
        let probe = StaticProbe(ProbeResponse::Found);
        let (host, buffer) = Host::buffered(true, None, None);
        run_setup_phase(&PhaseContext {
            config: &config,
            runner: &runner,
            probe: &probe,
            host: &host,
        })
        .expect("setup");

        let log = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(log.starts_with("::add-mask::cache-1:SECRET\n"));
        assert!(log.contains("::group::storepush: recording store-paths-pre-build\n"));
        assert_eq!(log.matches("::group::").count(), log.matches("::endgroup::").count());
    }
}
