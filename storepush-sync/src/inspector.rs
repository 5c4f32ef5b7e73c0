//! Store inspector: lists every artifact currently in the local store.

use storepush_core::{ArtifactId, CommandRunner};

use crate::error::{ExitCode, SyncError};
use crate::nix;

/// Run `nix path-info --all` and return the non-recipe store paths in
/// listing order.
pub fn list_artifacts(runner: &dyn CommandRunner, nix_bin: &str) -> Result<Vec<ArtifactId>, SyncError> {
    let invocation = nix::command(nix_bin, ["path-info", "--all"]);
    let output = runner.run(&invocation)?;
    if !output.success() {
        return Err(SyncError::StoreQuery {
            code: ExitCode(output.code),
            stderr: output.stderr.trim().to_string(),
        });
    }
    let artifacts = parse_listing(&output.stdout);
    tracing::debug!(artifacts = artifacts.len(), "listed store paths");
    Ok(artifacts)
}

/// One id per line; blank lines and recipe (`.drv`) entries are dropped.
/// Output paths never end in `.drv`.
pub fn parse_listing(stdout: &str) -> Vec<ArtifactId> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ArtifactId::from)
        .filter(|id| !id.is_recipe())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use storepush_core::{CommandOutput, ScriptedRunner};

    #[rstest]
    #[case::empty("", &[])]
    #[case::plain("/nix/store/a-x\n/nix/store/b-y\n", &["/nix/store/a-x", "/nix/store/b-y"])]
    #[case::recipes("/nix/store/a-x\n/nix/store/r-x.drv\n", &["/nix/store/a-x"])]
    #[case::blank_and_crlf("/nix/store/a-x\r\n\n  \n/nix/store/b-y", &["/nix/store/a-x", "/nix/store/b-y"])]
    #[case::only_recipes("/nix/store/r-x.drv\n/nix/store/s-y.drv\n", &[])]
    fn listing_is_filtered(#[case] stdout: &str, #[case] expected: &[&str]) {
        let ids: Vec<String> = parse_listing(stdout).into_iter().map(|id| id.0).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn filtered_count_matches_non_recipe_count() {
        for (recipes, outputs) in [(0usize, 0usize), (3, 0), (0, 5), (4, 7)] {
            let mut listing = String::new();
            for i in 0..outputs {
                listing.push_str(&format!("/nix/store/{i:032}-out\n"));
            }
            for i in 0..recipes {
                listing.push_str(&format!("/nix/store/{i:032}-recipe.drv\n"));
            }
            let ids = parse_listing(&listing);
            assert_eq!(ids.len(), outputs);
            assert!(ids.iter().all(|id| !id.is_recipe()));
        }
    }

    #[test]
    fn list_artifacts_queries_all_paths() {
        let runner = ScriptedRunner::new().on(
            &["path-info", "--all"],
            CommandOutput::ok("/nix/store/a-x\n/nix/store/r.drv\n"),
        );
        let ids = list_artifacts(&runner, "nix").expect("list");
        assert_eq!(ids, vec![ArtifactId::from("/nix/store/a-x")]);
        assert_eq!(runner.calls()[0].program, "nix");
    }

    #[test]
    fn non_zero_exit_is_store_query_error() {
        let runner = ScriptedRunner::new().on(
            &["path-info", "--all"],
            CommandOutput::failed(1, "error: cannot connect to daemon\n"),
        );
        let err = list_artifacts(&runner, "nix").unwrap_err();
        match err {
            SyncError::StoreQuery { code, stderr } => {
                assert_eq!(code, ExitCode(Some(1)));
                assert_eq!(stderr, "error: cannot connect to daemon");
            }
            other => panic!("expected StoreQuery, got {other}"),
        }
    }
}
