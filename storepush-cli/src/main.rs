//! storepush: push newly built store paths to an OCI-registry-backed cache.
//!
//! # Usage
//!
//! ```text
//! storepush setup  [config flags]
//! storepush upload [config flags] [--dry-run]
//! storepush action [config flags]
//! ```
//!
//! Every config flag falls back to the matching GitHub Actions input
//! (`INPUT_REGISTRY`, `INPUT_REPOSITORYPART1`, ...) and then to the YAML
//! file given with `--config`.

mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::{action::ActionArgs, setup::SetupArgs, upload::UploadArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "storepush",
    version,
    about = "Snapshot the nix store before a build and push what the build added",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register the cache as a substituter and record the pre-build store.
    Setup(SetupArgs),

    /// Push every store path added since setup.
    Upload(UploadArgs),

    /// Main/post driver for a GitHub Actions step.
    Action(ActionArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let host = commands::host_from_env();

    let result = match cli.command {
        Commands::Setup(args) => args.run(&host),
        Commands::Upload(args) => args.run(&host),
        Commands::Action(args) => args.run(&host),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            host.fail(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
