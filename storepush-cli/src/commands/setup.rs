//! `storepush setup`: everything that runs before the build.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use storepush_core::HostRunner;
use storepush_sync::{run_setup_phase, Host, HttpProbe, InitOutcome, PhaseContext, SetupReport};

use super::config::ConfigArgs;

/// Arguments for `storepush setup`.
#[derive(Args, Debug)]
pub struct SetupArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

impl SetupArgs {
    pub fn run(self, host: &Host) -> Result<()> {
        run(&self.config, host)
    }
}

pub(crate) fn run(args: &ConfigArgs, host: &Host) -> Result<()> {
    let config = args.resolve()?;
    let runner = HostRunner;
    let probe = HttpProbe::default();
    let ctx = PhaseContext {
        config: &config,
        runner: &runner,
        probe: &probe,
        host,
    };
    let report = run_setup_phase(&ctx).context("setup failed")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &SetupReport) {
    let init = match report.init {
        InitOutcome::AlreadyInitialized => "already initialized".to_string(),
        InitOutcome::Initialized { forced: false } => "initialized".to_string(),
        InitOutcome::Initialized { forced: true } => "initialized (forced)".to_string(),
        InitOutcome::Skipped => "initialization skipped".to_string(),
    };
    println!("{} cache ready at {}", "✓".green(), report.endpoint);
    println!("  substituter  {}", report.substituter);
    println!("  snapshot     {} store paths", report.snapshot_size);
    println!("  cache        {init}");
}
