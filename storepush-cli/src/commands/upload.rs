//! `storepush upload`: push what the build added.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use storepush_core::HostRunner;
use storepush_sync::{run_upload_phase, Host, HttpProbe, PhaseContext, PushOutcome, UploadReport};

use super::config::ConfigArgs;

/// Arguments for `storepush upload`.
#[derive(Args, Debug)]
pub struct UploadArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// List the store paths that would be pushed without pushing them.
    #[arg(long)]
    pub dry_run: bool,
}

impl UploadArgs {
    pub fn run(self, host: &Host) -> Result<()> {
        run(&self.config, host, self.dry_run)
    }
}

pub(crate) fn run(args: &ConfigArgs, host: &Host, dry_run: bool) -> Result<()> {
    let config = args.resolve()?;
    let runner = HostRunner;
    let probe = HttpProbe::default();
    let ctx = PhaseContext {
        config: &config,
        runner: &runner,
        probe: &probe,
        host,
    };
    let report = run_upload_phase(&ctx, dry_run).context("upload failed")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &UploadReport) {
    match report.outcome {
        None => {
            println!(
                "[dry-run] {} store path(s) would be pushed to {}",
                report.delta.len(),
                report.endpoint
            );
            for id in &report.delta {
                println!("  ~  {id}");
            }
        }
        Some(PushOutcome::NothingToPush) => {
            println!("{} nothing new to push", "✓".green());
        }
        Some(PushOutcome::Pushed { artifacts }) => {
            println!(
                "{} pushed {artifacts} store path(s) to {}",
                "✓".green(),
                report.endpoint
            );
        }
    }
}
