//! `storepush action`: one entry point for both halves of an Actions step.
//!
//! The main invocation runs setup and leaves `isPost=true` in the step
//! state; the runner hands it back as `STATE_isPost` to the post
//! invocation, which runs upload.

use anyhow::Result;
use clap::Args;

use storepush_core::config::parse_flag;
use storepush_sync::Host;

use super::config::ConfigArgs;

pub const POST_STATE: &str = "isPost";

/// Arguments for `storepush action`.
#[derive(Args, Debug)]
pub struct ActionArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long, env = "STATE_isPost", hide = true)]
    pub is_post: Option<String>,
}

impl ActionArgs {
    pub fn run(self, host: &Host) -> Result<()> {
        if parse_flag("isPost", self.is_post.as_deref())?.unwrap_or(false) {
            return super::upload::run(&self.config, host, false);
        }
        host.save_state(POST_STATE, "true")?;
        super::setup::run(&self.config, host)
    }
}
