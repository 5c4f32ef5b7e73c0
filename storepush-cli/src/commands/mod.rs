pub mod action;
pub mod config;
pub mod setup;
pub mod upload;

use std::path::PathBuf;

use storepush_sync::Host;

/// Host interface for this process, from the Actions runner environment.
pub fn host_from_env() -> Host {
    let actions = std::env::var("GITHUB_ACTIONS").is_ok_and(|v| v == "true");
    Host::new(actions, env_path("GITHUB_OUTPUT"), env_path("GITHUB_STATE"))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
