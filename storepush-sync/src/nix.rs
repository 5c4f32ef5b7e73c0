//! `nix` command construction.

use storepush_core::Invocation;

/// Passed to every `nix` call.
pub const COMMON_ARGS: [&str; 2] = ["--experimental-features", "nix-command flakes"];

/// `<nix_bin> --experimental-features 'nix-command flakes' <args...>`
pub fn command<I, S>(nix_bin: &str, args: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Invocation::new(nix_bin).args(COMMON_ARGS).args(args)
}
