//! Run-scoped state directory layout.
//!
//! ```text
//! <state_dir>/
//!   nix.conf                (generated substituter fragment)
//!   signing-key             (raw key material, mode 0600, optional)
//!   store-paths-pre-build   (JSON array of artifact ids)
//!   run.json                (run id, endpoint, snapshot digest)
//! ```

use std::path::{Path, PathBuf};

pub const NIX_CONF: &str = "nix.conf";
pub const SIGNING_KEY: &str = "signing-key";
pub const STORE_PATHS_PRE_BUILD: &str = "store-paths-pre-build";
pub const RUN_STATE: &str = "run.json";

/// `<tmp>/storepush`
pub fn default_state_dir() -> PathBuf {
    std::env::temp_dir().join("storepush")
}

/// `<xdg config>/nix/nix.conf`, the user-level file the fragment is
/// included from.
pub fn default_nix_user_conf() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nix").join("nix.conf"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn nix_conf(&self) -> PathBuf {
        self.root.join(NIX_CONF)
    }

    pub fn signing_key(&self) -> PathBuf {
        self.root.join(SIGNING_KEY)
    }

    pub fn store_paths_pre_build(&self) -> PathBuf {
        self.root.join(STORE_PATHS_PRE_BUILD)
    }

    pub fn run_state(&self) -> PathBuf {
        self.root.join(RUN_STATE)
    }

    /// Create the state directory (mode `0700`) if it does not yet exist.
    pub fn ensure(&self) -> std::io::Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            set_dir_permissions(&self.root)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
