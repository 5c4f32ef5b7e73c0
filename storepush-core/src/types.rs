//! Domain types shared by the setup and upload phases.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Suffix of build-recipe (derivation) store paths. Recipes are not
/// cacheable outputs and never appear in a listing.
pub const RECIPE_SUFFIX: &str = ".drv";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque identifier of a content-addressed artifact (a store path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for build-recipe identifiers.
    pub fn is_recipe(&self) -> bool {
        self.0.ends_with(RECIPE_SUFFIX)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ArtifactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ArtifactId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Base URL of the cache proxy, stored without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self(url.trim().trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Snapshot / Delta
// ---------------------------------------------------------------------------

/// Artifacts known before the build. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    ids: HashSet<ArtifactId>,
}

impl Snapshot {
    pub fn new(ids: impl IntoIterator<Item = ArtifactId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Members in lexical order, for deterministic serialization.
    pub fn sorted(&self) -> Vec<&ArtifactId> {
        let mut ids: Vec<_> = self.ids.iter().collect();
        ids.sort();
        ids
    }
}

impl FromIterator<ArtifactId> for Snapshot {
    fn from_iter<I: IntoIterator<Item = ArtifactId>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Artifacts present after the build but absent from the [`Snapshot`],
/// in the order of the post-build listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta(Vec<ArtifactId>);

impl Delta {
    pub fn new(ids: Vec<ArtifactId>) -> Self {
        Self(ids)
    }

    pub fn ids(&self) -> &[ArtifactId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ArtifactId> {
        self.0.iter()
    }

    /// Newline-delimited form fed to the push utility's stdin.
    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        for id in &self.0 {
            out.push_str(id.as_str());
            out.push('\n');
        }
        out
    }
}

impl<'a> IntoIterator for &'a Delta {
    type Item = &'a ArtifactId;
    type IntoIter = std::slice::Iter<'a, ArtifactId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Remote coordinates and push parameters
// ---------------------------------------------------------------------------

/// OCI registry and two-part repository the cache lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub registry: String,
    pub part1: String,
    pub part2: String,
}

impl Repository {
    /// `<part1>/<part2>`, as passed to `--repository`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.part1, self.part2)
    }

    /// `<endpoint>/<registry>/<part1>/<part2>`, the binary cache URL served
    /// by the proxy.
    pub fn cache_url(&self, endpoint: &Endpoint) -> String {
        format!(
            "{}/{}/{}/{}",
            endpoint.as_str(),
            self.registry,
            self.part1,
            self.part2
        )
    }
}

/// Registry credentials. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Utility-level tuning knobs for a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningParams {
    pub parallel: u32,
    pub max_retry: u32,
    pub zstd_level: i32,
}

impl Default for TuningParams {
    fn default() -> Self {
        Self {
            parallel: 4,
            max_retry: 3,
            zstd_level: 3,
        }
    }
}

/// How the setup phase treats the remote cache's root descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InitializeMode {
    /// Probe the endpoint and initialize only when the descriptor is absent.
    #[default]
    Auto,
    /// Initialize without probing.
    Force,
    /// Never initialize.
    Skip,
}

impl fmt::Display for InitializeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitializeMode::Auto => write!(f, "auto"),
            InitializeMode::Force => write!(f, "force"),
            InitializeMode::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for InitializeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "force" | "true" => Ok(Self::Force),
            "skip" | "false" => Ok(Self::Skip),
            other => Err(format!(
                "unknown initialize mode '{other}'; expected: auto, force, skip"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitializeParams {
    pub mode: InitializeMode,
    /// Substituter priority advertised in `nix-cache-info`.
    pub priority: u32,
    /// Advertise `WantMassQuery`.
    pub mass_query: bool,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            mode: InitializeMode::Auto,
            priority: 41,
            mass_query: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
