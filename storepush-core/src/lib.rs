//! storepush core library: domain types, configuration, persisted state,
//! and the external command capability.
//!
//! Public API surface:
//! - [`types`]: artifact ids, snapshots, deltas, repository coordinates
//! - [`config`]: layered configuration resolved into [`ActionConfig`]
//! - [`paths`]: run-scoped state directory layout
//! - [`snapshot`]: save / load of the pre-build snapshot
//! - [`runner`]: [`CommandRunner`] and its host and scripted implementations
//! - [`error`]: [`ConfigError`], [`SnapshotError`], [`RunnerError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod runner;
pub mod snapshot;
pub mod types;

pub use config::{ActionConfig, ConfigLayer, EndpointSource, UtilitySource};
pub use error::{ConfigError, RunnerError, SnapshotError};
pub use paths::StateLayout;
pub use runner::{CommandOutput, CommandRunner, HostRunner, Invocation, ScriptedRunner};
pub use types::{
    ArtifactId, Credentials, Delta, Endpoint, InitializeMode, InitializeParams, Repository,
    Snapshot, TuningParams,
};
