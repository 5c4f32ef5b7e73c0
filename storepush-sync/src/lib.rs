//! # storepush-sync
//!
//! Snapshot, diff, and push of newly built store paths.
//!
//! [`run_setup_phase`] runs before the build: it registers the cache as a
//! substituter, records the pre-build snapshot, and makes sure the remote
//! cache is initialized. [`run_upload_phase`] runs after the build: it
//! computes the delta against the snapshot and hands it to the push
//! utility.

pub mod credentials;
pub mod delta;
pub mod endpoint;
pub mod error;
pub mod host;
pub mod initializer;
pub mod inspector;
pub mod nix;
pub mod pipeline;
pub mod push;
pub mod substituter;
pub mod utility;

pub use error::SyncError;
pub use host::Host;
pub use initializer::{CacheProbe, HttpProbe, InitOutcome, ProbeResponse};
pub use pipeline::{run_setup_phase, run_upload_phase, PhaseContext, SetupReport, UploadReport};
pub use push::PushOutcome;
