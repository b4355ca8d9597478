//! Reconciliation core for nanoforge.
//!
//! Given the desired inputs for a resource (an image built from an
//! executable, an image built from a pre-packaged application, or a running
//! instance of an image), this crate canonicalizes them into a fully
//! defaulted configuration, diffs that configuration against the previously
//! recorded state, and drives Create/Read/Update/Delete/Diff/Check against a
//! provisioning backend with preview (dry-run) semantics. The host driver
//! that sequences calls across resources lives outside this crate; so do the
//! concrete cloud backends.

pub mod canonical;
pub mod controller;
pub mod diff;
pub mod image;
pub mod instance;

pub use canonical::{Builder, Collaborators, ExecutableSource, PackageSource, SourceResolver};
pub use controller::{CheckFailure, DiffResponse, ImageState, InstanceState};
pub use diff::{diff_configs, PatchKind, PatchOp};
pub use image::ImageController;
pub use instance::InstanceController;

use nanoforge_backend::BackendError;
use nanoforge_fetch::FetchError;
use nanoforge_schema::ConfigError;
use thiserror::Error;

/// Error taxonomy for reconciliation calls.
///
/// `AlreadyExists` and `Conflict` are Create pre-condition violations; in
/// preview mode the controllers degrade them to warnings. Backend `NotFound`
/// never surfaces through Delete or Read (idempotent delete, cleared-identity
/// read) but does through other operations via the `Backend` variant.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration parse failed: {0}")]
    ConfigParse(#[from] ConfigError),
    #[error("unsupported target '{0}'")]
    UnsupportedTarget(String),
    #[error("source '{0}' does not exist")]
    SourceNotFound(String),
    #[error("version resolution failed: {0}")]
    VersionResolution(#[source] FetchError),
    #[error("package resolution failed: {0}")]
    PackageResolution(#[source] FetchError),
    #[error("'{0}' already exists; set force to overwrite")]
    AlreadyExists(String),
    #[error("instance '{blocker}' is already running image '{image}'")]
    Conflict { blocker: String, image: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
