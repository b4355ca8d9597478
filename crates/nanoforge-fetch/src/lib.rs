//! External collaborators for nanoforge canonicalization.
//!
//! This crate defines the two capability seams the reconciliation core
//! consumes as opaque functions: `ReleaseSource` (named kernel/runtime
//! release bundles, downloaded into the local home layout) and
//! `PackageResolver` (named pre-built application packages resolved to a
//! local path plus a manifest fragment merged into configuration). HTTP
//! implementations use a blocking `ureq` agent; stub implementations back
//! the core's tests.

pub mod package;
pub mod release;
pub mod stub;

pub use package::{DirPackageResolver, HttpPackageResolver, PackageManifest, PackageResolver, ResolvedPackage};
pub use release::{HttpReleaseSource, ReleaseSource};
pub use stub::{StubPackageResolver, StubReleaseSource};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("package not found: {0}")]
    PackageNotFound(String),
    #[error("invalid package manifest for '{name}': {reason}")]
    InvalidManifest { name: String, reason: String },
    #[error("no release available: {0}")]
    NoRelease(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
