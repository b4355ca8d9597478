//! Provisioning backends for nanoforge resources.
//!
//! This crate defines the capability seam between the reconciliation core and
//! concrete hosting targets: the `ProvisioningBackend` trait, a fixed target
//! registry (`select_backend`), the on-premises process-host backend, and an
//! in-memory-style mock backend for tests. Cloud targets plug into the same
//! trait but live outside this repository.

pub mod backend;
pub mod mock;
pub mod onprem;

pub use backend::{
    is_supported, select_backend, supported_targets, ImageInfo, InstanceInfo, ProvisionSpec,
    ProvisioningBackend,
};
pub use mock::MockBackend;
pub use onprem::OnPremBackend;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Tagged variant callers pattern-match on for idempotent delete and
    /// identity-clearing reads; never inferred from message text.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported target '{0}'")]
    UnsupportedTarget(String),
    #[error("image build failed: {0}")]
    BuildFailed(String),
    #[error("provisioning failed: {0}")]
    ProvisionFailed(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
