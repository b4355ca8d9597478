//! Shared controller surface types.
//!
//! The host driver owns persistence: controllers hand back these state
//! structs and receive them again on the next call, requiring only that the
//! serialized configuration round-trips unchanged.

use serde::{Deserialize, Serialize};

/// Recorded output of an image resource (executable- or package-sourced).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageState {
    /// Resolved on-disk artifact path.
    pub image_path: String,
    /// Base name the backend knows the image by; cleared by Read when the
    /// backend no longer lists it.
    pub image_name: String,
    pub source: String,
    /// Canonical serialized configuration.
    pub config: String,
    /// blake3 of the built artifact; recorded for executable sources only.
    pub checksum: Option<String>,
    pub target: String,
    pub use_latest_runtime: bool,
}

/// Recorded output of an instance resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceState {
    /// Backend identity; cleared by Read when the instance is gone.
    pub instance_id: String,
    pub image: String,
    pub config: String,
    pub target: String,
    pub status: String,
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
}

/// Diff verdict for one resource. Every change in this system is a replace;
/// `delete_before_replace` asks the driver for delete-then-create ordering
/// whenever anything changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResponse {
    pub has_changes: bool,
    pub delete_before_replace: bool,
    /// Top-level fields that changed, e.g. "name", "source", "config".
    pub changed_fields: Vec<String>,
}

impl DiffResponse {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn replace(changed_fields: Vec<String>) -> Self {
        Self {
            has_changes: true,
            delete_before_replace: true,
            changed_fields,
        }
    }
}

/// One Check validation failure, tagged with the offending input property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    pub property: String,
    pub reason: String,
}

impl CheckFailure {
    pub fn new(property: &str, reason: impl Into<String>) -> Self {
        Self {
            property: property.to_owned(),
            reason: reason.into(),
        }
    }
}
