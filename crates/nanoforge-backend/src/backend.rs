use crate::BackendError;
use nanoforge_schema::{Arch, Config, HomeLayout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-call provisioning context: the canonical configuration plus the
/// architecture chosen for this reconciliation. The architecture travels
/// here, never in process-wide state, so concurrent calls targeting
/// different architectures stay independent.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionSpec<'a> {
    pub config: &'a Config,
    pub arch: Arch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
}

/// Capability contract for one hosting target.
///
/// Everything the reconciliation core needs from a target goes through
/// these calls; `get_instance_by_name` reports unknown names as
/// [`BackendError::NotFound`] so callers can branch without inspecting
/// message text.
pub trait ProvisioningBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build a bootable image from the configured executable.
    /// Returns the local path of the built artifact.
    fn build_image(&self, spec: &ProvisionSpec<'_>) -> Result<PathBuf, BackendError>;

    /// Build a bootable image from a resolved package directory.
    fn build_image_from_package(
        &self,
        spec: &ProvisionSpec<'_>,
        package_path: &Path,
    ) -> Result<PathBuf, BackendError>;

    /// Register a built image with the target.
    fn create_image(&self, spec: &ProvisionSpec<'_>, local_path: &Path)
        -> Result<(), BackendError>;

    fn delete_image(&self, config: &Config, identifier: &str) -> Result<(), BackendError>;

    /// List images, optionally narrowed by a name filter (empty matches all).
    fn list_images(&self, config: &Config, filter: &str) -> Result<Vec<ImageInfo>, BackendError>;

    fn create_instance(&self, spec: &ProvisionSpec<'_>) -> Result<(), BackendError>;

    fn delete_instance(&self, config: &Config, identifier: &str) -> Result<(), BackendError>;

    fn list_instances(&self, config: &Config) -> Result<Vec<InstanceInfo>, BackendError>;

    fn get_instance_by_name(
        &self,
        config: &Config,
        name: &str,
    ) -> Result<InstanceInfo, BackendError>;
}

pub const TARGET_ONPREM: &str = "onprem";
pub const TARGET_MOCK: &str = "mock";

pub fn supported_targets() -> &'static [&'static str] {
    &[TARGET_ONPREM, TARGET_MOCK]
}

pub fn is_supported(target: &str) -> bool {
    supported_targets().contains(&target)
}

/// Resolve a target name to a bound backend handle.
pub fn select_backend(
    target: &str,
    layout: &HomeLayout,
) -> Result<Box<dyn ProvisioningBackend>, BackendError> {
    match target {
        TARGET_ONPREM => Ok(Box::new(crate::onprem::OnPremBackend::new(layout.clone()))),
        TARGET_MOCK => Ok(Box::new(crate::mock::MockBackend::new(layout.clone()))),
        other => Err(BackendError::UnsupportedTarget(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_targets() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        assert!(select_backend("onprem", &layout).is_ok());
        assert!(select_backend("mock", &layout).is_ok());
    }

    #[test]
    fn select_unknown_target_fails() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        assert!(matches!(
            select_backend("gcp", &layout),
            Err(BackendError::UnsupportedTarget(_))
        ));
    }

    #[test]
    fn supported_targets_match_registry() {
        assert!(is_supported("onprem"));
        assert!(is_supported("mock"));
        assert!(!is_supported("aws"));
    }
}
