use crate::arch::Arch;
use std::path::{Path, PathBuf};

const HOME_ENV: &str = "NANOFORGE_HOME";
/// Directory suffix for arm64 release bundles alongside the default ones.
const ARM_SUFFIX: &str = "-arm";

/// Directory layout for the local artifact tree.
///
/// Holds built images, downloaded per-version kernel/boot bundles, and
/// on-prem instance records. All paths are derived; subdirectories are
/// created lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct HomeLayout {
    root: PathBuf,
}

impl HomeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the home root from `NANOFORGE_HOME`, falling back to
    /// `~/.nanoforge`.
    pub fn from_env() -> Self {
        let root = std::env::var_os(HOME_ENV).map_or_else(
            || {
                let home = std::env::var_os("HOME").unwrap_or_else(|| ".".into());
                PathBuf::from(home).join(".nanoforge")
            },
            PathBuf::from,
        );
        Self { root }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    #[inline]
    pub fn image_path(&self, name: &str) -> PathBuf {
        self.images_dir().join(name)
    }

    #[inline]
    pub fn instances_dir(&self) -> PathBuf {
        self.root.join("instances")
    }

    /// JSON record describing one on-prem instance.
    #[inline]
    pub fn instance_record(&self, name: &str) -> PathBuf {
        self.instances_dir().join(format!("{name}.json"))
    }

    /// Release bundle directory for a version; arm64 bundles live in a
    /// suffixed sibling directory.
    #[inline]
    pub fn release_dir(&self, version: &str, arch: Arch) -> PathBuf {
        match arch {
            Arch::X86_64 => self.root.join(version),
            Arch::Arm64 => self.root.join(format!("{version}{ARM_SUFFIX}")),
        }
    }

    #[inline]
    pub fn kernel_path(&self, version: &str, arch: Arch) -> PathBuf {
        self.release_dir(version, arch).join("kernel.img")
    }

    /// Boot image lives only in the default-architecture bundle.
    #[inline]
    pub fn boot_path(&self, version: &str) -> PathBuf {
        self.root.join(version).join("boot.img")
    }

    #[inline]
    pub fn uefi_path(&self, version: &str) -> PathBuf {
        self.root.join(version).join("bootx64.efi")
    }

    pub fn initialize(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.images_dir())?;
        std::fs::create_dir_all(self.instances_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_paths_join_under_images() {
        let layout = HomeLayout::new("/home/user/.nanoforge");
        assert_eq!(
            layout.image_path("svc"),
            PathBuf::from("/home/user/.nanoforge/images/svc")
        );
    }

    #[test]
    fn kernel_path_carries_arch_suffix() {
        let layout = HomeLayout::new("/nf");
        assert_eq!(
            layout.kernel_path("0.1.50", Arch::X86_64),
            PathBuf::from("/nf/0.1.50/kernel.img")
        );
        assert_eq!(
            layout.kernel_path("0.1.50", Arch::Arm64),
            PathBuf::from("/nf/0.1.50-arm/kernel.img")
        );
    }

    #[test]
    fn initialize_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        layout.initialize().unwrap();
        assert!(layout.images_dir().is_dir());
        assert!(layout.instances_dir().is_dir());
    }

    #[test]
    fn instance_record_is_json_file() {
        let layout = HomeLayout::new("/nf");
        assert_eq!(
            layout.instance_record("svc-170000"),
            PathBuf::from("/nf/instances/svc-170000.json")
        );
    }
}
