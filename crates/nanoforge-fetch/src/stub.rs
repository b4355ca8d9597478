use crate::package::{PackageManifest, PackageResolver, ResolvedPackage};
use crate::release::ReleaseSource;
use crate::FetchError;
use nanoforge_schema::{Arch, HomeLayout};
use std::path::PathBuf;
use std::sync::Mutex;

/// Deterministic release source for tests: fixed local/remote versions,
/// downloads materialize a kernel image in the home layout and are recorded
/// so tests can assert on fetch behavior.
pub struct StubReleaseSource {
    layout: HomeLayout,
    local: Mutex<Option<String>>,
    remote: String,
    downloads: Mutex<Vec<(String, Arch)>>,
}

impl StubReleaseSource {
    pub fn new(layout: HomeLayout, local: Option<&str>, remote: &str) -> Self {
        Self {
            layout,
            local: Mutex::new(local.map(str::to_owned)),
            remote: remote.to_owned(),
            downloads: Mutex::new(Vec::new()),
        }
    }

    pub fn downloads(&self) -> Vec<(String, Arch)> {
        self.downloads.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl ReleaseSource for StubReleaseSource {
    fn local_version(&self) -> Option<String> {
        self.local.lock().ok().and_then(|l| l.clone())
    }

    fn remote_version(&self) -> Result<String, FetchError> {
        Ok(self.remote.clone())
    }

    fn download(&self, version: &str, arch: Arch) -> Result<PathBuf, FetchError> {
        let dir = self.layout.release_dir(version, arch);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("kernel.img"), b"stub-kernel")?;

        if let Ok(mut downloads) = self.downloads.lock() {
            downloads.push((version.to_owned(), arch));
        }
        if let Ok(mut local) = self.local.lock() {
            *local = Some(version.to_owned());
        }
        Ok(dir)
    }
}

/// Package resolver for tests: serves manifests registered up front and
/// reports everything else as not found.
#[derive(Default)]
pub struct StubPackageResolver {
    packages: Vec<(String, ResolvedPackage)>,
}

impl StubPackageResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(
        mut self,
        name: &str,
        path: impl Into<PathBuf>,
        manifest: PackageManifest,
    ) -> Self {
        self.packages.push((
            name.to_owned(),
            ResolvedPackage {
                path: path.into(),
                manifest,
            },
        ));
        self
    }
}

impl PackageResolver for StubPackageResolver {
    fn resolve(&self, name: &str, _local: bool) -> Result<ResolvedPackage, FetchError> {
        self.packages
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, resolved)| resolved.clone())
            .ok_or_else(|| FetchError::PackageNotFound(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_release_download_materializes_kernel() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        let source = StubReleaseSource::new(layout.clone(), None, "0.1.50");

        assert_eq!(source.local_version(), None);
        let bundle = source.download("0.1.50", Arch::X86_64).unwrap();
        assert!(bundle.join("kernel.img").exists());
        assert_eq!(source.local_version().as_deref(), Some("0.1.50"));
        assert_eq!(source.downloads(), vec![("0.1.50".to_owned(), Arch::X86_64)]);
    }

    #[test]
    fn stub_resolver_serves_registered_packages() {
        let manifest = PackageManifest {
            program: "/pkg/app".to_owned(),
            ..PackageManifest::default()
        };
        let resolver =
            StubPackageResolver::new().with_package("app_v1", "/tmp/packages/app_v1", manifest);

        assert!(resolver.resolve("app_v1", false).is_ok());
        assert!(matches!(
            resolver.resolve("other", false),
            Err(FetchError::PackageNotFound(_))
        ));
    }
}
