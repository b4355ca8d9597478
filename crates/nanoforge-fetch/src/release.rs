use crate::FetchError;
use nanoforge_schema::{release_precision, Arch, HomeLayout};
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, info};

/// Source of kernel/runtime release bundles.
///
/// `local_version` reflects what the home layout already holds;
/// `remote_version` asks the release endpoint; `download` populates the
/// local cache as a side effect and returns the bundle directory.
pub trait ReleaseSource: Send + Sync {
    fn local_version(&self) -> Option<String>;

    fn remote_version(&self) -> Result<String, FetchError>;

    fn download(&self, version: &str, arch: Arch) -> Result<PathBuf, FetchError>;
}

/// HTTP-backed release source.
///
/// Expects a flat release endpoint:
/// - `GET /latest.txt` returns the newest release version
/// - `GET /<version>/nanos-<arch>-<version>.tar` returns the release bundle
pub struct HttpReleaseSource {
    base_url: String,
    layout: HomeLayout,
    agent: ureq::Agent,
}

impl HttpReleaseSource {
    pub fn new(base_url: impl Into<String>, layout: HomeLayout) -> Self {
        Self {
            base_url: base_url.into(),
            layout,
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    fn bundle_url(&self, version: &str, arch: Arch) -> String {
        format!(
            "{}/{version}/nanos-{}-{version}.tar",
            self.base_url,
            arch.as_str()
        )
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self
            .agent
            .get(url)
            .call()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        let code = resp.status().as_u16();
        if code >= 400 {
            return Err(FetchError::Http(format!("HTTP {code} for {url}")));
        }
        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(body)
    }
}

impl ReleaseSource for HttpReleaseSource {
    /// Newest release bundle already present in the home layout, determined
    /// by scanning for version-shaped directory names.
    fn local_version(&self) -> Option<String> {
        let entries = std::fs::read_dir(self.layout.root()).ok()?;
        let mut best: Option<(u64, String)> = None;
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(packed) = release_precision(&name) else {
                continue;
            };
            if best.as_ref().is_none_or(|(b, _)| packed > *b) {
                best = Some((packed, name));
            }
        }
        best.map(|(_, name)| name)
    }

    fn remote_version(&self) -> Result<String, FetchError> {
        let url = format!("{}/latest.txt", self.base_url);
        debug!("GET {url}");
        let body = self.get_bytes(&url)?;
        let version = String::from_utf8_lossy(&body).trim().to_owned();
        if version.is_empty() {
            return Err(FetchError::NoRelease(url));
        }
        Ok(version)
    }

    /// Download and unpack a release bundle. The unpack goes through a
    /// staging directory so a failed download never leaves a half-written
    /// bundle behind as a usable local version.
    fn download(&self, version: &str, arch: Arch) -> Result<PathBuf, FetchError> {
        let dest = self.layout.release_dir(version, arch);
        if dest.join("kernel.img").exists() {
            debug!("release {version} ({arch}) already cached");
            return Ok(dest);
        }

        let url = self.bundle_url(version, arch);
        info!("downloading release {version} for {arch}");
        let body = self.get_bytes(&url)?;

        let staging = tempfile::tempdir_in(self.layout.root())?;
        tar::Archive::new(body.as_slice()).unpack(staging.path())?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if dest.exists() {
            std::fs::remove_dir_all(&dest)?;
        }
        std::fs::rename(staging.keep(), &dest)?;
        Ok(dest)
    }
}
