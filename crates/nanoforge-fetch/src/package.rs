use crate::FetchError;
use nanoforge_schema::Config;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MANIFEST_FILE: &str = "package.manifest.json";

/// Manifest fragment shipped inside a pre-built application package.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct PackageManifest {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub files: Vec<String>,
    pub version: String,
}

impl PackageManifest {
    /// Merge manifest-declared fields into a configuration, check-then-set
    /// per field: anything the user already declared wins.
    pub fn merge_into(&self, config: &mut Config) {
        if config.program.is_empty() {
            config.program.clone_from(&self.program);
        }
        if config.args.is_empty() {
            config.args.clone_from(&self.args);
        }
        if config.files.is_empty() {
            config.files.clone_from(&self.files);
        }
        for (key, value) in &self.env {
            config
                .env
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// A package resolved to local storage.
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub path: PathBuf,
    pub manifest: PackageManifest,
}

/// Resolver for named pre-built application packages.
pub trait PackageResolver: Send + Sync {
    /// Resolve a package name to a local path and its manifest fragment.
    /// `local` restricts the lookup to packages already on disk.
    fn resolve(&self, name: &str, local: bool) -> Result<ResolvedPackage, FetchError>;
}

fn read_package_dir(name: &str, dir: &Path) -> Result<ResolvedPackage, FetchError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let content = std::fs::read_to_string(&manifest_path)
        .map_err(|_| FetchError::PackageNotFound(name.to_owned()))?;
    let manifest: PackageManifest =
        serde_json::from_str(&content).map_err(|e| FetchError::InvalidManifest {
            name: name.to_owned(),
            reason: e.to_string(),
        })?;
    if manifest.program.is_empty() {
        return Err(FetchError::InvalidManifest {
            name: name.to_owned(),
            reason: "manifest declares no program".to_owned(),
        });
    }
    Ok(ResolvedPackage {
        path: dir.to_path_buf(),
        manifest,
    })
}

/// Resolver over a local packages directory: `<root>/<name>/package.manifest.json`.
pub struct DirPackageResolver {
    root: PathBuf,
}

impl DirPackageResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PackageResolver for DirPackageResolver {
    fn resolve(&self, name: &str, _local: bool) -> Result<ResolvedPackage, FetchError> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(FetchError::PackageNotFound(name.to_owned()));
        }
        read_package_dir(name, &dir)
    }
}

/// HTTP-backed package resolver with a local unpack cache.
///
/// Expects `GET /<name>.tar` to return the package tarball with its
/// manifest at `package.manifest.json`. Downloaded packages are unpacked
/// under the cache root and served from there on subsequent calls.
pub struct HttpPackageResolver {
    base_url: String,
    cache_root: PathBuf,
    agent: ureq::Agent,
}

impl HttpPackageResolver {
    pub fn new(base_url: impl Into<String>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into(),
            cache_root: cache_root.into(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    fn fetch_into_cache(&self, name: &str, dir: &Path) -> Result<(), FetchError> {
        let url = format!("{}/{name}.tar", self.base_url);
        info!("downloading package {name}");
        let resp = self.agent.get(&url).call().map_err(|e| match e {
            ureq::Error::StatusCode(404) => FetchError::PackageNotFound(name.to_owned()),
            other => FetchError::Http(other.to_string()),
        })?;
        let code = resp.status().as_u16();
        if code == 404 {
            return Err(FetchError::PackageNotFound(name.to_owned()));
        }
        if code >= 400 {
            return Err(FetchError::Http(format!("HTTP {code} for {url}")));
        }
        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| FetchError::Http(e.to_string()))?;

        std::fs::create_dir_all(&self.cache_root)?;
        let staging = tempfile::tempdir_in(&self.cache_root)?;
        tar::Archive::new(body.as_slice()).unpack(staging.path())?;
        std::fs::rename(staging.keep(), dir)?;
        Ok(())
    }
}

impl PackageResolver for HttpPackageResolver {
    fn resolve(&self, name: &str, local: bool) -> Result<ResolvedPackage, FetchError> {
        let dir = self.cache_root.join(name);
        if dir.is_dir() {
            debug!("package {name} served from cache");
            return read_package_dir(name, &dir);
        }
        if local {
            return Err(FetchError::PackageNotFound(name.to_owned()));
        }
        self.fetch_into_cache(name, &dir)?;
        read_package_dir(name, &dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_package(root: &Path, name: &str, manifest: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    #[test]
    fn resolves_local_package_manifest() {
        let root = tempfile::tempdir().unwrap();
        write_package(
            root.path(),
            "node_v18.7.0",
            r#"{"Program":"/node","Args":["node","index.js"],"Version":"18.7.0"}"#,
        );

        let resolver = DirPackageResolver::new(root.path());
        let resolved = resolver.resolve("node_v18.7.0", true).unwrap();
        assert_eq!(resolved.manifest.program, "/node");
        assert_eq!(resolved.path, root.path().join("node_v18.7.0"));
    }

    #[test]
    fn unknown_package_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let resolver = DirPackageResolver::new(root.path());
        assert!(matches!(
            resolver.resolve("missing", true),
            Err(FetchError::PackageNotFound(_))
        ));
    }

    #[test]
    fn manifest_without_program_is_invalid() {
        let root = tempfile::tempdir().unwrap();
        write_package(root.path(), "broken", r#"{"Args":["x"]}"#);
        let resolver = DirPackageResolver::new(root.path());
        assert!(matches!(
            resolver.resolve("broken", true),
            Err(FetchError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn merge_keeps_user_declared_fields() {
        let manifest = PackageManifest {
            program: "/pkg/node".to_owned(),
            args: vec!["node".to_owned(), "index.js".to_owned()],
            env: BTreeMap::from([("NODE_ENV".to_owned(), "production".to_owned())]),
            files: vec!["index.js".to_owned()],
            version: "18.7.0".to_owned(),
        };

        let mut config = Config::default();
        config.program = "/custom/entry".to_owned();
        config
            .env
            .insert("NODE_ENV".to_owned(), "development".to_owned());

        manifest.merge_into(&mut config);

        assert_eq!(config.program, "/custom/entry");
        assert_eq!(config.env["NODE_ENV"], "development");
        assert_eq!(config.args, vec!["node", "index.js"]);
        assert_eq!(config.files, vec!["index.js"]);
    }

    #[test]
    fn merge_fills_unset_fields() {
        let manifest = PackageManifest {
            program: "/pkg/node".to_owned(),
            args: vec!["node".to_owned()],
            env: BTreeMap::from([("PORT".to_owned(), "3000".to_owned())]),
            files: Vec::new(),
            version: "18.7.0".to_owned(),
        };

        let mut config = Config::default();
        manifest.merge_into(&mut config);

        assert_eq!(config.program, "/pkg/node");
        assert_eq!(config.args, vec!["node"]);
        assert_eq!(config.env["PORT"], "3000");
    }
}
