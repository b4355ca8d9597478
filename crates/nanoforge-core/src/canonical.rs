//! Canonicalizer: raw resource inputs to a fully defaulted configuration.
//!
//! Defaulting is an ordered sequence of check-then-set steps, each touching
//! one field only when it is still unset, so an explicit user value always
//! wins. The detected architecture is carried on the resulting [`Builder`],
//! scoped to one reconciliation call.

use crate::CoreError;
use chrono::Utc;
use nanoforge_backend::{is_supported, select_backend, BackendError, ProvisioningBackend};
use nanoforge_fetch::{PackageResolver, ReleaseSource};
use nanoforge_schema::{
    arch, derive_instance_name, is_outdated, parse_config_str, Arch, Config, HomeLayout, ImageArgs,
    InstanceArgs,
};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The external collaborators one canonicalization consumes.
pub struct Collaborators<'a> {
    pub layout: &'a HomeLayout,
    pub releases: &'a dyn ReleaseSource,
    pub packages: &'a dyn PackageResolver,
}

/// Strategy for turning a resource's `source` field into program, arguments,
/// and (for packages) a local build path. Image and package-image resources
/// share one controller and differ only here.
pub trait SourceResolver: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Apply the source to the configuration before the defaulting pipeline
    /// runs. Returns the local package path for package sources.
    fn resolve(
        &self,
        source: &str,
        config: &mut Config,
        collaborators: &Collaborators<'_>,
    ) -> Result<Option<PathBuf>, CoreError>;
}

/// Source strategy for plain images: the source is an executable path.
/// Existence is checked up front so a bad path fails fast even in preview.
pub struct ExecutableSource;

impl SourceResolver for ExecutableSource {
    fn kind(&self) -> &'static str {
        "executable"
    }

    fn resolve(
        &self,
        source: &str,
        config: &mut Config,
        _collaborators: &Collaborators<'_>,
    ) -> Result<Option<PathBuf>, CoreError> {
        if !Path::new(source).exists() {
            return Err(CoreError::SourceNotFound(source.to_owned()));
        }
        if config.program.is_empty() {
            config.program = source.to_owned();
        }
        Ok(None)
    }
}

/// Source strategy for package images: the source names a pre-built package
/// whose manifest is merged into the configuration. Resolution runs before
/// program/args defaulting, and the merge is check-then-set, so user-declared
/// fields still win.
pub struct PackageSource;

impl SourceResolver for PackageSource {
    fn kind(&self) -> &'static str {
        "package"
    }

    fn resolve(
        &self,
        source: &str,
        config: &mut Config,
        collaborators: &Collaborators<'_>,
    ) -> Result<Option<PathBuf>, CoreError> {
        let resolved = collaborators
            .packages
            .resolve(source, false)
            .map_err(CoreError::PackageResolution)?;
        resolved.manifest.merge_into(config);
        Ok(Some(resolved.path))
    }
}

/// Ephemeral product of one canonicalization: the canonical configuration,
/// its serialized form, the backend handle bound to the declared target, the
/// per-call architecture, and the local package path for package builds.
/// Never persisted; rebuilt on every controller call.
pub struct Builder {
    pub config: Config,
    pub serialized: String,
    pub backend: Box<dyn ProvisioningBackend>,
    pub arch: Arch,
    pub package_path: Option<PathBuf>,
}

impl Builder {
    /// Canonicalize image-resource inputs.
    pub fn canonicalize(
        name: &str,
        args: &ImageArgs,
        strategy: &dyn SourceResolver,
        collaborators: &Collaborators<'_>,
    ) -> Result<Self, CoreError> {
        let mut config = parse_config_str(&args.config)?;

        let package_path = strategy.resolve(&args.source, &mut config, collaborators)?;

        // args[0] is argv0 by convention; prepend the program when the user
        // listed only real arguments. Idempotent, so re-canonicalization
        // does not grow the list.
        if config.args.first() != Some(&config.program) && !config.program.is_empty() {
            config.args.insert(0, config.program.clone());
        }

        if config.run_config.image_name.is_empty() {
            // Local targets keep their artifacts under the home images
            // directory; anything else names the image after the resource.
            config.run_config.image_name = if is_supported(&args.target) {
                collaborators
                    .layout
                    .image_path(name)
                    .to_string_lossy()
                    .into_owned()
            } else {
                name.to_owned()
            };
        }

        let arch = detect_arch(&config, package_path.as_deref())?;
        if !arch.matches_host() {
            debug!("target architecture {arch} differs from host, overriding for this call");
        }

        resolve_runtime(&mut config, collaborators, arch, args.use_latest_runtime)?;

        let backend = bind_backend(&args.target, collaborators.layout)?;
        let serialized = config.canonical_json()?;
        Ok(Self {
            config,
            serialized,
            backend,
            arch,
            package_path,
        })
    }

    /// Canonicalize instance-resource inputs. `existing_name` suppresses the
    /// timestamp-derived instance name when re-canonicalizing against stored
    /// state, so diffs do not churn on the clock.
    pub fn canonicalize_instance(
        args: &InstanceArgs,
        collaborators: &Collaborators<'_>,
        existing_name: Option<&str>,
    ) -> Result<Self, CoreError> {
        let mut config = parse_config_str(&args.config)?;

        if !args.image.is_empty() {
            config.run_config.image_name = args.image.clone();
        }
        if config.run_config.instance_name.is_empty() {
            config.run_config.instance_name = match existing_name {
                Some(name) => name.to_owned(),
                None => derive_instance_name(&config.run_config.image_name, Utc::now()),
            };
        }
        // The host kills its own process group on teardown; instances must
        // survive it.
        config.run_config.background_detach = true;

        let arch = instance_arch(&config);
        resolve_runtime(&mut config, collaborators, arch, false)?;

        let backend = bind_backend(&args.target, collaborators.layout)?;
        let serialized = config.canonical_json()?;
        Ok(Self {
            config,
            serialized,
            backend,
            arch,
            package_path: None,
        })
    }
}

pub(crate) fn bind_backend(
    target: &str,
    layout: &HomeLayout,
) -> Result<Box<dyn ProvisioningBackend>, CoreError> {
    select_backend(target, layout).map_err(|e| match e {
        BackendError::UnsupportedTarget(t) => CoreError::UnsupportedTarget(t),
        other => CoreError::Backend(other),
    })
}

/// Sniff the program's ELF header when it is locally readable; package
/// programs are looked up inside the package directory. Falls back to the
/// host architecture when nothing is readable yet (preview of a dependent
/// resource whose output is unrealized).
fn detect_arch(config: &Config, package_path: Option<&Path>) -> Result<Arch, CoreError> {
    let direct = Path::new(&config.program);
    if direct.is_file() {
        return Ok(arch::detect(direct)?);
    }
    if let Some(pkg) = package_path {
        let inside = pkg.join(config.program.trim_start_matches('/'));
        if inside.is_file() {
            return Ok(arch::detect(&inside)?);
        }
    }
    Ok(Arch::host())
}

/// Instances have no executable to sniff; the kernel path they boot with
/// carries the architecture instead.
fn instance_arch(config: &Config) -> Arch {
    if config.kernel.contains("-arm/") || config.kernel.ends_with("-arm") {
        Arch::Arm64
    } else {
        Arch::host()
    }
}

/// Version resolution plus the kernel/boot path derivation that follows it.
///
/// Downloads when no local release is cached, or when the caller asked for
/// the latest and the remote is newer. A stale-but-usable local release is a
/// logged advisory, never an error; so is an unreachable release endpoint
/// when a local release exists.
fn resolve_runtime(
    config: &mut Config,
    collaborators: &Collaborators<'_>,
    arch: Arch,
    use_latest: bool,
) -> Result<(), CoreError> {
    if config.nanos_version.is_empty() {
        config.nanos_version = match collaborators.releases.local_version() {
            None => {
                let remote = collaborators
                    .releases
                    .remote_version()
                    .map_err(CoreError::VersionResolution)?;
                collaborators
                    .releases
                    .download(&remote, arch)
                    .map_err(CoreError::VersionResolution)?;
                remote
            }
            Some(local) => match collaborators.releases.remote_version() {
                Ok(remote) if use_latest && is_outdated(&local, &remote) => {
                    collaborators
                        .releases
                        .download(&remote, arch)
                        .map_err(CoreError::VersionResolution)?;
                    remote
                }
                Ok(remote) => {
                    if is_outdated(&local, &remote) {
                        warn!("local runtime {local} is older than {remote}");
                    }
                    local
                }
                Err(e) => {
                    debug!("release endpoint unreachable, keeping local runtime {local}: {e}");
                    local
                }
            },
        };
    }

    let layout = collaborators.layout;
    let version = config.nanos_version.clone();
    if config.kernel.is_empty() {
        config.kernel = layout
            .kernel_path(&version, arch)
            .to_string_lossy()
            .into_owned();
    }
    if config.run_config.kernel.is_empty() {
        config.run_config.kernel.clone_from(&config.kernel);
    }
    if config.boot.is_empty() {
        let boot = layout.boot_path(&version);
        if boot.is_file() {
            config.boot = boot.to_string_lossy().into_owned();
        }
    }
    if !config.uefi_boot {
        config.uefi_boot = layout.uefi_path(&version).is_file();
    }
    Ok(())
}
