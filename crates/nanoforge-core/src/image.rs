//! Image resource controller.
//!
//! One controller covers both image kinds; the [`SourceResolver`] strategy
//! decides whether the source field names an executable or a pre-built
//! package. Every configuration change is a replace: Update delegates to
//! Create, and the built artifact is immutable.

use crate::canonical::{
    bind_backend, Builder, Collaborators, ExecutableSource, PackageSource, SourceResolver,
};
use crate::controller::{CheckFailure, DiffResponse, ImageState};
use crate::diff::diff_configs;
use crate::CoreError;
use nanoforge_backend::{is_supported, BackendError, ProvisionSpec};
use nanoforge_schema::{parse_config_str, ImageArgs};
use std::path::Path;
use tracing::{debug, info, warn};

pub struct ImageController<S> {
    strategy: S,
}

impl ImageController<ExecutableSource> {
    /// Controller for plain images built from an executable.
    pub fn executable() -> Self {
        Self::new(ExecutableSource)
    }
}

impl ImageController<PackageSource> {
    /// Controller for images built from a pre-packaged application.
    pub fn package() -> Self {
        Self::new(PackageSource)
    }
}

impl<S: SourceResolver> ImageController<S> {
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }

    /// Validate inputs independent of recorded state. Never touches the
    /// backend; returns one failure per offending property. An empty name
    /// is defaulted from the request name, not rejected.
    pub fn check(&self, request_name: &str, args: &ImageArgs) -> (ImageArgs, Vec<CheckFailure>) {
        let mut resolved = args.clone();
        if resolved.name.is_empty() {
            resolved.name = request_name.to_owned();
        }

        let mut failures = Vec::new();
        if resolved.source.is_empty() {
            failures.push(CheckFailure::new(
                "source",
                format!("a {} source is required", self.strategy.kind()),
            ));
        }
        if resolved.target.is_empty() {
            failures.push(CheckFailure::new("target", "a target is required"));
        } else if !is_supported(&resolved.target) {
            failures.push(CheckFailure::new(
                "target",
                format!("unknown target '{}'", resolved.target),
            ));
        }
        if let Err(e) = parse_config_str(&resolved.config) {
            failures.push(CheckFailure::new("config", e.to_string()));
        }
        (resolved, failures)
    }

    /// Create the image. In preview mode this returns provisional state from
    /// canonical values without invoking the backend, so dependent resources
    /// can compute their own preview from it. In real mode the resolved name
    /// must be free unless `force` is set.
    pub fn create(
        &self,
        name: &str,
        args: &ImageArgs,
        collaborators: &Collaborators<'_>,
        dry_run: bool,
    ) -> Result<ImageState, CoreError> {
        let builder = Builder::canonicalize(name, args, &self.strategy, collaborators)?;
        let image_path = builder.config.run_config.image_name.clone();
        let base = base_name(&image_path);

        let state = ImageState {
            image_path,
            image_name: base.clone(),
            source: args.source.clone(),
            config: builder.serialized.clone(),
            checksum: None,
            target: args.target.clone(),
            use_latest_runtime: args.use_latest_runtime,
        };
        if dry_run {
            debug!("preview create of {} image '{base}'", self.strategy.kind());
            return Ok(state);
        }

        if !args.force {
            let existing = builder.backend.list_images(&builder.config, &base)?;
            if existing.iter().any(|i| i.name == base) {
                return Err(CoreError::AlreadyExists(base));
            }
        }

        let spec = ProvisionSpec {
            config: &builder.config,
            arch: builder.arch,
        };
        let built = match builder.package_path.as_deref() {
            Some(package) => builder.backend.build_image_from_package(&spec, package)?,
            None => builder.backend.build_image(&spec)?,
        };
        info!(
            "built {} image '{base}' at {}",
            self.strategy.kind(),
            built.display()
        );

        // The registered config carries the built file's base name; the
        // recorded state keeps the pre-build serialization so a later Diff
        // re-canonicalization compares like with like.
        let mut registered = builder.config.clone();
        registered.cloud_config.image_name = base_name(&built.to_string_lossy());
        builder.backend.create_image(
            &ProvisionSpec {
                config: &registered,
                arch: builder.arch,
            },
            &built,
        )?;

        let checksum = match builder.package_path {
            None => Some(blake3::hash(&std::fs::read(&built)?).to_hex().to_string()),
            Some(_) => None,
        };
        Ok(ImageState { checksum, ..state })
    }

    /// Every update is a full rebuild under the same logical identity.
    pub fn update(
        &self,
        name: &str,
        args: &ImageArgs,
        collaborators: &Collaborators<'_>,
        dry_run: bool,
    ) -> Result<ImageState, CoreError> {
        self.create(name, args, collaborators, dry_run)
    }

    /// Refresh recorded state against the backend's live listing. A missing
    /// image clears the identity fields instead of erroring.
    pub fn read(
        &self,
        state: &ImageState,
        collaborators: &Collaborators<'_>,
    ) -> Result<ImageState, CoreError> {
        let config = parse_config_str(&state.config)?;
        let backend = bind_backend(&state.target, collaborators.layout)?;

        let images = backend.list_images(&config, "")?;
        if images.is_empty() {
            warn!("backend '{}' lists no images", state.target);
        }
        for image in &images {
            debug!("image {} ({} bytes) at {}", image.name, image.size, image.path);
        }

        let mut next = state.clone();
        if !images.iter().any(|i| i.name == state.image_name) {
            next.image_name.clear();
            next.image_path.clear();
        }
        Ok(next)
    }

    /// Classify the change between recorded state and fresh inputs. Any
    /// change is a replace; the driver is asked to delete before recreating.
    pub fn diff(
        &self,
        name: &str,
        args: &ImageArgs,
        state: &ImageState,
        collaborators: &Collaborators<'_>,
    ) -> Result<DiffResponse, CoreError> {
        if state.config.is_empty() {
            // Nothing meaningful to compare against.
            return Ok(DiffResponse::replace(vec!["config".to_owned()]));
        }
        let builder = Builder::canonicalize(name, args, &self.strategy, collaborators)?;

        let mut changed = Vec::new();
        if base_name(&builder.config.run_config.image_name) != state.image_name {
            changed.push("name".to_owned());
        }
        if args.source != state.source {
            changed.push("source".to_owned());
        }
        match diff_configs(&state.config, &builder.serialized) {
            Ok(ops) if !ops.is_empty() => changed.push("config".to_owned()),
            Ok(_) => {}
            Err(CoreError::ConfigParse(e)) => {
                warn!("stored configuration unreadable, forcing replace: {e}");
                changed.push("config".to_owned());
            }
            Err(e) => return Err(e),
        }

        if changed.is_empty() {
            Ok(DiffResponse::unchanged())
        } else {
            Ok(DiffResponse::replace(changed))
        }
    }

    /// Delete the backend image. A backend `NotFound` is success: the
    /// resource is already in the desired absent state.
    pub fn delete(
        &self,
        state: &ImageState,
        collaborators: &Collaborators<'_>,
    ) -> Result<(), CoreError> {
        let config = parse_config_str(&state.config)?;
        let backend = bind_backend(&state.target, collaborators.layout)?;
        let identifier = if state.image_name.is_empty() {
            &state.image_path
        } else {
            &state.image_name
        };
        match backend.delete_image(&config, identifier) {
            Err(BackendError::NotFound(what)) => {
                debug!("{what} already absent, delete is a no-op");
                Ok(())
            }
            other => Ok(other?),
        }
    }
}

fn base_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned())
}
