//! Instance resource controller.
//!
//! Launching is fire-and-continue: Create records status "starting" with
//! empty address lists after confirming the backend can see the instance,
//! and the first accurate status/address refresh happens on Read.

use crate::canonical::{bind_backend, Builder, Collaborators};
use crate::controller::{CheckFailure, DiffResponse, InstanceState};
use crate::diff::diff_configs;
use crate::CoreError;
use nanoforge_backend::{
    is_supported, BackendError, ProvisionSpec, ProvisioningBackend,
};
use nanoforge_schema::{parse_config_str, Config, InstanceArgs};
use std::time::Duration;
use tracing::{debug, warn};

/// Launches are asynchronous; poll until the backend reports the instance
/// or give up. A timeout is advisory, not an error.
const SETTLE_ATTEMPTS: u32 = 20;
const SETTLE_INTERVAL: Duration = Duration::from_millis(100);

pub struct InstanceController;

impl InstanceController {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, args: &InstanceArgs) -> Vec<CheckFailure> {
        let mut failures = Vec::new();
        if args.target.is_empty() {
            failures.push(CheckFailure::new("target", "a target is required"));
        } else if !is_supported(&args.target) {
            failures.push(CheckFailure::new(
                "target",
                format!("unknown target '{}'", args.target),
            ));
        }
        match parse_config_str(&args.config) {
            Ok(config) => {
                if args.image.is_empty() && config.run_config.image_name.is_empty() {
                    failures.push(CheckFailure::new("image", "an image is required"));
                }
            }
            Err(e) => failures.push(CheckFailure::new("config", e.to_string())),
        }
        failures
    }

    /// Create the instance. The local process host cannot run two instances
    /// of one image, so a running instance with the same image blocks the
    /// call; preview only warns since the conflict may resolve by apply
    /// time. The check is best-effort advisory, not transactional.
    pub fn create(
        &self,
        args: &InstanceArgs,
        collaborators: &Collaborators<'_>,
        dry_run: bool,
    ) -> Result<InstanceState, CoreError> {
        let builder = Builder::canonicalize_instance(args, collaborators, None)?;
        let image = builder.config.run_config.image_name.clone();
        let instance_name = builder.config.run_config.instance_name.clone();

        let instances = builder.backend.list_instances(&builder.config)?;
        let blocker = instances
            .iter()
            .find(|i| i.image == image && i.status.eq_ignore_ascii_case("running"));
        if let Some(blocker) = blocker {
            if dry_run {
                warn!(
                    "instance '{}' is already running image '{image}'",
                    blocker.name
                );
            } else {
                return Err(CoreError::Conflict {
                    blocker: blocker.name.clone(),
                    image,
                });
            }
        }

        let state = InstanceState {
            instance_id: instance_name.clone(),
            image,
            config: builder.serialized.clone(),
            target: args.target.clone(),
            status: "starting".to_owned(),
            public_ips: Vec::new(),
            private_ips: Vec::new(),
        };
        if dry_run {
            debug!("preview create of instance '{instance_name}'");
            return Ok(state);
        }

        builder.backend.create_instance(&ProvisionSpec {
            config: &builder.config,
            arch: builder.arch,
        })?;
        settle(builder.backend.as_ref(), &builder.config, &instance_name)?;
        Ok(state)
    }

    pub fn update(
        &self,
        args: &InstanceArgs,
        collaborators: &Collaborators<'_>,
        dry_run: bool,
    ) -> Result<InstanceState, CoreError> {
        self.create(args, collaborators, dry_run)
    }

    /// Refresh status and addresses from the backend. A missing instance
    /// clears the identity fields instead of erroring.
    pub fn read(
        &self,
        state: &InstanceState,
        collaborators: &Collaborators<'_>,
    ) -> Result<InstanceState, CoreError> {
        let config = stored_config(&state.config);
        let backend = bind_backend(&state.target, collaborators.layout)?;

        let mut next = state.clone();
        match backend.get_instance_by_name(&config, &state.instance_id) {
            Ok(info) => {
                next.status = info.status;
                next.public_ips = info.public_ips;
                next.private_ips = info.private_ips;
            }
            Err(BackendError::NotFound(_)) => {
                debug!("instance '{}' no longer exists", state.instance_id);
                next.instance_id.clear();
                next.image.clear();
            }
            Err(e) => return Err(e.into()),
        }
        Ok(next)
    }

    pub fn diff(
        &self,
        args: &InstanceArgs,
        state: &InstanceState,
        collaborators: &Collaborators<'_>,
    ) -> Result<DiffResponse, CoreError> {
        if state.config.is_empty() {
            return Ok(DiffResponse::replace(vec!["config".to_owned()]));
        }
        let stored = match parse_config_str(&state.config) {
            Ok(config) => config,
            Err(e) => {
                warn!("stored configuration unreadable, forcing replace: {e}");
                return Ok(DiffResponse::replace(vec!["config".to_owned()]));
            }
        };
        // Pin the recorded instance name so the clock-derived default does
        // not register as a change on every diff.
        let existing = (!stored.run_config.instance_name.is_empty())
            .then_some(stored.run_config.instance_name.as_str());
        let builder = Builder::canonicalize_instance(args, collaborators, existing)?;

        let mut changed = Vec::new();
        if !args.image.is_empty() && args.image != state.image {
            changed.push("image".to_owned());
        }
        if !diff_configs(&state.config, &builder.serialized)?.is_empty() {
            changed.push("config".to_owned());
        }

        if changed.is_empty() {
            Ok(DiffResponse::unchanged())
        } else {
            Ok(DiffResponse::replace(changed))
        }
    }

    /// Stop and forget the instance. Unreadable stored configuration and a
    /// backend `NotFound` both mean the desired absent state already holds.
    pub fn delete(
        &self,
        state: &InstanceState,
        collaborators: &Collaborators<'_>,
    ) -> Result<(), CoreError> {
        let config = match parse_config_str(&state.config) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "stored configuration for '{}' unreadable, treating as deleted: {e}",
                    state.instance_id
                );
                return Ok(());
            }
        };
        let backend = bind_backend(&state.target, collaborators.layout)?;
        match backend.delete_instance(&config, &state.instance_id) {
            Err(BackendError::NotFound(what)) => {
                debug!("{what} already absent, delete is a no-op");
                Ok(())
            }
            other => Ok(other?),
        }
    }
}

impl Default for InstanceController {
    fn default() -> Self {
        Self::new()
    }
}

fn stored_config(serialized: &str) -> Config {
    match parse_config_str(serialized) {
        Ok(config) => config,
        Err(e) => {
            warn!("stored configuration unreadable: {e}");
            Config::default()
        }
    }
}

fn settle(
    backend: &dyn ProvisioningBackend,
    config: &Config,
    name: &str,
) -> Result<(), CoreError> {
    for _ in 0..SETTLE_ATTEMPTS {
        match backend.get_instance_by_name(config, name) {
            Ok(_) => return Ok(()),
            Err(BackendError::NotFound(_)) => std::thread::sleep(SETTLE_INTERVAL),
            Err(e) => return Err(e.into()),
        }
    }
    warn!("instance '{name}' not visible after launch, continuing");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanoforge_fetch::{StubPackageResolver, StubReleaseSource};
    use nanoforge_schema::HomeLayout;

    struct Fixture {
        _dir: tempfile::TempDir,
        layout: HomeLayout,
        releases: StubReleaseSource,
        packages: StubPackageResolver,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        layout.initialize().unwrap();
        let releases = StubReleaseSource::new(layout.clone(), Some("0.1.50"), "0.1.50");
        Fixture {
            _dir: dir,
            layout,
            releases,
            packages: StubPackageResolver::new(),
        }
    }

    impl Fixture {
        fn collaborators(&self) -> Collaborators<'_> {
            Collaborators {
                layout: &self.layout,
                releases: &self.releases,
                packages: &self.packages,
            }
        }

        fn args(&self) -> InstanceArgs {
            InstanceArgs {
                image: self.layout.image_path("svc").to_string_lossy().into_owned(),
                config: String::new(),
                target: "mock".to_owned(),
            }
        }
    }

    #[test]
    fn create_records_starting_state() {
        let fx = fixture();
        let controller = InstanceController::new();
        let state = controller
            .create(&fx.args(), &fx.collaborators(), false)
            .unwrap();

        assert_eq!(state.status, "starting");
        assert!(state.public_ips.is_empty());
        assert!(state.instance_id.starts_with("svc-"));
    }

    #[test]
    fn read_refreshes_status_and_addresses() {
        let fx = fixture();
        let controller = InstanceController::new();
        let state = controller
            .create(&fx.args(), &fx.collaborators(), false)
            .unwrap();

        let next = controller.read(&state, &fx.collaborators()).unwrap();
        assert_eq!(next.status, "Running");
        assert!(!next.private_ips.is_empty());
    }

    #[test]
    fn second_instance_of_same_image_conflicts() {
        let fx = fixture();
        let controller = InstanceController::new();
        controller
            .create(&fx.args(), &fx.collaborators(), false)
            .unwrap();

        assert!(matches!(
            controller.create(&fx.args(), &fx.collaborators(), false),
            Err(CoreError::Conflict { .. })
        ));
        // Preview degrades the conflict to a warning.
        assert!(controller
            .create(&fx.args(), &fx.collaborators(), true)
            .is_ok());
    }

    #[test]
    fn delete_is_idempotent_and_read_clears_identity() {
        let fx = fixture();
        let controller = InstanceController::new();
        let state = controller
            .create(&fx.args(), &fx.collaborators(), false)
            .unwrap();

        controller.delete(&state, &fx.collaborators()).unwrap();
        controller.delete(&state, &fx.collaborators()).unwrap();

        let next = controller.read(&state, &fx.collaborators()).unwrap();
        assert!(next.instance_id.is_empty());
        assert!(next.image.is_empty());
    }

    #[test]
    fn diff_pins_the_recorded_instance_name() {
        let fx = fixture();
        let controller = InstanceController::new();
        let state = controller
            .create(&fx.args(), &fx.collaborators(), true)
            .unwrap();

        let verdict = controller
            .diff(&fx.args(), &state, &fx.collaborators())
            .unwrap();
        assert!(!verdict.has_changes);
    }

    #[test]
    fn diff_image_change_forces_replace() {
        let fx = fixture();
        let controller = InstanceController::new();
        let state = controller
            .create(&fx.args(), &fx.collaborators(), true)
            .unwrap();

        let mut args = fx.args();
        args.image = fx
            .layout
            .image_path("other")
            .to_string_lossy()
            .into_owned();
        let verdict = controller
            .diff(&args, &state, &fx.collaborators())
            .unwrap();
        assert!(verdict.has_changes);
        assert!(verdict.changed_fields.contains(&"image".to_owned()));
    }

    /// Backend whose instances only become visible after a number of
    /// lookups, the way an asynchronous launch behaves.
    struct LaggyBackend {
        visible_after: u32,
        lookups: std::sync::Mutex<u32>,
    }

    impl LaggyBackend {
        fn new(visible_after: u32) -> Self {
            Self {
                visible_after,
                lookups: std::sync::Mutex::new(0),
            }
        }

        fn lookups(&self) -> u32 {
            *self.lookups.lock().unwrap()
        }
    }

    impl ProvisioningBackend for LaggyBackend {
        fn name(&self) -> &'static str {
            "laggy"
        }

        fn build_image(
            &self,
            _spec: &ProvisionSpec<'_>,
        ) -> Result<std::path::PathBuf, BackendError> {
            unimplemented!()
        }

        fn build_image_from_package(
            &self,
            _spec: &ProvisionSpec<'_>,
            _package_path: &std::path::Path,
        ) -> Result<std::path::PathBuf, BackendError> {
            unimplemented!()
        }

        fn create_image(
            &self,
            _spec: &ProvisionSpec<'_>,
            _local_path: &std::path::Path,
        ) -> Result<(), BackendError> {
            unimplemented!()
        }

        fn delete_image(&self, _config: &Config, _identifier: &str) -> Result<(), BackendError> {
            unimplemented!()
        }

        fn list_images(
            &self,
            _config: &Config,
            _filter: &str,
        ) -> Result<Vec<nanoforge_backend::ImageInfo>, BackendError> {
            Ok(Vec::new())
        }

        fn create_instance(&self, _spec: &ProvisionSpec<'_>) -> Result<(), BackendError> {
            Ok(())
        }

        fn delete_instance(
            &self,
            _config: &Config,
            _identifier: &str,
        ) -> Result<(), BackendError> {
            Ok(())
        }

        fn list_instances(
            &self,
            _config: &Config,
        ) -> Result<Vec<nanoforge_backend::InstanceInfo>, BackendError> {
            Ok(Vec::new())
        }

        fn get_instance_by_name(
            &self,
            _config: &Config,
            name: &str,
        ) -> Result<nanoforge_backend::InstanceInfo, BackendError> {
            let mut lookups = self.lookups.lock().unwrap();
            *lookups += 1;
            if *lookups > self.visible_after {
                Ok(nanoforge_backend::InstanceInfo {
                    id: "1".to_owned(),
                    name: name.to_owned(),
                    image: String::new(),
                    status: "Running".to_owned(),
                    public_ips: Vec::new(),
                    private_ips: Vec::new(),
                })
            } else {
                Err(BackendError::NotFound(format!("instance {name}")))
            }
        }
    }

    #[test]
    fn settle_retries_until_the_instance_appears() {
        let backend = LaggyBackend::new(3);
        settle(&backend, &Config::default(), "svc-1714560000").unwrap();
        // Three misses, then the hit.
        assert_eq!(backend.lookups(), 4);
    }

    #[test]
    fn settle_timeout_is_not_an_error() {
        let backend = LaggyBackend::new(u32::MAX);
        settle(&backend, &Config::default(), "svc-1714560000").unwrap();
        assert_eq!(backend.lookups(), SETTLE_ATTEMPTS);
    }

    #[test]
    fn unparsable_stored_config_makes_delete_a_no_op() {
        let fx = fixture();
        let controller = InstanceController::new();
        let state = InstanceState {
            instance_id: "svc-1".to_owned(),
            config: "{broken".to_owned(),
            target: "mock".to_owned(),
            ..InstanceState::default()
        };
        controller.delete(&state, &fx.collaborators()).unwrap();
    }
}
