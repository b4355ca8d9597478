use crate::backend::{ImageInfo, InstanceInfo, ProvisionSpec, ProvisioningBackend};
use crate::BackendError;
use nanoforge_schema::{Config, HomeLayout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "mock-backend.json";

/// Test backend persisting its state as a JSON file in the home layout, so
/// separate reconciliation calls against the same home observe each other,
/// the way real backends do.
pub struct MockBackend {
    layout: HomeLayout,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MockState {
    images: Vec<ImageInfo>,
    instances: Vec<InstanceInfo>,
    next_id: u64,
}

impl MockBackend {
    pub fn new(layout: HomeLayout) -> Self {
        Self { layout }
    }

    fn state_path(&self) -> PathBuf {
        self.layout.root().join(STATE_FILE)
    }

    fn load(&self) -> Result<MockState, BackendError> {
        match std::fs::read_to_string(self.state_path()) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(_) => Ok(MockState::default()),
        }
    }

    fn save(&self, state: &MockState) -> Result<(), BackendError> {
        std::fs::create_dir_all(self.layout.root())?;
        std::fs::write(self.state_path(), serde_json::to_string_pretty(state)?)?;
        Ok(())
    }

    fn write_artifact(config: &Config, tag: &str) -> Result<PathBuf, BackendError> {
        let dest = Path::new(&config.run_config.image_name).with_extension("img");
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Deterministic content so checksums are stable across identical builds.
        std::fs::write(
            &dest,
            format!("{tag}:{}:{}", config.program, config.nanos_version),
        )?;
        Ok(dest)
    }
}

impl ProvisioningBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn build_image(&self, spec: &ProvisionSpec<'_>) -> Result<PathBuf, BackendError> {
        Self::write_artifact(spec.config, "mock-image")
    }

    fn build_image_from_package(
        &self,
        spec: &ProvisionSpec<'_>,
        package_path: &Path,
    ) -> Result<PathBuf, BackendError> {
        Self::write_artifact(spec.config, &format!("mock-pkg:{}", package_path.display()))
    }

    fn create_image(
        &self,
        _spec: &ProvisionSpec<'_>,
        local_path: &Path,
    ) -> Result<(), BackendError> {
        let mut state = self.load()?;
        let name = local_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        state.images.retain(|i| i.name != name);
        state.images.push(ImageInfo {
            id: name.clone(),
            name,
            path: local_path.to_string_lossy().into_owned(),
            size: std::fs::metadata(local_path).map(|m| m.len()).unwrap_or(0),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        self.save(&state)
    }

    fn delete_image(&self, _config: &Config, identifier: &str) -> Result<(), BackendError> {
        let mut state = self.load()?;
        let before = state.images.len();
        state
            .images
            .retain(|i| i.name != identifier && i.path != identifier && i.id != identifier);
        if state.images.len() == before {
            return Err(BackendError::NotFound(format!("image {identifier}")));
        }
        self.save(&state)
    }

    fn list_images(&self, _config: &Config, filter: &str) -> Result<Vec<ImageInfo>, BackendError> {
        let state = self.load()?;
        Ok(state
            .images
            .into_iter()
            .filter(|i| filter.is_empty() || i.name.contains(filter))
            .collect())
    }

    fn create_instance(&self, spec: &ProvisionSpec<'_>) -> Result<(), BackendError> {
        let mut state = self.load()?;
        state.next_id += 1;
        state.instances.push(InstanceInfo {
            id: format!("{}", 10_000 + state.next_id),
            name: spec.config.run_config.instance_name.clone(),
            image: spec.config.run_config.image_name.clone(),
            status: "Running".to_owned(),
            public_ips: Vec::new(),
            private_ips: vec!["10.0.2.15".to_owned()],
        });
        self.save(&state)
    }

    fn delete_instance(&self, _config: &Config, identifier: &str) -> Result<(), BackendError> {
        let mut state = self.load()?;
        let before = state.instances.len();
        state
            .instances
            .retain(|i| i.name != identifier && i.id != identifier);
        if state.instances.len() == before {
            return Err(BackendError::NotFound(format!("instance {identifier}")));
        }
        self.save(&state)
    }

    fn list_instances(&self, _config: &Config) -> Result<Vec<InstanceInfo>, BackendError> {
        Ok(self.load()?.instances)
    }

    fn get_instance_by_name(
        &self,
        _config: &Config,
        name: &str,
    ) -> Result<InstanceInfo, BackendError> {
        self.load()?
            .instances
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| BackendError::NotFound(format!("instance {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanoforge_schema::Arch;

    fn test_config(layout: &HomeLayout) -> Config {
        let mut config = Config::default();
        config.program = "/bin/svc".to_owned();
        config.nanos_version = "0.1.50".to_owned();
        config.run_config.image_name = layout.image_path("svc").to_string_lossy().into_owned();
        config.run_config.instance_name = "svc-1714560000".to_owned();
        config
    }

    #[test]
    fn image_state_survives_separate_handles() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        layout.initialize().unwrap();
        let config = test_config(&layout);
        let spec = ProvisionSpec {
            config: &config,
            arch: Arch::X86_64,
        };

        let first = MockBackend::new(layout.clone());
        let built = first.build_image(&spec).unwrap();
        first.create_image(&spec, &built).unwrap();

        // A fresh handle on the same home sees the image, as the registry
        // hands out a new handle per reconciliation call.
        let second = MockBackend::new(layout);
        let images = second.list_images(&config, "").unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "svc");
    }

    #[test]
    fn instance_roundtrip_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        layout.initialize().unwrap();
        let config = test_config(&layout);
        let backend = MockBackend::new(layout);
        let spec = ProvisionSpec {
            config: &config,
            arch: Arch::X86_64,
        };

        backend.create_instance(&spec).unwrap();
        let info = backend
            .get_instance_by_name(&config, "svc-1714560000")
            .unwrap();
        assert_eq!(info.status, "Running");

        backend.delete_instance(&config, "svc-1714560000").unwrap();
        assert!(matches!(
            backend.get_instance_by_name(&config, "svc-1714560000"),
            Err(BackendError::NotFound(_))
        ));
        assert!(matches!(
            backend.delete_instance(&config, "svc-1714560000"),
            Err(BackendError::NotFound(_))
        ));
    }

    #[test]
    fn mock_builds_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HomeLayout::new(dir.path());
        layout.initialize().unwrap();
        let config = test_config(&layout);
        let backend = MockBackend::new(layout);
        let spec = ProvisionSpec {
            config: &config,
            arch: Arch::X86_64,
        };

        let a = backend.build_image(&spec).unwrap();
        let first = std::fs::read(&a).unwrap();
        let b = backend.build_image(&spec).unwrap();
        let second = std::fs::read(&b).unwrap();
        assert_eq!(first, second);
    }
}
