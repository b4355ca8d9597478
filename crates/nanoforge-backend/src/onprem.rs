use crate::backend::{ImageInfo, InstanceInfo, ProvisionSpec, ProvisioningBackend};
use crate::BackendError;
use nanoforge_schema::{Config, HomeLayout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

const IMAGE_MAGIC: &[u8] = b"NFIMG\0";

/// The on-premises process host.
///
/// Images are assembled files under the home images directory; instances
/// are detached child processes recorded as JSON files under the home
/// instances directory, with liveness probed through signal 0.
pub struct OnPremBackend {
    layout: HomeLayout,
}

/// On-disk record for one launched instance.
#[derive(Debug, Serialize, Deserialize)]
struct InstanceRecord {
    name: String,
    pid: u32,
    image: String,
    created_at: String,
}

impl OnPremBackend {
    pub fn new(layout: HomeLayout) -> Self {
        Self { layout }
    }

    fn image_dest(config: &Config) -> PathBuf {
        Path::new(&config.run_config.image_name).with_extension("img")
    }

    fn assemble_image(
        &self,
        config: &Config,
        program: &Path,
        dest: &Path,
    ) -> Result<PathBuf, BackendError> {
        let program_bytes = std::fs::read(program).map_err(|e| {
            BackendError::BuildFailed(format!("cannot read program {}: {e}", program.display()))
        })?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut image = Vec::with_capacity(IMAGE_MAGIC.len() + program_bytes.len() + 64);
        image.extend_from_slice(IMAGE_MAGIC);
        image.extend_from_slice(config.nanos_version.as_bytes());
        image.push(0);
        image.extend_from_slice(config.kernel.as_bytes());
        image.push(0);
        image.extend_from_slice(&program_bytes);
        std::fs::write(dest, image)?;

        debug!("assembled image at {}", dest.display());
        Ok(dest.to_path_buf())
    }

    fn read_record(&self, name: &str) -> Result<InstanceRecord, BackendError> {
        let path = self.layout.instance_record(name);
        let content = std::fs::read_to_string(&path)
            .map_err(|_| BackendError::NotFound(format!("instance {name}")))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn record_to_info(record: &InstanceRecord) -> InstanceInfo {
        let running = process_alive(record.pid);
        InstanceInfo {
            id: record.pid.to_string(),
            name: record.name.clone(),
            image: record.image.clone(),
            status: if running { "Running" } else { "Stopped" }.to_owned(),
            public_ips: Vec::new(),
            private_ips: if running {
                vec!["127.0.0.1".to_owned()]
            } else {
                Vec::new()
            },
        }
    }
}

#[allow(unsafe_code)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: kill() with signal 0 only probes for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[allow(unsafe_code)]
fn terminate(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill() with a validated pid and SIGTERM is safe.
    let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
    if ret != 0 {
        let errno = std::io::Error::last_os_error();
        if errno.raw_os_error() != Some(libc::ESRCH) {
            warn!("failed to send SIGTERM to pid {pid}: {errno}");
        }
    }
}

impl ProvisioningBackend for OnPremBackend {
    fn name(&self) -> &'static str {
        "onprem"
    }

    fn build_image(&self, spec: &ProvisionSpec<'_>) -> Result<PathBuf, BackendError> {
        let dest = Self::image_dest(spec.config);
        info!(
            "building image {} for {}",
            dest.display(),
            spec.arch.as_str()
        );
        self.assemble_image(spec.config, Path::new(&spec.config.program), &dest)
    }

    fn build_image_from_package(
        &self,
        spec: &ProvisionSpec<'_>,
        package_path: &Path,
    ) -> Result<PathBuf, BackendError> {
        // Package manifests declare programs relative to the package root.
        let program_in_package =
            package_path.join(spec.config.program.trim_start_matches('/'));
        let program = if program_in_package.exists() {
            program_in_package
        } else {
            PathBuf::from(&spec.config.program)
        };

        let dest = Self::image_dest(spec.config);
        info!(
            "building image {} from package {}",
            dest.display(),
            package_path.display()
        );
        self.assemble_image(spec.config, &program, &dest)
    }

    fn create_image(
        &self,
        _spec: &ProvisionSpec<'_>,
        local_path: &Path,
    ) -> Result<(), BackendError> {
        if !local_path.exists() {
            return Err(BackendError::NotFound(format!(
                "built image {}",
                local_path.display()
            )));
        }
        // Built images land under the images directory already; anything
        // else gets copied in under its own file name.
        let images_dir = self.layout.images_dir();
        if local_path.parent() != Some(images_dir.as_path()) {
            std::fs::create_dir_all(&images_dir)?;
            let file_name = local_path
                .file_name()
                .ok_or_else(|| BackendError::ProvisionFailed("image path has no file name".to_owned()))?;
            std::fs::copy(local_path, images_dir.join(file_name))?;
        }
        Ok(())
    }

    fn delete_image(&self, _config: &Config, identifier: &str) -> Result<(), BackendError> {
        let direct = PathBuf::from(identifier);
        let candidates = [
            direct.clone(),
            self.layout.image_path(identifier),
            self.layout
                .image_path(identifier)
                .with_extension("img"),
        ];
        for candidate in &candidates {
            if candidate.is_file() {
                std::fs::remove_file(candidate)?;
                debug!("deleted image {}", candidate.display());
                return Ok(());
            }
        }
        Err(BackendError::NotFound(format!("image {identifier}")))
    }

    fn list_images(&self, _config: &Config, filter: &str) -> Result<Vec<ImageInfo>, BackendError> {
        let images_dir = self.layout.images_dir();
        let mut images = Vec::new();
        if !images_dir.is_dir() {
            return Ok(images);
        }
        for entry in std::fs::read_dir(&images_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !filter.is_empty() && !name.contains(filter) {
                continue;
            }
            let meta = entry.metadata()?;
            let created_at = meta
                .modified()
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
                .unwrap_or_default();
            images.push(ImageInfo {
                id: name.clone(),
                name,
                path: path.to_string_lossy().into_owned(),
                size: meta.len(),
                created_at,
            });
        }
        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }

    fn create_instance(&self, spec: &ProvisionSpec<'_>) -> Result<(), BackendError> {
        let config = spec.config;
        let name = &config.run_config.instance_name;

        std::fs::create_dir_all(self.layout.instances_dir())?;

        let mut command = Command::new(&config.program);
        // args[0] is argv0 by convention; the remainder are real arguments.
        if config.args.len() > 1 {
            command.args(&config.args[1..]);
        }
        command
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if config.run_config.background_detach {
            // New process group: a teardown signal aimed at the caller's
            // group must not reach the instance.
            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                command.process_group(0);
            }
        }

        let child = command.spawn().map_err(|e| {
            BackendError::ProvisionFailed(format!("cannot launch {}: {e}", config.program))
        })?;

        let record = InstanceRecord {
            name: name.clone(),
            pid: child.id(),
            image: config.run_config.image_name.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(self.layout.instance_record(name), json)?;

        info!("launched instance {name} (pid {})", record.pid);
        Ok(())
    }

    fn delete_instance(&self, _config: &Config, identifier: &str) -> Result<(), BackendError> {
        let record = self.read_record(identifier)?;
        if process_alive(record.pid) {
            terminate(record.pid);
        }
        std::fs::remove_file(self.layout.instance_record(identifier))?;
        info!("deleted instance {identifier}");
        Ok(())
    }

    fn list_instances(&self, _config: &Config) -> Result<Vec<InstanceInfo>, BackendError> {
        let dir = self.layout.instances_dir();
        let mut instances = Vec::new();
        if !dir.is_dir() {
            return Ok(instances);
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(name) = entry
                .path()
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
            else {
                continue;
            };
            match self.read_record(&name) {
                Ok(record) => instances.push(Self::record_to_info(&record)),
                Err(e) => warn!("skipping unreadable instance record {name}: {e}"),
            }
        }
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }

    fn get_instance_by_name(
        &self,
        _config: &Config,
        name: &str,
    ) -> Result<InstanceInfo, BackendError> {
        let record = self.read_record(name)?;
        Ok(Self::record_to_info(&record))
    }
}
