//! Data model for nanoforge reconciliation.
//!
//! This crate defines the schema layer: the canonical `Config` describing one
//! provisioning request (JSON serialized, PascalCase field names), the
//! per-resource input surfaces (`ImageArgs`, `InstanceArgs`), ELF architecture
//! detection, runtime version comparison, and the `HomeLayout` describing the
//! local artifact tree (images, per-version kernels, instance records).

pub mod arch;
pub mod args;
pub mod config;
pub mod layout;
pub mod version;

pub use arch::Arch;
pub use args::{ImageArgs, InstanceArgs};
pub use config::{
    derive_instance_name, parse_config_str, CloudConfig, Config, ConfigError, RunConfig,
};
pub use layout::HomeLayout;
pub use version::{is_outdated, release_precision};
