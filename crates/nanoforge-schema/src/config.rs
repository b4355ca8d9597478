use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Canonical desired/recorded state for one provisioning backend call.
///
/// Serializes with PascalCase field names; the serialized form is what the
/// reconciliation driver stores as state and what the structural differ
/// compares. Once canonicalized, `kernel`, `nanos_version`, and the image
/// name fields are always non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct Config {
    /// Path of the target executable (or package-provided program).
    pub program: String,
    pub args: Vec<String>,
    /// Environment variables; `BTreeMap` keeps keys unique and ordered.
    pub env: BTreeMap<String, String>,
    /// Extra files bundled into the image, as declared by package manifests.
    pub files: Vec<String>,
    /// Boot image path, set when one exists on local storage for the version.
    pub boot: String,
    pub uefi_boot: bool,
    /// Resolved kernel image path.
    pub kernel: String,
    /// Resolved runtime release version.
    pub nanos_version: String,
    pub run_config: RunConfig,
    pub cloud_config: CloudConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct RunConfig {
    pub instance_name: String,
    /// On-disk artifact name; joined under the home images directory for
    /// the on-prem target.
    pub image_name: String,
    pub kernel: String,
    pub memory: String,
    pub accel: bool,
    /// Detach instances from the caller's process group so a host teardown
    /// signal does not kill them.
    pub background_detach: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct CloudConfig {
    pub platform: String,
    pub image_name: String,
    pub zone: String,
    pub bucket_name: String,
}

impl Config {
    /// Serialize to the canonical JSON form. Field order is fixed by the
    /// struct definition, so equal configurations produce equal strings.
    pub fn canonical_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse a raw configuration string. Empty input is valid and means
/// "use all defaults"; anything else must be the serialized `Config` form.
pub fn parse_config_str(input: &str) -> Result<Config, ConfigError> {
    if input.is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_json::from_str(input)?)
}

/// Derive an instance name from the image name and a creation timestamp.
///
/// Timestamp-second granularity is the actual uniqueness source; callers
/// must not rely on sub-second uniqueness.
pub fn derive_instance_name(image_name: &str, now: DateTime<Utc>) -> String {
    let base = image_name
        .rsplit('/')
        .next()
        .unwrap_or(image_name)
        .split('.')
        .next()
        .unwrap_or(image_name);
    format!("{base}-{}", now.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_config_parses_to_defaults() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(parse_config_str("{not json").is_err());
    }

    #[test]
    fn canonical_json_roundtrips() {
        let mut config = Config::default();
        config.program = "/bin/svc".to_owned();
        config.kernel = "/home/.nanoforge/0.1.50/kernel.img".to_owned();
        config.env.insert("PORT".to_owned(), "8080".to_owned());

        let json = config.canonical_json().unwrap();
        let parsed = parse_config_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn canonical_json_uses_pascal_case() {
        let config = Config::default();
        let json = config.canonical_json().unwrap();
        assert!(json.contains("\"Program\""));
        assert!(json.contains("\"RunConfig\""));
        assert!(json.contains("\"NanosVersion\""));
        assert!(json.contains("\"UefiBoot\""));
    }

    #[test]
    fn key_reordering_does_not_change_canonical_form() {
        let a = parse_config_str(r#"{"Program":"/bin/a","Kernel":"/k"}"#).unwrap();
        let b = parse_config_str(r#"{"Kernel":"/k","Program":"/bin/a"}"#).unwrap();
        assert_eq!(
            a.canonical_json().unwrap(),
            b.canonical_json().unwrap()
        );
    }

    #[test]
    fn instance_name_derived_from_image_base_and_seconds() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let name = derive_instance_name("/home/.nanoforge/images/svc.img", now);
        assert_eq!(name, format!("svc-{}", now.timestamp()));
    }

    #[test]
    fn instance_name_handles_plain_names() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let name = derive_instance_name("svc", now);
        assert_eq!(name, format!("svc-{}", now.timestamp()));
    }
}
