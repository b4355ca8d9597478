use serde::{Deserialize, Serialize};

/// Desired-state input for an image resource.
///
/// `source` is interpreted by the controller's source strategy: an executable
/// path for plain images, a package identifier (e.g. `node_v18.7.0`) for
/// package images.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageArgs {
    pub name: String,
    pub source: String,
    /// Raw configuration as a JSON string; empty means "use all defaults".
    pub config: String,
    /// Target backend name (e.g. "onprem").
    pub target: String,
    /// Overwrite an already existing artifact instead of failing.
    pub force: bool,
    /// Download and use the latest runtime release if the local one is older.
    pub use_latest_runtime: bool,
}

/// Desired-state input for an instance resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceArgs {
    /// Image name override; when empty the configuration's image is used.
    pub image: String,
    pub config: String,
    pub target: String,
}
