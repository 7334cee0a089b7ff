use std::collections::BTreeMap;

use depot_util::errors::{DepotError, DepotResult};
use serde::{Deserialize, Serialize};

/// Default name of the per-directory origin-tracking sidecar.
pub const DEFAULT_TRACKING_FILENAME: &str = "_remote.repositories";

/// Typed session configuration.
///
/// Every knob the engine recognizes is an explicit field; unrecognized keys
/// from an embedding application ride along in `extra` without altering
/// behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Copy snapshot downloads to a base-version-named sibling.
    #[serde(default = "default_true", rename = "snapshot-normalization")]
    pub snapshot_normalization: bool,

    /// Worker pool size for metadata resolution.
    #[serde(default = "default_metadata_threads", rename = "metadata-threads")]
    pub metadata_threads: usize,

    /// Name of the origin-tracking sidecar file.
    #[serde(default = "default_tracking_filename", rename = "tracking-filename")]
    pub tracking_filename: String,

    /// URL protocols exempt from the offline error.
    #[serde(default, rename = "offline-protocols")]
    pub offline_protocols: Vec<String>,

    /// Host names exempt from the offline error.
    #[serde(default, rename = "offline-hosts")]
    pub offline_hosts: Vec<String>,

    /// Priority overrides for pluggable components, keyed by type name.
    /// A `nan` value disables the component.
    #[serde(default)]
    pub priorities: BTreeMap<String, f32>,

    /// Order pluggable components by insertion instead of nominal priority.
    #[serde(default, rename = "implicit-priorities")]
    pub implicit_priorities: bool,

    /// Unrecognized keys, carried but ignored.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_metadata_threads() -> usize {
    4
}

fn default_tracking_filename() -> String {
    DEFAULT_TRACKING_FILENAME.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            snapshot_normalization: true,
            metadata_threads: default_metadata_threads(),
            tracking_filename: default_tracking_filename(),
            offline_protocols: Vec::new(),
            offline_hosts: Vec::new(),
            priorities: BTreeMap::new(),
            implicit_priorities: false,
            extra: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    /// Parse a configuration document in TOML form.
    pub fn from_toml(content: &str) -> DepotResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| DepotError::Invalid {
            message: format!("failed to parse session configuration: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would corrupt the on-disk layout.
    pub fn validate(&self) -> DepotResult<()> {
        let name = &self.tracking_filename;
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(DepotError::Invalid {
                message: format!("illegal tracking filename: {name:?}"),
            });
        }
        Ok(())
    }

    /// Priority override for a component type, if configured.
    ///
    /// Lookup tries the full type path, then the bare type name, then the
    /// bare name with a trailing `Factory` removed. The first hit wins.
    pub fn priority_for(&self, type_name: &str) -> Option<f32> {
        if let Some(p) = self.priorities.get(type_name) {
            return Some(*p);
        }
        let simple = type_name.rsplit("::").next().unwrap_or(type_name);
        if let Some(p) = self.priorities.get(simple) {
            return Some(*p);
        }
        if let Some(stripped) = simple.strip_suffix("Factory") {
            if let Some(p) = self.priorities.get(stripped) {
                return Some(*p);
            }
        }
        None
    }
}
