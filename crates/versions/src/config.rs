//! Version and update list loading
//!
//! Both lists ship as YAML files next to the master manifests and are
//! read once at startup.

use std::collections::HashMap;
use std::path::Path;

use crate::error::VersionError;
use crate::types::{MasterUpdate, MasterVersion};

/// Loads the master version catalogue from a YAML file, keyed by id.
pub fn load_versions(path: &Path) -> Result<HashMap<String, MasterVersion>, VersionError> {
    let raw = std::fs::read_to_string(path).map_err(|e| VersionError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let list: Vec<MasterVersion> =
        serde_yaml::from_str(&raw).map_err(|e| VersionError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
    Ok(list.into_iter().map(|v| (v.id.clone(), v)).collect())
}

/// Loads the declared update edges from a YAML file.
pub fn load_updates(path: &Path) -> Result<Vec<MasterUpdate>, VersionError> {
    let raw = std::fs::read_to_string(path).map_err(|e| VersionError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_yaml::from_str(&raw).map_err(|e| VersionError::Parse {
        path: path.display().to_string(),
        source: e,
    })
}

/// Returns the version flagged as default in the catalogue.
pub fn default_master_version(
    versions: &HashMap<String, MasterVersion>,
) -> Result<&MasterVersion, VersionError> {
    versions
        .values()
        .find(|v| v.default)
        .ok_or(VersionError::NoDefaultVersion)
}
