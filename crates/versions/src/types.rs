//! Master version and update list types
//!
//! Both lists are loaded from YAML files at startup and passed into
//! the controller; the field names match the configuration files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A Kubernetes master (control-plane) version the controller can
/// deploy, with the manifest files for each component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterVersion {
    /// Version id, a plain semantic version like `1.5.3`.
    pub id: String,

    /// Display name; falls back to the id when empty.
    #[serde(default)]
    pub name: String,

    /// Marks the version assigned to clusters that do not pin one.
    #[serde(default)]
    pub default: bool,

    /// Worker-node versions allowed to join a master of this version.
    #[serde(default)]
    pub allowed_node_versions: Vec<String>,

    /// Manifest file for the etcd operator deployment.
    #[serde(default)]
    pub etcd_operator_deployment_yaml: String,

    /// Manifest file for the etcd cluster custom resource.
    #[serde(default)]
    pub etcd_cluster_yaml: String,

    /// Manifest file for the apiserver deployment.
    #[serde(default)]
    pub apiserver_deployment_yaml: String,

    /// Manifest file for the controller-manager deployment.
    #[serde(default)]
    pub controller_deployment_yaml: String,

    /// Manifest file for the scheduler deployment.
    #[serde(default)]
    pub scheduler_deployment_yaml: String,

    /// Manifest file for the node controller deployment; optional.
    #[serde(default)]
    pub node_controller_deployment_yaml: String,

    /// Manifest file for the addon manager deployment; optional.
    #[serde(default)]
    pub addon_manager_deployment_yaml: String,

    /// Free-form values referenced by the manifests.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// A declared permissible master version transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterUpdate {
    /// Source version: an exact id or a range expression such as
    /// `1.5.*` or `~1.5.x`, depending on the matcher in use.
    pub from: String,

    /// Target version id.
    pub to: String,

    /// Applied by the automatic update loop without operator action.
    #[serde(default)]
    pub automatic: bool,

    /// Disabled updates are kept in the list but never applied.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Shown to users in the version picker.
    #[serde(default = "default_true")]
    pub visible: bool,
}

fn default_true() -> bool {
    true
}

impl MasterUpdate {
    /// Convenience constructor for an enabled, visible update edge.
    pub fn new(from: &str, to: &str) -> Self {
        MasterUpdate {
            from: from.to_string(),
            to: to.to_string(),
            automatic: false,
            enabled: true,
            visible: true,
        }
    }

    /// Same as [`MasterUpdate::new`] but flagged automatic.
    pub fn automatic(from: &str, to: &str) -> Self {
        MasterUpdate {
            automatic: true,
            ..MasterUpdate::new(from, to)
        }
    }
}
