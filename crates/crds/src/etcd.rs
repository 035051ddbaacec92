//! EtcdCluster custom resource
//!
//! Mirror of the etcd-operator CRD the controller creates and watches
//! inside each tenant cluster namespace. Only the fields the
//! reconciler reads or writes are modeled.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired shape of an etcd cluster managed by the etcd operator.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "etcd.database.coreos.com",
    version = "v1beta2",
    kind = "EtcdCluster",
    namespaced,
    status = "EtcdClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterSpec {
    /// Desired member count.
    pub size: i32,

    /// Etcd version to run.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Container repository override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Pauses operator control of this cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

/// Status reported by the etcd operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterStatus {
    /// Current member count.
    #[serde(default)]
    pub size: i32,

    /// Version currently running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,

    /// Version the operator is converging towards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,

    /// Operator-reported phase string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}
