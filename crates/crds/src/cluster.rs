//! TenantCluster CRD and the cluster domain model
//!
//! The CRD carries the user-facing spec and the coarse status (phase,
//! health, update progress). Generated credentials and cloud provider
//! access data never appear in the spec or status; they round-trip
//! through annotations via the cloud-provider codec, so reads of the
//! CR by other clients only ever see public material.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cloud::CloudSpec;

/// Label key marking namespaces owned by the cluster controller.
pub const ROLE_LABEL_KEY: &str = "role";
/// Value of the role label on tenant cluster namespaces.
pub const CLUSTER_ROLE_LABEL: &str = "tenant-cluster";
/// Label key identifying clusters processed only by a named controller
/// instance (development shard).
pub const WORKER_NAME_LABEL_KEY: &str = "worker-name";

/// Namespace holding all control-plane sub-resources of a cluster.
pub fn namespace_name(cluster: &str) -> String {
    format!("cluster-{cluster}")
}

/// TenantCluster CRD spec: the desired state an operator declares.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "clusterops.io",
    version = "v1alpha1",
    kind = "TenantCluster",
    status = "TenantClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TenantClusterSpec {
    /// Cluster name provided by the user.
    pub human_readable_name: String,

    /// Desired master (control-plane) version id. Defaulted by the
    /// controller when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_version: Option<String>,
}

/// TenantCluster CRD status written back by the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantClusterStatus {
    /// Lifecycle phase of the cluster.
    #[serde(default)]
    pub phase: ClusterPhase,

    /// When the phase last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Aggregated control-plane health, once evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<ClusterHealth>,

    /// Master version last rolled out completely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deployed_master_version: Option<String>,

    /// Sub-phase of an in-flight master update; absent when no update
    /// is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_update_phase: Option<MasterUpdatePhase>,
}

/// Life cycle phase of a cluster.
///
/// Exactly one phase holds at a time. `Failed` is terminal except by
/// operator action; `Unknown` covers values written by a newer
/// generation of the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClusterPhase {
    /// The controller has not picked the cluster up yet.
    #[default]
    Pending,
    /// Control-plane resources are being brought up.
    Launching,
    /// The cluster is up and converged.
    Running,
    /// Master components are being rolled to a new version.
    #[serde(rename = "UpdatingMaster")]
    UpdatingMaster,
    /// The cluster timed out launching or updating.
    Failed,
    /// Unrecognized phase value, ignored by the state machine.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterPhase::Pending => "Pending",
            ClusterPhase::Launching => "Launching",
            ClusterPhase::Running => "Running",
            ClusterPhase::UpdatingMaster => "UpdatingMaster",
            ClusterPhase::Failed => "Failed",
            ClusterPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Sub-phase of a rolling master-component update.
///
/// The wire strings name what the controller is waiting for, matching
/// the order the orchestrator walks the components in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum MasterUpdatePhase {
    /// Update accepted, etcd operator rollout comes next.
    #[serde(rename = "Starting")]
    Start,
    /// Waiting for the etcd operator before bumping the etcd cluster.
    #[serde(rename = "WaitEtcdOperatorReady")]
    EtcdOperator,
    /// Waiting for etcd quorum before rolling the apiserver.
    #[serde(rename = "WaitEtcdReady")]
    EtcdCluster,
    /// Waiting for the apiserver before rolling the controllers.
    #[serde(rename = "WaitAPIReady")]
    ApiServer,
    /// Waiting for controller-manager, scheduler and friends.
    #[serde(rename = "WaitControllersReady")]
    Controllers,
    /// Sentinel: rollout complete, cluster phase handler takes over.
    #[serde(rename = "Finished")]
    Finish,
}

/// Per-component health flags of a cluster control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHealthStatus {
    pub apiserver: bool,
    pub controller: bool,
    pub scheduler: bool,
    pub node_controller: bool,
    pub etcd: bool,
}

impl ClusterHealthStatus {
    /// True iff every tracked component is healthy.
    pub fn all_healthy(&self) -> bool {
        self.etcd && self.node_controller && self.controller && self.apiserver && self.scheduler
    }
}

/// Health snapshot plus the timestamp of the last change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHealth {
    #[serde(flatten)]
    pub status: ClusterHealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// A PEM key plus certificate pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyCert {
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
}

/// A private/public key pair (SSH or service-account signing).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPairData {
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

/// Access and address information of a launched cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterAddress {
    pub url: String,
    pub external_name: String,
    pub external_port: u16,
    pub admin_token: String,
    pub kubelet_token: String,
}

/// Desired state of a cluster as the controller sees it.
#[derive(Debug, Clone, Default)]
pub struct ClusterSpec {
    /// Cluster name provided by the user.
    pub human_readable_name: String,
    /// Desired master version id.
    pub master_version: Option<String>,
    /// Controller shard owning this cluster; empty for the default.
    pub worker_name: String,
    /// Cloud access data, decoded from annotations by the provider
    /// codec.
    pub cloud: Option<CloudSpec>,
}

/// Generated credentials of a cluster, kept out of the CR spec/status.
#[derive(Debug, Clone, Default)]
pub struct ClusterCredentials {
    pub root_ca: Option<KeyCert>,
    pub apiserver_cert: Option<KeyCert>,
    pub kubelet_cert: Option<KeyCert>,
    pub apiserver_ssh_key: Option<KeyPairData>,
    pub service_account_key: Option<Vec<u8>>,
}

/// Status of a cluster as the controller sees it.
#[derive(Debug, Clone, Default)]
pub struct ClusterStatus {
    pub last_transition_time: DateTime<Utc>,
    pub phase: ClusterPhase,
    pub health: Option<ClusterHealth>,
    pub last_deployed_master_version: Option<String>,
    pub master_update_phase: Option<MasterUpdatePhase>,
    pub credentials: ClusterCredentials,
}

/// The cluster domain value the phase handlers operate on: the CR
/// decoded together with its annotation-held credentials and cloud
/// access data.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    pub name: String,
    /// Optimistic concurrency token of the backing CR.
    pub resource_version: Option<String>,
    /// Custom annotations that are not controller-owned, preserved
    /// verbatim across updates.
    pub annotations: BTreeMap<String, String>,
    pub spec: ClusterSpec,
    pub address: Option<ClusterAddress>,
    pub status: ClusterStatus,
}

impl Cluster {
    /// Namespace holding this cluster's control-plane sub-resources.
    pub fn namespace(&self) -> String {
        namespace_name(&self.name)
    }

    /// Assembles a kubeconfig for the cluster from its address, root
    /// CA and admin token. `None` until all three exist.
    pub fn kubeconfig(&self) -> Option<Kubeconfig> {
        let address = self.address.as_ref()?;
        let root_ca = self.status.credentials.root_ca.as_ref()?;
        Some(Kubeconfig::single_user(
            &self.name,
            &address.url,
            &root_ca.cert,
            &address.admin_token,
        ))
    }
}

/// A minimal kubeconfig document for one cluster and one token user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kubeconfig {
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "current-context")]
    pub current_context: String,
    pub clusters: Vec<NamedKubeconfigCluster>,
    pub contexts: Vec<NamedKubeconfigContext>,
    pub users: Vec<NamedKubeconfigUser>,
}

/// Named cluster entry of a kubeconfig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedKubeconfigCluster {
    pub name: String,
    pub cluster: KubeconfigCluster,
}

/// Server endpoint entry of a kubeconfig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeconfigCluster {
    pub server: String,
    #[serde(rename = "certificate-authority-data")]
    pub certificate_authority_data: String,
}

/// Named context entry of a kubeconfig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedKubeconfigContext {
    pub name: String,
    pub context: KubeconfigContext,
}

/// Cluster/user binding of a kubeconfig context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeconfigContext {
    pub cluster: String,
    pub user: String,
}

/// Named user entry of a kubeconfig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedKubeconfigUser {
    pub name: String,
    pub user: KubeconfigUser,
}

/// Bearer-token user of a kubeconfig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeconfigUser {
    pub token: String,
}

impl Kubeconfig {
    fn single_user(name: &str, server: &str, ca_cert: &[u8], token: &str) -> Self {
        use base64::Engine as _;
        let b64 = |data: &[u8]| base64::engine::general_purpose::STANDARD.encode(data);
        Kubeconfig {
            kind: "Config".to_string(),
            api_version: "v1".to_string(),
            current_context: name.to_string(),
            clusters: vec![NamedKubeconfigCluster {
                name: name.to_string(),
                cluster: KubeconfigCluster {
                    server: server.to_string(),
                    certificate_authority_data: b64(ca_cert),
                },
            }],
            contexts: vec![NamedKubeconfigContext {
                name: name.to_string(),
                context: KubeconfigContext {
                    cluster: name.to_string(),
                    user: name.to_string(),
                },
            }],
            users: vec![NamedKubeconfigUser {
                name: name.to_string(),
                user: KubeconfigUser {
                    token: token.to_string(),
                },
            }],
        }
    }
}
