//! Shared builders for controller tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use kube::api::ObjectMeta;

use cloud_provider::marshal_cluster;
use control_client::MockControlPlane;
use crds::{
    Cluster, EtcdCluster, EtcdClusterSpec, EtcdClusterStatus, KeyCert, KeyPairData,
    TenantCluster, TenantClusterSpec,
};
use versions::{MasterUpdate, MasterVersion};

use crate::config::Config;
use crate::credentials::CredentialFactory;
use crate::error::ControllerError;
use crate::store::Stores;
use crate::sync::Reconciler;
use crate::templates::MasterTemplates;

pub fn pending_cluster(name: &str) -> Cluster {
    let mut cluster = Cluster {
        name: name.to_string(),
        ..Default::default()
    };
    cluster.spec.human_readable_name = name.to_string();
    cluster.status.last_transition_time = Utc::now();
    cluster
}

pub fn deployment_with_replicas(
    namespace: &str,
    name: &str,
    desired: i32,
    updated: i32,
) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(desired),
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            updated_replicas: Some(updated),
            ..Default::default()
        }),
    }
}

pub fn etcd_with_sizes(namespace: &str, desired: i32, current: i32) -> EtcdCluster {
    EtcdCluster {
        metadata: ObjectMeta {
            name: Some(crate::resources::ETCD_CLUSTER.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: EtcdClusterSpec {
            size: desired,
            version: String::new(),
            repository: None,
            paused: None,
        },
        status: Some(EtcdClusterStatus {
            size: current,
            ..Default::default()
        }),
    }
}

pub fn test_version(id: &str) -> MasterVersion {
    MasterVersion {
        id: id.to_string(),
        name: id.to_string(),
        etcd_operator_deployment_yaml: "etcd-operator-dep.yaml".to_string(),
        etcd_cluster_yaml: "etcd-cluster.yaml".to_string(),
        apiserver_deployment_yaml: "apiserver-dep.yaml".to_string(),
        controller_deployment_yaml: "controller-manager-dep.yaml".to_string(),
        scheduler_deployment_yaml: "scheduler-dep.yaml".to_string(),
        node_controller_deployment_yaml: "node-controller-dep.yaml".to_string(),
        ..Default::default()
    }
}

/// Templates that build minimal valid objects instead of reading
/// files; callers override name and namespace anyway.
pub struct StaticTemplates;

impl MasterTemplates for StaticTemplates {
    fn deployment(&self, _file: &str) -> Result<Deployment, ControllerError> {
        Ok(Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn service_account(&self, _file: &str) -> Result<ServiceAccount, ControllerError> {
        Ok(ServiceAccount::default())
    }

    fn cluster_role_binding(&self, _file: &str) -> Result<ClusterRoleBinding, ControllerError> {
        Ok(ClusterRoleBinding {
            metadata: ObjectMeta::default(),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: "etcd-operator".to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: "etcd-operator".to_string(),
                ..Default::default()
            }]),
        })
    }

    fn etcd_cluster(&self, _file: &str) -> Result<EtcdCluster, ControllerError> {
        Ok(EtcdCluster {
            metadata: ObjectMeta::default(),
            spec: EtcdClusterSpec {
                size: 3,
                version: "3.1.0".to_string(),
                repository: None,
                paused: None,
            },
            status: None,
        })
    }
}

/// Deterministic credential material, no key generation involved.
pub struct StaticCredentialFactory;

impl CredentialFactory for StaticCredentialFactory {
    fn root_ca(&self, cluster_name: &str) -> Result<KeyCert, ControllerError> {
        Ok(KeyCert {
            key: format!("{cluster_name}-ca-key").into_bytes(),
            cert: format!("{cluster_name}-ca-cert").into_bytes(),
        })
    }

    fn signed_cert(&self, common_name: &str, _ca: &KeyCert) -> Result<KeyCert, ControllerError> {
        Ok(KeyCert {
            key: format!("{common_name}-key").into_bytes(),
            cert: format!("{common_name}-cert").into_bytes(),
        })
    }

    fn ssh_key_pair(&self) -> Result<KeyPairData, ControllerError> {
        Ok(KeyPairData {
            private_key: b"ssh-private".to_vec(),
            public_key: b"ssh-public".to_vec(),
        })
    }

    fn service_account_key(&self) -> Result<Vec<u8>, ControllerError> {
        Ok(b"service-account-key".to_vec())
    }

    fn bearer_token(&self) -> String {
        "statictesttoken0statictesttoken0".to_string()
    }
}

pub fn test_config() -> Config {
    Config {
        datacenter: "master".to_string(),
        worker_name: String::new(),
        external_url: "test.example".to_string(),
        apiserver_external_port: 30443,
        master_resources_path: PathBuf::from("/tmp/master-resources"),
        versions_file: PathBuf::from("/tmp/versions.yaml"),
        updates_file: PathBuf::from("/tmp/updates.yaml"),
    }
}

/// A reconciler wired to the mock control plane, with stores already
/// marked synced. Versions 1.5.2 (default) and 1.5.3 are known.
pub fn test_reconciler(mock: &MockControlPlane) -> (Reconciler, Stores) {
    test_reconciler_with_updates(mock, Vec::new())
}

pub fn test_reconciler_with_updates(
    mock: &MockControlPlane,
    updates: Vec<MasterUpdate>,
) -> (Reconciler, Stores) {
    let stores = Stores::new();
    stores.mark_all_synced();

    let default_version = test_version("1.5.2");
    let mut versions = HashMap::new();
    versions.insert(default_version.id.clone(), default_version.clone());
    versions.insert("1.5.3".to_string(), test_version("1.5.3"));

    let reconciler = Reconciler::new(
        Arc::new(mock.clone()),
        stores.clone(),
        cloud_provider::default_registry(),
        Arc::new(StaticTemplates),
        Arc::new(StaticCredentialFactory),
        versions,
        updates,
        default_version,
        test_config(),
    );
    (reconciler, stores)
}

/// Encodes a domain cluster into a fresh TenantCluster CR the way the
/// persist path would.
pub async fn encode(reconciler: &Reconciler, cluster: &Cluster) -> TenantCluster {
    let base = TenantCluster::new(
        &cluster.name,
        TenantClusterSpec {
            human_readable_name: cluster.spec.human_readable_name.clone(),
            master_version: cluster.spec.master_version.clone(),
        },
    );
    marshal_cluster(&reconciler.providers, cluster, &base)
        .expect("marshal of a test cluster cannot fail")
}
