//! Control-plane sub-resources living in a cluster's namespace.
//!
//! Name constants for every component, plus the provisioning pass the
//! Pending handler runs: check each sub-resource against the watch
//! stores and create whatever is missing. Component deployments and
//! the etcd CR come from the version's manifest files; the namespace,
//! auth secret, apiserver service and ingress are built in code.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Secret, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use tracing::info;

use control_client::ControlError;
use crds::{Cluster, CLUSTER_ROLE_LABEL, ROLE_LABEL_KEY, WORKER_NAME_LABEL_KEY};
use versions::MasterVersion;

use crate::error::ControllerError;
use crate::sync::Reconciler;

/// Component names inside a cluster namespace.
pub const APISERVER: &str = "apiserver";
pub const CONTROLLER_MANAGER: &str = "controller-manager";
pub const SCHEDULER: &str = "scheduler";
pub const NODE_CONTROLLER: &str = "node-controller";
pub const ADDON_MANAGER: &str = "addon-manager";
pub const ETCD_OPERATOR: &str = "etcd-operator";
pub const ETCD_CLUSTER: &str = "etcd-cluster";

/// Secret holding the generated control-plane credentials.
pub const AUTH_SECRET: &str = "apiserver-auth";
/// ConfigMap exposing the version's free-form values to the manifests.
pub const MASTER_VALUES: &str = "master-values";
/// Service account the etcd operator runs under.
pub const ETCD_OPERATOR_SA: &str = "etcd-operator";

// Version-independent manifest files in the master resources dir.
const ETCD_OPERATOR_SA_YAML: &str = "etcd-operator-sa.yaml";
const ETCD_OPERATOR_CRB_YAML: &str = "etcd-operator-crb.yaml";

/// Per-cluster name of the etcd operator's cluster role binding,
/// which is cluster scoped and therefore cannot reuse one name.
pub fn etcd_operator_binding_name(cluster_name: &str) -> String {
    format!("etcd-operator:{cluster_name}")
}

fn already_exists_ok<T>(result: Result<T, ControlError>) -> Result<(), ControlError> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_already_exists() => Ok(()),
        Err(err) => Err(err),
    }
}

impl Reconciler {
    /// Creates any missing sub-resource of the cluster's control
    /// plane. Returns true when everything already existed in the
    /// stores, meaning the caller may consider provisioning finished.
    ///
    /// Existence is judged against the watch stores, so a resource
    /// created here reads as missing until the watch echoes it back;
    /// creates tolerate AlreadyExists for that reason.
    pub(crate) async fn ensure_sub_resources(
        &self,
        cluster: &Cluster,
    ) -> Result<bool, ControllerError> {
        let ns = cluster.namespace();
        let version = self.master_version(cluster)?.clone();
        let mut all_present = true;

        if self.stores.namespaces.get_by_key(&ns).is_none() {
            all_present = false;
            info!(cluster = %cluster.name, namespace = %ns, "creating cluster namespace");
            let namespace = build_namespace(&ns, &cluster.spec.worker_name);
            already_exists_ok(self.control.create_namespace(&namespace).await)?;
        }

        if self.stores.secrets.get(&ns, AUTH_SECRET).is_none() {
            all_present = false;
            info!(cluster = %cluster.name, "creating auth secret");
            let secret = build_auth_secret(cluster);
            already_exists_ok(self.control.create_secret(&ns, &secret).await)?;
        }

        if self.stores.service_accounts.get(&ns, ETCD_OPERATOR_SA).is_none() {
            all_present = false;
            info!(cluster = %cluster.name, "creating etcd operator service account");
            let mut sa = self.templates.service_account(ETCD_OPERATOR_SA_YAML)?;
            sa.metadata.name = Some(ETCD_OPERATOR_SA.to_string());
            sa.metadata.namespace = Some(ns.clone());
            already_exists_ok(self.control.create_service_account(&ns, &sa).await)?;
        }

        let binding_name = etcd_operator_binding_name(&cluster.name);
        if self
            .stores
            .cluster_role_bindings
            .get_by_key(&binding_name)
            .is_none()
        {
            all_present = false;
            info!(cluster = %cluster.name, "creating etcd operator role binding");
            let mut crb = self.templates.cluster_role_binding(ETCD_OPERATOR_CRB_YAML)?;
            crb.metadata.name = Some(binding_name);
            if let Some(subjects) = crb.subjects.as_mut() {
                for subject in subjects {
                    subject.namespace = Some(ns.clone());
                }
            }
            already_exists_ok(self.control.create_cluster_role_binding(&crb).await)?;
        }

        if self.stores.services.get(&ns, APISERVER).is_none() {
            all_present = false;
            info!(cluster = %cluster.name, "creating apiserver service");
            let service = build_apiserver_service(self.config.apiserver_external_port);
            already_exists_ok(self.control.create_service(&ns, &service).await)?;
        }

        if self.stores.ingresses.get(&ns, APISERVER).is_none() {
            all_present = false;
            info!(cluster = %cluster.name, "creating apiserver ingress");
            let ingress = build_apiserver_ingress(cluster);
            already_exists_ok(self.control.create_ingress(&ns, &ingress).await)?;
        }

        if self.stores.config_maps.get(&ns, MASTER_VALUES).is_none() {
            all_present = false;
            info!(cluster = %cluster.name, "creating master values config map");
            let config_map = build_values_config_map(&version);
            already_exists_ok(self.control.create_config_map(&ns, &config_map).await)?;
        }

        for (name, file) in component_deployments(&version) {
            if self.stores.deployments.get(&ns, name).is_none() {
                all_present = false;
                info!(cluster = %cluster.name, component = name, "creating component deployment");
                let mut dep = self.templates.deployment(file)?;
                dep.metadata.name = Some(name.to_string());
                dep.metadata.namespace = Some(ns.clone());
                already_exists_ok(self.control.create_deployment(&ns, &dep).await)?;
            }
        }

        if self.stores.etcd_clusters.get(&ns, ETCD_CLUSTER).is_none() {
            all_present = false;
            info!(cluster = %cluster.name, "creating etcd cluster");
            let mut etcd = self.templates.etcd_cluster(&version.etcd_cluster_yaml)?;
            etcd.metadata.name = Some(ETCD_CLUSTER.to_string());
            etcd.metadata.namespace = Some(ns.clone());
            already_exists_ok(self.control.create_etcd_cluster(&ns, &etcd).await)?;
        }

        Ok(all_present)
    }
}

/// The component deployments a version ships, with their manifest
/// files. The node controller and addon manager are optional.
pub(crate) fn component_deployments(
    version: &MasterVersion,
) -> Vec<(&'static str, &str)> {
    let mut components = vec![
        (ETCD_OPERATOR, version.etcd_operator_deployment_yaml.as_str()),
        (APISERVER, version.apiserver_deployment_yaml.as_str()),
        (CONTROLLER_MANAGER, version.controller_deployment_yaml.as_str()),
        (SCHEDULER, version.scheduler_deployment_yaml.as_str()),
    ];
    if !version.node_controller_deployment_yaml.is_empty() {
        components.push((NODE_CONTROLLER, version.node_controller_deployment_yaml.as_str()));
    }
    if !version.addon_manager_deployment_yaml.is_empty() {
        components.push((ADDON_MANAGER, version.addon_manager_deployment_yaml.as_str()));
    }
    components
}

pub(crate) fn build_namespace(name: &str, worker_name: &str) -> Namespace {
    let mut labels = BTreeMap::new();
    labels.insert(ROLE_LABEL_KEY.to_string(), CLUSTER_ROLE_LABEL.to_string());
    if !worker_name.is_empty() {
        labels.insert(WORKER_NAME_LABEL_KEY.to_string(), worker_name.to_string());
    }
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Packs the generated credentials into the auth secret mounted by
/// the control-plane pods. Called once every credential exists.
pub(crate) fn build_auth_secret(cluster: &Cluster) -> Secret {
    let mut data = BTreeMap::new();
    let mut put = |key: &str, value: Vec<u8>| {
        data.insert(key.to_string(), ByteString(value));
    };

    if let Some(address) = &cluster.address {
        put("admin-token", address.admin_token.clone().into_bytes());
        put("kubelet-token", address.kubelet_token.clone().into_bytes());
    }
    let creds = &cluster.status.credentials;
    if let Some(ca) = &creds.root_ca {
        put("root-ca.crt", ca.cert.clone());
    }
    if let Some(cert) = &creds.apiserver_cert {
        put("apiserver.crt", cert.cert.clone());
        put("apiserver.key", cert.key.clone());
    }
    if let Some(cert) = &creds.kubelet_cert {
        put("kubelet.crt", cert.cert.clone());
        put("kubelet.key", cert.key.clone());
    }
    if let Some(key) = &creds.service_account_key {
        put("service-account.key", key.clone());
    }
    if let Some(ssh) = &creds.apiserver_ssh_key {
        put("ssh-rsa.key", ssh.private_key.clone());
        put("ssh-rsa.pub", ssh.public_key.clone());
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(AUTH_SECRET.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// NodePort service fronting the tenant apiserver, pinned to the
/// externally routed port.
pub(crate) fn build_apiserver_service(external_port: u16) -> Service {
    let mut selector = BTreeMap::new();
    selector.insert("app".to_string(), APISERVER.to_string());
    Service {
        metadata: ObjectMeta {
            name: Some(APISERVER.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("secure".to_string()),
                port: 8443,
                target_port: Some(IntOrString::Int(8443)),
                node_port: Some(i32::from(external_port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn build_apiserver_ingress(cluster: &Cluster) -> Ingress {
    let host = cluster
        .address
        .as_ref()
        .map(|a| a.external_name.clone())
        .unwrap_or_default();
    Ingress {
        metadata: ObjectMeta {
            name: Some(APISERVER.to_string()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: APISERVER.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(8443),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn build_values_config_map(version: &MasterVersion) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(MASTER_VALUES.to_string()),
            ..Default::default()
        },
        data: Some(version.values.clone()),
        ..Default::default()
    }
}
