//! In-memory `ControlPlane` for tests.
//!
//! Objects live in maps keyed by name or namespace/name. Writes bump a
//! shared resource version counter so optimistic concurrency behaves
//! like the real API server; `fail_cluster_updates` forces a number of
//! conflicts on top for retry tests. Watch streams are hand-fed by the
//! test through the `push_*` methods.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::Resource;
use tokio::sync::mpsc;

use crds::{EtcdCluster, TenantCluster};

use crate::api::{ControlPlane, WatchEvent};
use crate::error::ControlError;

/// An event recorded through [`ControlPlane::record_cluster_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub cluster: String,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct MockState {
    clusters: HashMap<String, TenantCluster>,
    namespaces: HashMap<String, Namespace>,
    deleted_namespaces: Vec<String>,
    secrets: HashMap<(String, String), Secret>,
    services: HashMap<(String, String), Service>,
    ingresses: HashMap<(String, String), Ingress>,
    config_maps: HashMap<(String, String), ConfigMap>,
    service_accounts: HashMap<(String, String), ServiceAccount>,
    cluster_role_bindings: HashMap<String, ClusterRoleBinding>,
    deployments: HashMap<(String, String), Deployment>,
    etcd_clusters: HashMap<(String, String), EtcdCluster>,
    events: Vec<RecordedEvent>,
    version_counter: u64,
    forced_cluster_conflicts: u32,
    next_node_port: i32,
}

/// One hand-fed watch stream. The stream side can be taken once; a
/// second subscriber gets a stream that never yields.
#[derive(Debug)]
struct Feed<K> {
    tx: mpsc::UnboundedSender<WatchEvent<K>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<WatchEvent<K>>>>,
}

impl<K: Send + 'static> Feed<K> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    fn push(&self, event: WatchEvent<K>) {
        let _ = self.tx.send(event);
    }

    fn stream(&self) -> BoxStream<'static, WatchEvent<K>> {
        let taken = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed(),
            None => futures::stream::pending().boxed(),
        }
    }
}

/// In-memory seed cluster.
#[derive(Debug, Clone, Default)]
pub struct MockControlPlane {
    state: Arc<Mutex<MockState>>,
    feeds: Arc<Feeds>,
}

#[derive(Debug)]
struct Feeds {
    clusters: Feed<TenantCluster>,
    namespaces: Feed<Namespace>,
    secrets: Feed<Secret>,
    services: Feed<Service>,
    ingresses: Feed<Ingress>,
    config_maps: Feed<ConfigMap>,
    service_accounts: Feed<ServiceAccount>,
    cluster_role_bindings: Feed<ClusterRoleBinding>,
    deployments: Feed<Deployment>,
    etcd_clusters: Feed<EtcdCluster>,
}

impl Default for Feeds {
    fn default() -> Self {
        Self {
            clusters: Feed::new(),
            namespaces: Feed::new(),
            secrets: Feed::new(),
            services: Feed::new(),
            ingresses: Feed::new(),
            config_maps: Feed::new(),
            service_accounts: Feed::new(),
            cluster_role_bindings: Feed::new(),
            deployments: Feed::new(),
            etcd_clusters: Feed::new(),
        }
    }
}

fn name_of<K: Resource>(obj: &K, what: &str) -> Result<String, ControlError> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| ControlError::Unnamed(what.to_string()))
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_version(state: &mut MockState) -> String {
        state.version_counter += 1;
        state.version_counter.to_string()
    }

    /// Inserts a cluster CR directly, stamping a resource version.
    pub fn seed_cluster(&self, mut cluster: TenantCluster) -> TenantCluster {
        let mut state = self.lock();
        let version = Self::next_version(&mut state);
        cluster.meta_mut().resource_version = Some(version);
        let name = cluster.meta().name.clone().unwrap_or_default();
        state.clusters.insert(name, cluster.clone());
        cluster
    }

    /// Inserts a deployment directly (for health and update tests).
    pub fn seed_deployment(&self, namespace: &str, deployment: Deployment) {
        let name = deployment.meta().name.clone().unwrap_or_default();
        self.lock()
            .deployments
            .insert((namespace.to_string(), name), deployment);
    }

    /// Inserts an etcd cluster CR directly.
    pub fn seed_etcd_cluster(&self, namespace: &str, etcd: EtcdCluster) {
        let name = etcd.meta().name.clone().unwrap_or_default();
        self.lock()
            .etcd_clusters
            .insert((namespace.to_string(), name), etcd);
    }

    /// Forces the next `n` cluster updates to fail with a conflict.
    pub fn fail_cluster_updates(&self, n: u32) {
        self.lock().forced_cluster_conflicts = n;
    }

    /// Current stored state of a cluster CR.
    pub fn cluster(&self, name: &str) -> Option<TenantCluster> {
        self.lock().clusters.get(name).cloned()
    }

    /// Current stored state of a deployment.
    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.lock()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Current stored state of an etcd cluster CR.
    pub fn etcd_cluster(&self, namespace: &str, name: &str) -> Option<EtcdCluster> {
        self.lock()
            .etcd_clusters
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Names of all namespaces created so far.
    pub fn namespace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().namespaces.keys().cloned().collect();
        names.sort();
        names
    }

    /// Namespaces deleted so far, in order.
    pub fn deleted_namespaces(&self) -> Vec<String> {
        self.lock().deleted_namespaces.clone()
    }

    /// Secrets created in a namespace, by name.
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Services created in a namespace, by name.
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.lock()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Ingresses created in a namespace, by name.
    pub fn ingress(&self, namespace: &str, name: &str) -> Option<Ingress> {
        self.lock()
            .ingresses
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Config maps created in a namespace, by name.
    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.lock()
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Service accounts created in a namespace, by name.
    pub fn service_account(&self, namespace: &str, name: &str) -> Option<ServiceAccount> {
        self.lock()
            .service_accounts
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Cluster role bindings created so far, by name.
    pub fn cluster_role_binding(&self, name: &str) -> Option<ClusterRoleBinding> {
        self.lock().cluster_role_bindings.get(name).cloned()
    }

    /// All events recorded so far, in order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().events.clone()
    }

    pub fn push_cluster(&self, event: WatchEvent<TenantCluster>) {
        self.feeds.clusters.push(event);
    }

    pub fn push_namespace(&self, event: WatchEvent<Namespace>) {
        self.feeds.namespaces.push(event);
    }

    pub fn push_secret(&self, event: WatchEvent<Secret>) {
        self.feeds.secrets.push(event);
    }

    pub fn push_service(&self, event: WatchEvent<Service>) {
        self.feeds.services.push(event);
    }

    pub fn push_ingress(&self, event: WatchEvent<Ingress>) {
        self.feeds.ingresses.push(event);
    }

    pub fn push_config_map(&self, event: WatchEvent<ConfigMap>) {
        self.feeds.config_maps.push(event);
    }

    pub fn push_service_account(&self, event: WatchEvent<ServiceAccount>) {
        self.feeds.service_accounts.push(event);
    }

    pub fn push_cluster_role_binding(&self, event: WatchEvent<ClusterRoleBinding>) {
        self.feeds.cluster_role_bindings.push(event);
    }

    pub fn push_deployment(&self, event: WatchEvent<Deployment>) {
        self.feeds.deployments.push(event);
    }

    pub fn push_etcd_cluster(&self, event: WatchEvent<EtcdCluster>) {
        self.feeds.etcd_clusters.push(event);
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn get_cluster(&self, name: &str) -> Result<TenantCluster, ControlError> {
        self.lock()
            .clusters
            .get(name)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(format!("cluster {name}")))
    }

    async fn update_cluster(
        &self,
        cluster: &TenantCluster,
    ) -> Result<TenantCluster, ControlError> {
        let name = name_of(cluster, "cluster")?;
        let mut state = self.lock();
        if state.forced_cluster_conflicts > 0 {
            state.forced_cluster_conflicts -= 1;
            return Err(ControlError::Conflict(format!("cluster {name}")));
        }
        let stored = state
            .clusters
            .get(&name)
            .ok_or_else(|| ControlError::NotFound(format!("cluster {name}")))?;
        if stored.meta().resource_version != cluster.meta().resource_version {
            return Err(ControlError::Conflict(format!("cluster {name}")));
        }
        let mut updated = cluster.clone();
        let version = Self::next_version(&mut state);
        updated.meta_mut().resource_version = Some(version);
        state.clusters.insert(name, updated.clone());
        Ok(updated)
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ControlError> {
        let name = name_of(namespace, "namespace")?;
        let mut state = self.lock();
        if state.namespaces.contains_key(&name) {
            return Err(ControlError::AlreadyExists(format!("namespace {name}")));
        }
        state.namespaces.insert(name, namespace.clone());
        Ok(namespace.clone())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ControlError> {
        let mut state = self.lock();
        if state.namespaces.remove(name).is_none() {
            return Err(ControlError::NotFound(format!("namespace {name}")));
        }
        state.deleted_namespaces.push(name.to_string());
        Ok(())
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, ControlError> {
        let name = name_of(secret, "secret")?;
        let key = (namespace.to_string(), name.clone());
        let mut state = self.lock();
        if state.secrets.contains_key(&key) {
            return Err(ControlError::AlreadyExists(format!(
                "secret {namespace}/{name}"
            )));
        }
        state.secrets.insert(key, secret.clone());
        Ok(secret.clone())
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ControlError> {
        let name = name_of(service, "service")?;
        let key = (namespace.to_string(), name.clone());
        let mut state = self.lock();
        if state.services.contains_key(&key) {
            return Err(ControlError::AlreadyExists(format!(
                "service {namespace}/{name}"
            )));
        }
        // NodePort allocation, like the real API server does it.
        let mut created = service.clone();
        if let Some(spec) = created.spec.as_mut() {
            for port in spec.ports.iter_mut().flatten() {
                if port.node_port.is_none() {
                    state.next_node_port += 1;
                    port.node_port = Some(30000 + state.next_node_port);
                }
            }
        }
        state.services.insert(key, created.clone());
        Ok(created)
    }

    async fn create_ingress(
        &self,
        namespace: &str,
        ingress: &Ingress,
    ) -> Result<Ingress, ControlError> {
        let name = name_of(ingress, "ingress")?;
        let key = (namespace.to_string(), name.clone());
        let mut state = self.lock();
        if state.ingresses.contains_key(&key) {
            return Err(ControlError::AlreadyExists(format!(
                "ingress {namespace}/{name}"
            )));
        }
        state.ingresses.insert(key, ingress.clone());
        Ok(ingress.clone())
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ControlError> {
        let name = name_of(config_map, "configmap")?;
        let key = (namespace.to_string(), name.clone());
        let mut state = self.lock();
        if state.config_maps.contains_key(&key) {
            return Err(ControlError::AlreadyExists(format!(
                "configmap {namespace}/{name}"
            )));
        }
        state.config_maps.insert(key, config_map.clone());
        Ok(config_map.clone())
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, ControlError> {
        let name = name_of(service_account, "serviceaccount")?;
        let key = (namespace.to_string(), name.clone());
        let mut state = self.lock();
        if state.service_accounts.contains_key(&key) {
            return Err(ControlError::AlreadyExists(format!(
                "serviceaccount {namespace}/{name}"
            )));
        }
        state.service_accounts.insert(key, service_account.clone());
        Ok(service_account.clone())
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, ControlError> {
        let name = name_of(binding, "clusterrolebinding")?;
        let mut state = self.lock();
        if state.cluster_role_bindings.contains_key(&name) {
            return Err(ControlError::AlreadyExists(format!(
                "clusterrolebinding {name}"
            )));
        }
        state.cluster_role_bindings.insert(name, binding.clone());
        Ok(binding.clone())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ControlError> {
        Ok(self
            .lock()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ControlError> {
        let name = name_of(deployment, "deployment")?;
        let key = (namespace.to_string(), name.clone());
        let mut state = self.lock();
        if state.deployments.contains_key(&key) {
            return Err(ControlError::AlreadyExists(format!(
                "deployment {namespace}/{name}"
            )));
        }
        state.deployments.insert(key, deployment.clone());
        Ok(deployment.clone())
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ControlError> {
        let name = name_of(deployment, "deployment")?;
        let key = (namespace.to_string(), name.clone());
        let mut state = self.lock();
        if !state.deployments.contains_key(&key) {
            return Err(ControlError::NotFound(format!(
                "deployment {namespace}/{name}"
            )));
        }
        state.deployments.insert(key, deployment.clone());
        Ok(deployment.clone())
    }

    async fn get_etcd_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EtcdCluster>, ControlError> {
        Ok(self
            .lock()
            .etcd_clusters
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_etcd_cluster(
        &self,
        namespace: &str,
        etcd: &EtcdCluster,
    ) -> Result<EtcdCluster, ControlError> {
        let name = name_of(etcd, "etcdcluster")?;
        let key = (namespace.to_string(), name.clone());
        let mut state = self.lock();
        if state.etcd_clusters.contains_key(&key) {
            return Err(ControlError::AlreadyExists(format!(
                "etcdcluster {namespace}/{name}"
            )));
        }
        state.etcd_clusters.insert(key, etcd.clone());
        Ok(etcd.clone())
    }

    async fn update_etcd_cluster(
        &self,
        namespace: &str,
        etcd: &EtcdCluster,
    ) -> Result<EtcdCluster, ControlError> {
        let name = name_of(etcd, "etcdcluster")?;
        let key = (namespace.to_string(), name.clone());
        let mut state = self.lock();
        if !state.etcd_clusters.contains_key(&key) {
            return Err(ControlError::NotFound(format!(
                "etcdcluster {namespace}/{name}"
            )));
        }
        state.etcd_clusters.insert(key, etcd.clone());
        Ok(etcd.clone())
    }

    async fn record_cluster_event(
        &self,
        cluster: &str,
        reason: &str,
        message: &str,
    ) -> Result<(), ControlError> {
        self.lock().events.push(RecordedEvent {
            cluster: cluster.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    fn watch_clusters(&self) -> BoxStream<'static, WatchEvent<TenantCluster>> {
        self.feeds.clusters.stream()
    }

    fn watch_namespaces(&self) -> BoxStream<'static, WatchEvent<Namespace>> {
        self.feeds.namespaces.stream()
    }

    fn watch_secrets(&self) -> BoxStream<'static, WatchEvent<Secret>> {
        self.feeds.secrets.stream()
    }

    fn watch_services(&self) -> BoxStream<'static, WatchEvent<Service>> {
        self.feeds.services.stream()
    }

    fn watch_ingresses(&self) -> BoxStream<'static, WatchEvent<Ingress>> {
        self.feeds.ingresses.stream()
    }

    fn watch_config_maps(&self) -> BoxStream<'static, WatchEvent<ConfigMap>> {
        self.feeds.config_maps.stream()
    }

    fn watch_service_accounts(&self) -> BoxStream<'static, WatchEvent<ServiceAccount>> {
        self.feeds.service_accounts.stream()
    }

    fn watch_cluster_role_bindings(&self) -> BoxStream<'static, WatchEvent<ClusterRoleBinding>> {
        self.feeds.cluster_role_bindings.stream()
    }

    fn watch_deployments(&self) -> BoxStream<'static, WatchEvent<Deployment>> {
        self.feeds.deployments.stream()
    }

    fn watch_etcd_clusters(&self) -> BoxStream<'static, WatchEvent<EtcdCluster>> {
        self.feeds.etcd_clusters.stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::TenantClusterSpec;
    use kube::api::ObjectMeta;

    fn cluster(name: &str) -> TenantCluster {
        TenantCluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: TenantClusterSpec {
                human_readable_name: name.to_string(),
                master_version: None,
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let mock = MockControlPlane::new();
        let stored = mock.seed_cluster(cluster("c1"));

        let fresh = mock.update_cluster(&stored).await.unwrap();
        assert_ne!(
            fresh.metadata.resource_version,
            stored.metadata.resource_version
        );

        // Writing through the old token again must now fail.
        let err = mock.update_cluster(&stored).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn apply_deployment_falls_back_to_create() {
        let mock = MockControlPlane::new();
        let dep = Deployment {
            metadata: ObjectMeta {
                name: Some("apiserver".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        mock.apply_deployment("cluster-c1", &dep).await.unwrap();
        assert!(mock.deployment("cluster-c1", "apiserver").is_some());

        // Second apply goes through the update path.
        mock.apply_deployment("cluster-c1", &dep).await.unwrap();
    }

    #[tokio::test]
    async fn node_ports_are_allocated_on_create() {
        use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};

        let mock = MockControlPlane::new();
        let svc = Service {
            metadata: ObjectMeta {
                name: Some("apiserver".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![ServicePort {
                    port: 8443,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = mock.create_service("cluster-c1", &svc).await.unwrap();
        let port = &created.spec.unwrap().ports.unwrap()[0];
        assert!(port.node_port.unwrap() > 30000);
    }
}
