//! The `ControlPlane` trait and watch event type.

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;

use crds::{EtcdCluster, TenantCluster};

use crate::error::ControlError;

/// One event on a watch stream.
///
/// `Synced` carries the complete initial listing (and any later
/// relist); consumers replace their mirror with it. `Applied` and
/// `Deleted` are incremental.
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    /// Initial listing finished; the vector is the full current set.
    Synced(Vec<K>),
    /// An object was added or modified.
    Applied(K),
    /// An object was removed.
    Deleted(K),
}

/// Typed access to the seed cluster.
///
/// Writes use optimistic concurrency: `update_*` calls surface a lost
/// race as [`ControlError::Conflict`] and callers re-read and retry.
/// The `apply_*` methods implement update-or-create on top of the
/// primitives.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetches the current state of a TenantCluster CR.
    async fn get_cluster(&self, name: &str) -> Result<TenantCluster, ControlError>;

    /// Replaces a TenantCluster CR, failing on a stale concurrency
    /// token.
    async fn update_cluster(&self, cluster: &TenantCluster)
        -> Result<TenantCluster, ControlError>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ControlError>;

    async fn delete_namespace(&self, name: &str) -> Result<(), ControlError>;

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, ControlError>;

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ControlError>;

    async fn create_ingress(
        &self,
        namespace: &str,
        ingress: &Ingress,
    ) -> Result<Ingress, ControlError>;

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ControlError>;

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, ControlError>;

    /// Cluster role bindings are cluster scoped; no namespace.
    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, ControlError>;

    /// Reads a deployment; `Ok(None)` when it does not exist.
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ControlError>;

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ControlError>;

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ControlError>;

    /// Reads an etcd cluster CR; `Ok(None)` when it does not exist.
    async fn get_etcd_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EtcdCluster>, ControlError>;

    async fn create_etcd_cluster(
        &self,
        namespace: &str,
        etcd: &EtcdCluster,
    ) -> Result<EtcdCluster, ControlError>;

    async fn update_etcd_cluster(
        &self,
        namespace: &str,
        etcd: &EtcdCluster,
    ) -> Result<EtcdCluster, ControlError>;

    /// Emits a Kubernetes event attached to a TenantCluster.
    async fn record_cluster_event(
        &self,
        cluster: &str,
        reason: &str,
        message: &str,
    ) -> Result<(), ControlError>;

    /// Updates a deployment, creating it when it does not exist yet.
    async fn apply_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ControlError> {
        match self.update_deployment(namespace, deployment).await {
            Err(err) if err.is_not_found() => self.create_deployment(namespace, deployment).await,
            other => other,
        }
    }

    /// Updates an etcd cluster CR, creating it when it does not exist
    /// yet.
    async fn apply_etcd_cluster(
        &self,
        namespace: &str,
        etcd: &EtcdCluster,
    ) -> Result<EtcdCluster, ControlError> {
        match self.update_etcd_cluster(namespace, etcd).await {
            Err(err) if err.is_not_found() => self.create_etcd_cluster(namespace, etcd).await,
            other => other,
        }
    }

    fn watch_clusters(&self) -> BoxStream<'static, WatchEvent<TenantCluster>>;

    fn watch_namespaces(&self) -> BoxStream<'static, WatchEvent<Namespace>>;

    fn watch_secrets(&self) -> BoxStream<'static, WatchEvent<Secret>>;

    fn watch_services(&self) -> BoxStream<'static, WatchEvent<Service>>;

    fn watch_ingresses(&self) -> BoxStream<'static, WatchEvent<Ingress>>;

    fn watch_config_maps(&self) -> BoxStream<'static, WatchEvent<ConfigMap>>;

    fn watch_service_accounts(&self) -> BoxStream<'static, WatchEvent<ServiceAccount>>;

    fn watch_cluster_role_bindings(&self) -> BoxStream<'static, WatchEvent<ClusterRoleBinding>>;

    fn watch_deployments(&self) -> BoxStream<'static, WatchEvent<Deployment>>;

    fn watch_etcd_clusters(&self) -> BoxStream<'static, WatchEvent<EtcdCluster>>;
}
