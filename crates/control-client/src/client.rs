//! `ControlPlane` backed by a real API server.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::Utc;
use futures::future;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Event, Namespace, ObjectReference, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::runtime::watcher;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::warn;

use crds::{EtcdCluster, TenantCluster, CLUSTER_ROLE_LABEL, ROLE_LABEL_KEY};

use crate::api::{ControlPlane, WatchEvent};
use crate::error::ControlError;

/// Namespace cluster-scoped CR events are recorded in.
const EVENT_NAMESPACE: &str = "default";

/// Seed cluster access through a kube [`Client`].
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl Debug for KubeControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeControlPlane").finish_non_exhaustive()
    }
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn clusters(&self) -> Api<TenantCluster> {
        Api::all(self.client.clone())
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn etcd_clusters(&self, namespace: &str) -> Api<EtcdCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn named<K: Resource>(obj: &K, what: &str) -> Result<String, ControlError> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| ControlError::Unnamed(what.to_string()))
}

fn absent_on_404<K>(
    result: Result<K, kube::Error>,
    what: String,
) -> Result<Option<K>, ControlError> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
        Err(err) => Err(ControlError::from_kube(err, what)),
    }
}

/// Folds a kube watcher stream into [`WatchEvent`]s. Watch errors are
/// logged and swallowed; the watcher relists and resumes on its own.
fn watch_stream<K>(api: Api<K>, config: watcher::Config) -> BoxStream<'static, WatchEvent<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher(api, config)
        .scan(Vec::new(), |buffer, event| {
            let out = match event {
                Ok(watcher::Event::Init) => {
                    buffer.clear();
                    None
                }
                Ok(watcher::Event::InitApply(obj)) => {
                    buffer.push(obj);
                    None
                }
                Ok(watcher::Event::InitDone) => Some(WatchEvent::Synced(std::mem::take(buffer))),
                Ok(watcher::Event::Apply(obj)) => Some(WatchEvent::Applied(obj)),
                Ok(watcher::Event::Delete(obj)) => Some(WatchEvent::Deleted(obj)),
                Err(error) => {
                    warn!(%error, "watch stream error, watcher will relist");
                    None
                }
            };
            future::ready(Some(out))
        })
        .filter_map(future::ready)
        .boxed()
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get_cluster(&self, name: &str) -> Result<TenantCluster, ControlError> {
        self.clusters()
            .get(name)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("cluster {name}")))
    }

    async fn update_cluster(
        &self,
        cluster: &TenantCluster,
    ) -> Result<TenantCluster, ControlError> {
        let name = named(cluster, "cluster")?;
        self.clusters()
            .replace(&name, &PostParams::default(), cluster)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("cluster {name}")))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ControlError> {
        let name = named(namespace, "namespace")?;
        self.namespaces()
            .create(&PostParams::default(), namespace)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("namespace {name}")))
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ControlError> {
        self.namespaces()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| ControlError::from_kube(e, format!("namespace {name}")))
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, ControlError> {
        let name = named(secret, "secret")?;
        Api::<Secret>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("secret {namespace}/{name}")))
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ControlError> {
        let name = named(service, "service")?;
        Api::<Service>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("service {namespace}/{name}")))
    }

    async fn create_ingress(
        &self,
        namespace: &str,
        ingress: &Ingress,
    ) -> Result<Ingress, ControlError> {
        let name = named(ingress, "ingress")?;
        Api::<Ingress>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), ingress)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("ingress {namespace}/{name}")))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ControlError> {
        let name = named(config_map, "configmap")?;
        Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("configmap {namespace}/{name}")))
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, ControlError> {
        let name = named(service_account, "serviceaccount")?;
        Api::<ServiceAccount>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), service_account)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("serviceaccount {namespace}/{name}")))
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, ControlError> {
        let name = named(binding, "clusterrolebinding")?;
        Api::<ClusterRoleBinding>::all(self.client.clone())
            .create(&PostParams::default(), binding)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("clusterrolebinding {name}")))
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ControlError> {
        absent_on_404(
            self.deployments(namespace).get(name).await,
            format!("deployment {namespace}/{name}"),
        )
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ControlError> {
        let name = named(deployment, "deployment")?;
        self.deployments(namespace)
            .create(&PostParams::default(), deployment)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("deployment {namespace}/{name}")))
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ControlError> {
        let name = named(deployment, "deployment")?;
        self.deployments(namespace)
            .replace(&name, &PostParams::default(), deployment)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("deployment {namespace}/{name}")))
    }

    async fn get_etcd_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EtcdCluster>, ControlError> {
        absent_on_404(
            self.etcd_clusters(namespace).get(name).await,
            format!("etcdcluster {namespace}/{name}"),
        )
    }

    async fn create_etcd_cluster(
        &self,
        namespace: &str,
        etcd: &EtcdCluster,
    ) -> Result<EtcdCluster, ControlError> {
        let name = named(etcd, "etcdcluster")?;
        self.etcd_clusters(namespace)
            .create(&PostParams::default(), etcd)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("etcdcluster {namespace}/{name}")))
    }

    async fn update_etcd_cluster(
        &self,
        namespace: &str,
        etcd: &EtcdCluster,
    ) -> Result<EtcdCluster, ControlError> {
        let name = named(etcd, "etcdcluster")?;
        self.etcd_clusters(namespace)
            .replace(&name, &PostParams::default(), etcd)
            .await
            .map_err(|e| ControlError::from_kube(e, format!("etcdcluster {namespace}/{name}")))
    }

    async fn record_cluster_event(
        &self,
        cluster: &str,
        reason: &str,
        message: &str,
    ) -> Result<(), ControlError> {
        let now = Time(Utc::now());
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{cluster}.")),
                namespace: Some(EVENT_NAMESPACE.to_string()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some("clusterops.io/v1alpha1".to_string()),
                kind: Some("TenantCluster".to_string()),
                name: Some(cluster.to_string()),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            type_: Some("Normal".to_string()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            ..Default::default()
        };
        Api::<Event>::namespaced(self.client.clone(), EVENT_NAMESPACE)
            .create(&PostParams::default(), &event)
            .await
            .map(|_| ())
            .map_err(|e| ControlError::from_kube(e, format!("event for cluster {cluster}")))
    }

    fn watch_clusters(&self) -> BoxStream<'static, WatchEvent<TenantCluster>> {
        watch_stream(self.clusters(), watcher::Config::default())
    }

    fn watch_namespaces(&self) -> BoxStream<'static, WatchEvent<Namespace>> {
        let config =
            watcher::Config::default().labels(&format!("{ROLE_LABEL_KEY}={CLUSTER_ROLE_LABEL}"));
        watch_stream(self.namespaces(), config)
    }

    fn watch_secrets(&self) -> BoxStream<'static, WatchEvent<Secret>> {
        watch_stream(Api::all(self.client.clone()), watcher::Config::default())
    }

    fn watch_services(&self) -> BoxStream<'static, WatchEvent<Service>> {
        watch_stream(Api::all(self.client.clone()), watcher::Config::default())
    }

    fn watch_ingresses(&self) -> BoxStream<'static, WatchEvent<Ingress>> {
        watch_stream(Api::all(self.client.clone()), watcher::Config::default())
    }

    fn watch_config_maps(&self) -> BoxStream<'static, WatchEvent<ConfigMap>> {
        watch_stream(Api::all(self.client.clone()), watcher::Config::default())
    }

    fn watch_service_accounts(&self) -> BoxStream<'static, WatchEvent<ServiceAccount>> {
        watch_stream(Api::all(self.client.clone()), watcher::Config::default())
    }

    fn watch_cluster_role_bindings(&self) -> BoxStream<'static, WatchEvent<ClusterRoleBinding>> {
        watch_stream(Api::all(self.client.clone()), watcher::Config::default())
    }

    fn watch_deployments(&self) -> BoxStream<'static, WatchEvent<Deployment>> {
        watch_stream(Api::all(self.client.clone()), watcher::Config::default())
    }

    fn watch_etcd_clusters(&self) -> BoxStream<'static, WatchEvent<EtcdCluster>> {
        watch_stream(Api::all(self.client.clone()), watcher::Config::default())
    }
}
