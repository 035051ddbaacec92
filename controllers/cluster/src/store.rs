//! Watch-fed in-memory resource mirrors.
//!
//! One generic [`WatchStore`] per resource kind, kept current by a
//! background task consuming the corresponding `ControlPlane` watch
//! stream. Reads are synchronous and lock-cheap; `has_synced` gates
//! reconciles until the initial listing has landed.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::Resource;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use control_client::{ControlPlane, WatchEvent};
use crds::{EtcdCluster, TenantCluster};

/// `namespace/name` for namespaced objects, `name` for cluster-scoped.
fn object_key<K: Resource>(obj: &K) -> String {
    let name = obj.meta().name.clone().unwrap_or_default();
    match obj.meta().namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name,
    }
}

#[derive(Debug)]
struct StoreState<K> {
    objects: HashMap<String, K>,
    synced: bool,
}

impl<K> Default for StoreState<K> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            synced: false,
        }
    }
}

/// Eventually-consistent mirror of one resource kind.
#[derive(Debug)]
pub struct WatchStore<K> {
    state: Arc<RwLock<StoreState<K>>>,
}

impl<K> Clone for WatchStore<K> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<K> Default for WatchStore<K> {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
        }
    }
}

impl<K: Resource + Clone> WatchStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the initial listing has been applied.
    pub fn has_synced(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .synced
    }

    pub fn get_by_key(&self, key: &str) -> Option<K> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .objects
            .get(key)
            .cloned()
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<K> {
        self.get_by_key(&format!("{namespace}/{name}"))
    }

    pub fn list(&self) -> Vec<K> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .objects
            .values()
            .cloned()
            .collect()
    }

    /// All objects in one namespace.
    pub fn by_namespace(&self, namespace: &str) -> Vec<K> {
        let prefix = format!("{namespace}/");
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    fn replace(&self, objects: Vec<K>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.objects = objects
            .into_iter()
            .map(|obj| (object_key(&obj), obj))
            .collect();
        state.synced = true;
    }

    fn apply(&self, obj: K) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.objects.insert(object_key(&obj), obj);
    }

    fn remove(&self, obj: &K) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.objects.remove(&object_key(obj));
    }

    /// Applies one watch event. Public so tests can feed stores
    /// directly without a stream.
    pub fn handle(&self, event: WatchEvent<K>) {
        match event {
            WatchEvent::Synced(objects) => self.replace(objects),
            WatchEvent::Applied(obj) => self.apply(obj),
            WatchEvent::Deleted(obj) => self.remove(&obj),
        }
    }
}

/// Spawns the feed task that drains a watch stream into a store.
/// `on_event` runs after each applied event (used to enqueue clusters).
pub fn spawn_feed<K, F>(
    store: WatchStore<K>,
    mut stream: BoxStream<'static, WatchEvent<K>>,
    mut shutdown: watch::Receiver<bool>,
    on_event: F,
) -> JoinHandle<()>
where
    K: Resource + Clone + Send + Sync + 'static,
    F: Fn(&WatchEvent<K>) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = stream.next() => match event {
                    Some(event) => {
                        store.handle(event.clone());
                        on_event(&event);
                    }
                    None => break,
                },
            }
        }
    })
}

/// All mirrors the reconciler reads from.
#[derive(Debug, Clone, Default)]
pub struct Stores {
    pub clusters: WatchStore<TenantCluster>,
    pub namespaces: WatchStore<Namespace>,
    pub secrets: WatchStore<Secret>,
    pub services: WatchStore<Service>,
    pub ingresses: WatchStore<Ingress>,
    pub config_maps: WatchStore<ConfigMap>,
    pub service_accounts: WatchStore<ServiceAccount>,
    pub cluster_role_bindings: WatchStore<ClusterRoleBinding>,
    pub deployments: WatchStore<Deployment>,
    pub etcd_clusters: WatchStore<EtcdCluster>,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once every mirror has finished its initial listing.
    pub fn have_synced(&self) -> bool {
        self.clusters.has_synced()
            && self.namespaces.has_synced()
            && self.secrets.has_synced()
            && self.services.has_synced()
            && self.ingresses.has_synced()
            && self.config_maps.has_synced()
            && self.service_accounts.has_synced()
            && self.cluster_role_bindings.has_synced()
            && self.deployments.has_synced()
            && self.etcd_clusters.has_synced()
    }

    /// Marks every store synced with its current (possibly empty)
    /// content. Test seam; production stores sync from their streams.
    #[cfg(test)]
    pub fn mark_all_synced(&self) {
        self.clusters.replace(self.clusters.list());
        self.namespaces.replace(self.namespaces.list());
        self.secrets.replace(self.secrets.list());
        self.services.replace(self.services.list());
        self.ingresses.replace(self.ingresses.list());
        self.config_maps.replace(self.config_maps.list());
        self.service_accounts.replace(self.service_accounts.list());
        self.cluster_role_bindings
            .replace(self.cluster_role_bindings.list());
        self.deployments.replace(self.deployments.list());
        self.etcd_clusters.replace(self.etcd_clusters.list());
    }

    /// Wires every store to its watch stream on the given control
    /// plane. The cluster feed additionally invokes `on_cluster` per
    /// event so changed clusters get enqueued.
    pub fn spawn_feeds<F>(
        &self,
        control: &Arc<dyn ControlPlane>,
        shutdown: &watch::Receiver<bool>,
        on_cluster: F,
    ) -> Vec<JoinHandle<()>>
    where
        F: Fn(&WatchEvent<TenantCluster>) + Send + 'static,
    {
        vec![
            spawn_feed(
                self.clusters.clone(),
                control.watch_clusters(),
                shutdown.clone(),
                on_cluster,
            ),
            spawn_feed(
                self.namespaces.clone(),
                control.watch_namespaces(),
                shutdown.clone(),
                |_| {},
            ),
            spawn_feed(
                self.secrets.clone(),
                control.watch_secrets(),
                shutdown.clone(),
                |_| {},
            ),
            spawn_feed(
                self.services.clone(),
                control.watch_services(),
                shutdown.clone(),
                |_| {},
            ),
            spawn_feed(
                self.ingresses.clone(),
                control.watch_ingresses(),
                shutdown.clone(),
                |_| {},
            ),
            spawn_feed(
                self.config_maps.clone(),
                control.watch_config_maps(),
                shutdown.clone(),
                |_| {},
            ),
            spawn_feed(
                self.service_accounts.clone(),
                control.watch_service_accounts(),
                shutdown.clone(),
                |_| {},
            ),
            spawn_feed(
                self.cluster_role_bindings.clone(),
                control.watch_cluster_role_bindings(),
                shutdown.clone(),
                |_| {},
            ),
            spawn_feed(
                self.deployments.clone(),
                control.watch_deployments(),
                shutdown.clone(),
                |_| {},
            ),
            spawn_feed(
                self.etcd_clusters.clone(),
                control.watch_etcd_clusters(),
                shutdown.clone(),
                |_| {},
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn deployment(namespace: &str, name: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn synced_listing_replaces_content() {
        let store: WatchStore<Deployment> = WatchStore::new();
        assert!(!store.has_synced());

        store.handle(WatchEvent::Applied(deployment("ns1", "stale")));
        store.handle(WatchEvent::Synced(vec![
            deployment("ns1", "apiserver"),
            deployment("ns2", "apiserver"),
        ]));

        assert!(store.has_synced());
        assert!(store.get("ns1", "stale").is_none());
        assert!(store.get("ns1", "apiserver").is_some());
        assert_eq!(store.by_namespace("ns2").len(), 1);
    }

    #[test]
    fn applied_and_deleted_events_track_objects() {
        let store: WatchStore<Deployment> = WatchStore::new();
        let dep = deployment("cluster-x", "scheduler");

        store.handle(WatchEvent::Applied(dep.clone()));
        assert!(store.get("cluster-x", "scheduler").is_some());

        store.handle(WatchEvent::Deleted(dep));
        assert!(store.get("cluster-x", "scheduler").is_none());
    }

    #[test]
    fn cluster_scoped_objects_key_by_name() {
        let store: WatchStore<ClusterRoleBinding> = WatchStore::new();
        store.handle(WatchEvent::Applied(ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some("etcd-operator-c1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }));
        assert!(store.get_by_key("etcd-operator-c1").is_some());
    }
}
