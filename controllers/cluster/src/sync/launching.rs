//! Launching phase: wait for the control plane to come up.

use chrono::Utc;
use tracing::info;

use crds::{Cluster, ClusterPhase};

use crate::error::ControllerError;
use crate::health::{cluster_health, refresh_health};
use crate::sync::{launch_timeout, Reconciler};

impl Reconciler {
    /// Re-evaluates component health; the cluster becomes Running once
    /// every component reports healthy, or Failed on launch timeout.
    pub(crate) async fn sync_launching_cluster(
        &self,
        cluster: &Cluster,
    ) -> Result<Option<Cluster>, ControllerError> {
        if let Some(failed) = self.check_timeout(cluster, launch_timeout()) {
            return Ok(Some(failed));
        }

        let health = cluster_health(&self.stores, cluster);
        let mut c = cluster.clone();
        let mut changed = refresh_health(&mut c, health);

        if health.all_healthy() {
            info!(cluster = %c.name, "control plane is healthy, cluster is running");
            c.status.phase = ClusterPhase::Running;
            c.status.last_deployed_master_version = c.spec.master_version.clone();
            c.status.last_transition_time = Utc::now();
            changed = true;
        }
        Ok(changed.then_some(c))
    }
}

#[cfg(test)]
mod tests {
    use control_client::{MockControlPlane, WatchEvent};
    use crds::ClusterPhase;

    use crate::resources::{APISERVER, CONTROLLER_MANAGER, NODE_CONTROLLER, SCHEDULER};
    use crate::test_utils::{
        deployment_with_replicas, encode, etcd_with_sizes, pending_cluster, test_reconciler,
    };

    #[tokio::test]
    async fn launching_cluster_runs_once_all_components_are_healthy() {
        let mock = MockControlPlane::new();
        let (reconciler, stores) = test_reconciler(&mock);
        let mut cluster = pending_cluster("l1");
        cluster.status.phase = ClusterPhase::Launching;
        cluster.spec.master_version = Some("1.5.2".to_string());
        let ns = cluster.namespace();
        let seeded = mock.seed_cluster(encode(&reconciler, &cluster).await);
        stores.clusters.handle(WatchEvent::Applied(seeded));

        // Nothing is up yet: health gets recorded, phase stays.
        reconciler.sync_cluster("l1").await.unwrap();
        let decoded = reconciler
            .unmarshal(&mock.cluster("l1").unwrap())
            .await
            .unwrap();
        assert_eq!(decoded.status.phase, ClusterPhase::Launching);
        let health = decoded.status.health.as_ref().expect("health recorded");
        assert!(!health.status.all_healthy());

        for name in [APISERVER, CONTROLLER_MANAGER, SCHEDULER, NODE_CONTROLLER] {
            stores
                .deployments
                .handle(WatchEvent::Applied(deployment_with_replicas(&ns, name, 1, 1)));
        }
        stores
            .etcd_clusters
            .handle(WatchEvent::Applied(etcd_with_sizes(&ns, 3, 2)));
        stores
            .clusters
            .handle(WatchEvent::Applied(mock.cluster("l1").unwrap()));

        reconciler.sync_cluster("l1").await.unwrap();
        let decoded = reconciler
            .unmarshal(&mock.cluster("l1").unwrap())
            .await
            .unwrap();
        assert_eq!(decoded.status.phase, ClusterPhase::Running);
        assert_eq!(
            decoded.status.last_deployed_master_version.as_deref(),
            Some("1.5.2")
        );
        assert!(decoded.status.health.unwrap().status.all_healthy());
    }

    #[tokio::test]
    async fn stuck_launching_cluster_fails_on_timeout() {
        let mock = MockControlPlane::new();
        let (reconciler, stores) = test_reconciler(&mock);
        let mut cluster = pending_cluster("l2");
        cluster.status.phase = ClusterPhase::Launching;
        cluster.status.last_transition_time = chrono::Utc::now() - chrono::Duration::minutes(6);
        let seeded = mock.seed_cluster(encode(&reconciler, &cluster).await);
        stores.clusters.handle(WatchEvent::Applied(seeded));

        reconciler.sync_cluster("l2").await.unwrap();
        let decoded = reconciler
            .unmarshal(&mock.cluster("l2").unwrap())
            .await
            .unwrap();
        assert_eq!(decoded.status.phase, ClusterPhase::Failed);
    }
}
