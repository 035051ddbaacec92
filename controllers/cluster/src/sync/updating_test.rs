//! Master update sub-phase machine behavior.

use chrono::Utc;

use control_client::{MockControlPlane, WatchEvent};
use crds::{Cluster, ClusterPhase, MasterUpdatePhase};

use crate::resources::{APISERVER, ETCD_CLUSTER, ETCD_OPERATOR};
use crate::store::Stores;
use crate::sync::Reconciler;
use crate::test_utils::{
    deployment_with_replicas, encode, etcd_with_sizes, pending_cluster, test_reconciler,
};

fn updating_cluster(name: &str, sub_phase: MasterUpdatePhase) -> Cluster {
    let mut cluster = pending_cluster(name);
    cluster.status.phase = ClusterPhase::UpdatingMaster;
    cluster.status.master_update_phase = Some(sub_phase);
    cluster.status.last_deployed_master_version = Some("1.5.2".to_string());
    cluster.spec.master_version = Some("1.5.3".to_string());
    cluster.status.last_transition_time = Utc::now();
    cluster
}

async fn seed(reconciler: &Reconciler, stores: &Stores, mock: &MockControlPlane, cluster: &Cluster) {
    let seeded = mock.seed_cluster(encode(reconciler, cluster).await);
    stores.clusters.handle(WatchEvent::Applied(seeded));
}

async fn decode(reconciler: &Reconciler, mock: &MockControlPlane, name: &str) -> Cluster {
    reconciler
        .unmarshal(&mock.cluster(name).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn finish_sentinel_transitions_to_running() {
    let mock = MockControlPlane::new();
    let (reconciler, stores) = test_reconciler(&mock);
    seed(
        &reconciler,
        &stores,
        &mock,
        &updating_cluster("u1", MasterUpdatePhase::Finish),
    )
    .await;

    reconciler.sync_cluster("u1").await.unwrap();
    let decoded = decode(&reconciler, &mock, "u1").await;
    assert_eq!(decoded.status.phase, ClusterPhase::Running);
    assert_eq!(
        decoded.status.last_deployed_master_version.as_deref(),
        Some("1.5.3")
    );
    assert!(decoded.status.master_update_phase.is_none());
}

#[tokio::test]
async fn start_rolls_the_etcd_operator_first() {
    let mock = MockControlPlane::new();
    let (reconciler, stores) = test_reconciler(&mock);
    let cluster = updating_cluster("u2", MasterUpdatePhase::Start);
    let ns = cluster.namespace();
    seed(&reconciler, &stores, &mock, &cluster).await;

    reconciler.sync_cluster("u2").await.unwrap();
    assert!(mock.deployment(&ns, ETCD_OPERATOR).is_some());
    let decoded = decode(&reconciler, &mock, "u2").await;
    assert_eq!(
        decoded.status.master_update_phase,
        Some(MasterUpdatePhase::EtcdOperator)
    );
}

#[tokio::test]
async fn wait_gate_holds_until_the_component_is_healthy() {
    let mock = MockControlPlane::new();
    let (reconciler, stores) = test_reconciler(&mock);
    let cluster = updating_cluster("u3", MasterUpdatePhase::EtcdOperator);
    let ns = cluster.namespace();
    seed(&reconciler, &stores, &mock, &cluster).await;

    // Rolling: 10 desired, nothing updated yet.
    stores.deployments.handle(WatchEvent::Applied(
        deployment_with_replicas(&ns, ETCD_OPERATOR, 10, 0),
    ));
    reconciler.sync_cluster("u3").await.unwrap();
    let decoded = decode(&reconciler, &mock, "u3").await;
    assert_eq!(
        decoded.status.master_update_phase,
        Some(MasterUpdatePhase::EtcdOperator)
    );
    assert!(mock.etcd_cluster(&ns, ETCD_CLUSTER).is_none());

    // Operator is ready, the etcd cluster gets rolled next.
    stores.deployments.handle(WatchEvent::Applied(
        deployment_with_replicas(&ns, ETCD_OPERATOR, 1, 1),
    ));
    reconciler.sync_cluster("u3").await.unwrap();
    let decoded = decode(&reconciler, &mock, "u3").await;
    assert_eq!(
        decoded.status.master_update_phase,
        Some(MasterUpdatePhase::EtcdCluster)
    );
    assert!(mock.etcd_cluster(&ns, ETCD_CLUSTER).is_some());
}

#[tokio::test]
async fn missing_component_steps_back_one_sub_phase() {
    let mock = MockControlPlane::new();
    let (reconciler, stores) = test_reconciler(&mock);
    let cluster = updating_cluster("u4", MasterUpdatePhase::EtcdCluster);
    seed(&reconciler, &stores, &mock, &cluster).await;

    // No etcd cluster in the stores at all.
    reconciler.sync_cluster("u4").await.unwrap();
    let decoded = decode(&reconciler, &mock, "u4").await;
    assert_eq!(
        decoded.status.master_update_phase,
        Some(MasterUpdatePhase::EtcdOperator)
    );
}

#[tokio::test]
async fn healthy_etcd_lets_the_apiserver_roll() {
    let mock = MockControlPlane::new();
    let (reconciler, stores) = test_reconciler(&mock);
    let cluster = updating_cluster("u5", MasterUpdatePhase::EtcdCluster);
    let ns = cluster.namespace();
    seed(&reconciler, &stores, &mock, &cluster).await;

    stores
        .etcd_clusters
        .handle(WatchEvent::Applied(etcd_with_sizes(&ns, 3, 2)));
    reconciler.sync_cluster("u5").await.unwrap();
    assert!(mock.deployment(&ns, APISERVER).is_some());
    let decoded = decode(&reconciler, &mock, "u5").await;
    assert_eq!(
        decoded.status.master_update_phase,
        Some(MasterUpdatePhase::ApiServer)
    );
}

#[tokio::test]
async fn timed_out_update_rolls_back_to_the_deployed_version() {
    let mock = MockControlPlane::new();
    let (reconciler, stores) = test_reconciler(&mock);
    let mut cluster = updating_cluster("u6", MasterUpdatePhase::EtcdOperator);
    cluster.status.last_transition_time = Utc::now() - chrono::Duration::minutes(11);
    seed(&reconciler, &stores, &mock, &cluster).await;

    reconciler.sync_cluster("u6").await.unwrap();
    let decoded = decode(&reconciler, &mock, "u6").await;
    assert_eq!(decoded.status.phase, ClusterPhase::UpdatingMaster);
    assert_eq!(decoded.spec.master_version.as_deref(), Some("1.5.2"));
    assert_eq!(
        decoded.status.master_update_phase,
        Some(MasterUpdatePhase::Start)
    );
}

#[tokio::test]
async fn stalled_rollback_fails_the_cluster() {
    let mock = MockControlPlane::new();
    let (reconciler, stores) = test_reconciler(&mock);
    let mut cluster = updating_cluster("u7", MasterUpdatePhase::Start);
    // Rollback in flight: desired already reset to the deployed one.
    cluster.spec.master_version = Some("1.5.2".to_string());
    cluster.status.last_transition_time = Utc::now() - chrono::Duration::minutes(11);
    seed(&reconciler, &stores, &mock, &cluster).await;

    reconciler.sync_cluster("u7").await.unwrap();
    let decoded = decode(&reconciler, &mock, "u7").await;
    assert_eq!(decoded.status.phase, ClusterPhase::Failed);
}
