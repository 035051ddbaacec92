//! Master update orchestration.
//!
//! Two pieces: the sub-phase machine that rolls the control-plane
//! components one at a time, and the trigger loop that starts updates
//! for running clusters whose desired version drifted, or for which
//! an automatic update edge exists.

use chrono::Utc;
use tracing::{debug, info, warn};

use crds::{Cluster, ClusterPhase, MasterUpdatePhase};
use versions::best_automatic_update;

use crate::error::ControllerError;
use crate::health::{healthy_deployment, healthy_etcd};
use crate::resources;
use crate::sync::Reconciler;

fn with_update_phase(cluster: &Cluster, phase: MasterUpdatePhase) -> Cluster {
    let mut c = cluster.clone();
    c.status.master_update_phase = Some(phase);
    c
}

impl Reconciler {
    /// Executes one step of the rolling update.
    ///
    /// Each arm either applies the next component and advances the
    /// sub-phase, returns `None` to keep waiting for the current
    /// component, or falls back one sub-phase when the component it
    /// waits for has vanished from the stores.
    pub(crate) async fn advance_master_update(
        &self,
        cluster: &Cluster,
    ) -> Result<Option<Cluster>, ControllerError> {
        let ns = cluster.namespace();
        let version = self.master_version(cluster)?.clone();
        // An unset sub-phase means the update was just triggered.
        let phase = cluster
            .status
            .master_update_phase
            .unwrap_or(MasterUpdatePhase::Start);

        match phase {
            MasterUpdatePhase::Start => {
                info!(cluster = %cluster.name, version = %version.id, "rolling etcd operator");
                self.apply_component(&ns, resources::ETCD_OPERATOR, &version.etcd_operator_deployment_yaml)
                    .await?;
                Ok(Some(with_update_phase(cluster, MasterUpdatePhase::EtcdOperator)))
            }

            MasterUpdatePhase::EtcdOperator => {
                match self.stores.deployments.get(&ns, resources::ETCD_OPERATOR) {
                    None => {
                        warn!(cluster = %cluster.name, "etcd operator vanished, stepping back");
                        Ok(Some(with_update_phase(cluster, MasterUpdatePhase::Start)))
                    }
                    Some(dep) if !healthy_deployment(&dep) => Ok(None),
                    Some(_) => {
                        info!(cluster = %cluster.name, "rolling etcd cluster");
                        let mut etcd = self.templates.etcd_cluster(&version.etcd_cluster_yaml)?;
                        etcd.metadata.name = Some(resources::ETCD_CLUSTER.to_string());
                        etcd.metadata.namespace = Some(ns.clone());
                        self.control.apply_etcd_cluster(&ns, &etcd).await?;
                        Ok(Some(with_update_phase(cluster, MasterUpdatePhase::EtcdCluster)))
                    }
                }
            }

            MasterUpdatePhase::EtcdCluster => {
                match self.stores.etcd_clusters.get(&ns, resources::ETCD_CLUSTER) {
                    None => {
                        warn!(cluster = %cluster.name, "etcd cluster vanished, stepping back");
                        Ok(Some(with_update_phase(cluster, MasterUpdatePhase::EtcdOperator)))
                    }
                    Some(etcd) if !healthy_etcd(&etcd) => Ok(None),
                    Some(_) => {
                        info!(cluster = %cluster.name, "rolling apiserver");
                        self.apply_component(&ns, resources::APISERVER, &version.apiserver_deployment_yaml)
                            .await?;
                        Ok(Some(with_update_phase(cluster, MasterUpdatePhase::ApiServer)))
                    }
                }
            }

            MasterUpdatePhase::ApiServer => {
                match self.stores.deployments.get(&ns, resources::APISERVER) {
                    None => {
                        warn!(cluster = %cluster.name, "apiserver vanished, stepping back");
                        Ok(Some(with_update_phase(cluster, MasterUpdatePhase::EtcdCluster)))
                    }
                    Some(dep) if !healthy_deployment(&dep) => Ok(None),
                    Some(_) => {
                        info!(cluster = %cluster.name, "rolling controllers");
                        for (name, file) in controller_components(&version) {
                            self.apply_component(&ns, name, file).await?;
                        }
                        Ok(Some(with_update_phase(cluster, MasterUpdatePhase::Controllers)))
                    }
                }
            }

            MasterUpdatePhase::Controllers => {
                for (name, _) in controller_components(&version) {
                    match self.stores.deployments.get(&ns, name) {
                        None => {
                            warn!(cluster = %cluster.name, component = name, "controller vanished, stepping back");
                            return Ok(Some(with_update_phase(cluster, MasterUpdatePhase::ApiServer)));
                        }
                        Some(dep) if !healthy_deployment(&dep) => return Ok(None),
                        Some(_) => {}
                    }
                }
                Ok(Some(with_update_phase(cluster, MasterUpdatePhase::Finish)))
            }

            // The phase handler consumes the sentinel before this runs.
            MasterUpdatePhase::Finish => Ok(None),
        }
    }

    async fn apply_component(
        &self,
        namespace: &str,
        name: &str,
        file: &str,
    ) -> Result<(), ControllerError> {
        let mut dep = self.templates.deployment(file)?;
        dep.metadata.name = Some(name.to_string());
        dep.metadata.namespace = Some(namespace.to_string());
        self.control.apply_deployment(namespace, &dep).await?;
        Ok(())
    }

    /// One pass of the update trigger scan over all running clusters.
    ///
    /// Per-cluster failures are logged and skipped; one broken cluster
    /// must not stall updates for the rest.
    pub async fn run_update_triggers(&self) {
        if !self.stores.have_synced() {
            return;
        }
        for tc in self.stores.clusters.list() {
            let cluster = match self.unmarshal(&tc).await {
                Ok(cluster) => cluster,
                Err(error) => {
                    warn!(%error, "skipping undecodable cluster in update scan");
                    continue;
                }
            };
            if let Err(error) = self.trigger_update(&cluster).await {
                warn!(cluster = %cluster.name, %error, "update trigger failed");
            }
        }
    }

    /// Starts an update for one cluster when warranted.
    ///
    /// An explicit desired version that differs from the deployed one
    /// wins; otherwise the best enabled automatic edge from the
    /// deployed version is taken, provided the target is reachable in
    /// the automatic update graph.
    async fn trigger_update(&self, cluster: &Cluster) -> Result<(), ControllerError> {
        if cluster.status.phase != ClusterPhase::Running {
            return Ok(());
        }
        let Some(deployed) = cluster.status.last_deployed_master_version.clone() else {
            return Ok(());
        };

        let desired = cluster.spec.master_version.clone();
        if let Some(desired) = &desired {
            if *desired != deployed {
                if !self.versions.contains_key(desired) {
                    return Err(ControllerError::UnknownMasterVersion(desired.clone()));
                }
                info!(
                    cluster = %cluster.name,
                    from = %deployed,
                    to = %desired,
                    "desired master version changed, starting update"
                );
                let mut c = cluster.clone();
                self.start_update(cluster, &mut c).await?;
                return Ok(());
            }
        }

        let Some(update) = best_automatic_update(&deployed, &self.updates)? else {
            return Ok(());
        };
        // Only follow edges the automatic graph can actually walk.
        if let Err(error) = self.automatic_update_search.search(&deployed, &update.to) {
            debug!(
                cluster = %cluster.name,
                from = %deployed,
                to = %update.to,
                %error,
                "automatic update target not reachable"
            );
            return Ok(());
        }
        info!(
            cluster = %cluster.name,
            from = %deployed,
            to = %update.to,
            "starting automatic master update"
        );
        let mut c = cluster.clone();
        c.spec.master_version = Some(update.to.clone());
        self.start_update(cluster, &mut c).await?;
        Ok(())
    }

    async fn start_update(&self, old: &Cluster, new: &mut Cluster) -> Result<(), ControllerError> {
        new.status.phase = ClusterPhase::UpdatingMaster;
        new.status.master_update_phase = Some(MasterUpdatePhase::Start);
        new.status.last_transition_time = Utc::now();
        self.persist_cluster(old, new).await
    }
}

/// Controller deployments rolled after the apiserver, in order.
fn controller_components(version: &versions::MasterVersion) -> Vec<(&'static str, &str)> {
    let mut components = vec![
        (resources::CONTROLLER_MANAGER, version.controller_deployment_yaml.as_str()),
        (resources::SCHEDULER, version.scheduler_deployment_yaml.as_str()),
    ];
    if !version.node_controller_deployment_yaml.is_empty() {
        components.push((resources::NODE_CONTROLLER, version.node_controller_deployment_yaml.as_str()));
    }
    if !version.addon_manager_deployment_yaml.is_empty() {
        components.push((resources::ADDON_MANAGER, version.addon_manager_deployment_yaml.as_str()));
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use control_client::{MockControlPlane, WatchEvent};
    use versions::MasterUpdate;

    use crate::test_utils::{encode, pending_cluster, test_reconciler, test_reconciler_with_updates};

    fn running_cluster(name: &str, deployed: &str, desired: &str) -> Cluster {
        let mut cluster = pending_cluster(name);
        cluster.status.phase = ClusterPhase::Running;
        cluster.status.last_deployed_master_version = Some(deployed.to_string());
        cluster.spec.master_version = Some(desired.to_string());
        cluster.status.last_transition_time = Utc::now();
        cluster
    }

    #[tokio::test]
    async fn desired_version_drift_starts_an_update() {
        let mock = MockControlPlane::new();
        let (reconciler, stores) = test_reconciler(&mock);
        let cluster = running_cluster("t1", "1.5.2", "1.5.3");
        let seeded = mock.seed_cluster(encode(&reconciler, &cluster).await);
        stores.clusters.handle(WatchEvent::Applied(seeded));

        reconciler.run_update_triggers().await;

        let decoded = reconciler
            .unmarshal(&mock.cluster("t1").unwrap())
            .await
            .unwrap();
        assert_eq!(decoded.status.phase, ClusterPhase::UpdatingMaster);
        assert_eq!(
            decoded.status.master_update_phase,
            Some(MasterUpdatePhase::Start)
        );
        assert_eq!(decoded.spec.master_version.as_deref(), Some("1.5.3"));
    }

    #[tokio::test]
    async fn automatic_edge_bumps_the_desired_version() {
        let mock = MockControlPlane::new();
        let (reconciler, stores) = test_reconciler_with_updates(
            &mock,
            vec![MasterUpdate::automatic("1.5.2", "1.5.3")],
        );
        let cluster = running_cluster("t2", "1.5.2", "1.5.2");
        let seeded = mock.seed_cluster(encode(&reconciler, &cluster).await);
        stores.clusters.handle(WatchEvent::Applied(seeded));

        reconciler.run_update_triggers().await;

        let decoded = reconciler
            .unmarshal(&mock.cluster("t2").unwrap())
            .await
            .unwrap();
        assert_eq!(decoded.status.phase, ClusterPhase::UpdatingMaster);
        assert_eq!(decoded.spec.master_version.as_deref(), Some("1.5.3"));
    }

    #[tokio::test]
    async fn settled_cluster_is_left_alone() {
        let mock = MockControlPlane::new();
        let (reconciler, stores) = test_reconciler(&mock);
        let cluster = running_cluster("t3", "1.5.2", "1.5.2");
        let seeded = mock.seed_cluster(encode(&reconciler, &cluster).await);
        stores.clusters.handle(WatchEvent::Applied(seeded));

        reconciler.run_update_triggers().await;

        let decoded = reconciler
            .unmarshal(&mock.cluster("t3").unwrap())
            .await
            .unwrap();
        assert_eq!(decoded.status.phase, ClusterPhase::Running);
    }

    #[tokio::test]
    async fn non_running_clusters_are_skipped() {
        let mock = MockControlPlane::new();
        let (reconciler, stores) = test_reconciler(&mock);
        let mut cluster = pending_cluster("t4");
        cluster.spec.master_version = Some("1.5.3".to_string());
        cluster.status.last_deployed_master_version = Some("1.5.2".to_string());
        let seeded = mock.seed_cluster(encode(&reconciler, &cluster).await);
        stores.clusters.handle(WatchEvent::Applied(seeded));

        reconciler.run_update_triggers().await;

        let decoded = reconciler
            .unmarshal(&mock.cluster("t4").unwrap())
            .await
            .unwrap();
        assert_eq!(decoded.status.phase, ClusterPhase::Pending);
    }
}
