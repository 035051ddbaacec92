//! Running phase: keep the recorded health current.
//!
//! The handler never transitions the cluster anywhere. Version drift
//! is picked up by the update trigger loop, not here, so a steady
//! cluster reconciles to a no-op.

use crds::Cluster;

use crate::error::ControllerError;
use crate::health::{cluster_health, refresh_health};
use crate::sync::Reconciler;

impl Reconciler {
    pub(crate) async fn sync_running_cluster(
        &self,
        cluster: &Cluster,
    ) -> Result<Option<Cluster>, ControllerError> {
        let health = cluster_health(&self.stores, cluster);
        let mut c = cluster.clone();
        let changed = refresh_health(&mut c, health);
        Ok(changed.then_some(c))
    }
}
