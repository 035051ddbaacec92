//! UpdatingMaster phase: drive the rolling master update.
//!
//! The sub-phase machine itself lives in `update.rs`; this handler
//! wraps it with the finish transition and the stuck-update handling.

use chrono::Utc;
use tracing::{info, warn};

use crds::{Cluster, ClusterPhase, MasterUpdatePhase};

use crate::error::ControllerError;
use crate::sync::{update_timeout, Reconciler};

impl Reconciler {
    pub(crate) async fn sync_updating_master(
        &self,
        cluster: &Cluster,
    ) -> Result<Option<Cluster>, ControllerError> {
        if cluster.status.master_update_phase == Some(MasterUpdatePhase::Finish) {
            let mut c = cluster.clone();
            c.status.master_update_phase = None;
            c.status.last_deployed_master_version = c.spec.master_version.clone();
            c.status.phase = ClusterPhase::Running;
            c.status.last_transition_time = Utc::now();
            info!(
                cluster = %c.name,
                version = c.spec.master_version.as_deref().unwrap_or(""),
                "master update finished"
            );
            return Ok(Some(c));
        }

        let elapsed = Utc::now() - cluster.status.last_transition_time;
        if elapsed > update_timeout() {
            let mut c = cluster.clone();
            if c.status.last_deployed_master_version == c.spec.master_version {
                // Already rolling back and still stuck.
                warn!(cluster = %c.name, "master update rollback stalled, failing cluster");
                c.status.phase = ClusterPhase::Failed;
            } else {
                warn!(
                    cluster = %c.name,
                    target = c.spec.master_version.as_deref().unwrap_or(""),
                    "master update timed out, rolling back"
                );
                c.spec.master_version = c.status.last_deployed_master_version.clone();
                c.status.master_update_phase = Some(MasterUpdatePhase::Start);
            }
            c.status.last_transition_time = Utc::now();
            return Ok(Some(c));
        }

        self.advance_master_update(cluster).await
    }
}
