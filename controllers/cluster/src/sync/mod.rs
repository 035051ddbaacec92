//! Cluster reconciliation: the phase state machine.
//!
//! `sync_cluster` is what workers run per popped key: look up the
//! cached CR, decode it, dispatch to the handler owning the current
//! phase, and persist whatever the handler changed. Phase transitions
//! happen only inside the handler owning the current phase.

mod launching;
mod pending;
mod running;
mod updating;

#[cfg(test)]
mod updating_test;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cloud_provider::{marshal_cluster, unmarshal_cluster, CloudRegistry};
use control_client::ControlPlane;
use crds::{Cluster, ClusterPhase, TenantCluster};
use versions::{EqualityMatcher, MasterUpdate, MasterVersion, UpdatePathSearch};

use crate::config::Config;
use crate::credentials::CredentialFactory;
use crate::error::ControllerError;
use crate::store::Stores;
use crate::templates::MasterTemplates;

/// Bound on read-modify-write retries when persisting a cluster.
pub(crate) const MAX_UPDATE_RETRIES: u32 = 5;

/// Delay before requeueing while the stores are still syncing.
pub(crate) const STORE_SYNC_POLL: Duration = Duration::from_millis(100);

/// A cluster stuck in Pending or Launching past this window fails.
pub(crate) fn launch_timeout() -> chrono::Duration {
    chrono::Duration::minutes(5)
}

/// A master update stuck past this window rolls back, or fails if the
/// rollback itself stalled.
pub(crate) fn update_timeout() -> chrono::Duration {
    chrono::Duration::minutes(10)
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Done,
    /// The stores were not ready; offer the key again.
    Requeue,
}

/// Everything one reconcile pass needs, shared by all workers.
pub struct Reconciler {
    pub control: Arc<dyn ControlPlane>,
    pub stores: Stores,
    pub providers: CloudRegistry,
    pub templates: Arc<dyn MasterTemplates>,
    pub credentials: Arc<dyn CredentialFactory>,
    pub versions: HashMap<String, MasterVersion>,
    pub updates: Vec<MasterUpdate>,
    pub default_version: MasterVersion,
    pub config: Config,
    /// Reachability graph over the automatic update edges.
    pub automatic_update_search: UpdatePathSearch,
    /// The provider marshal/unmarshal path is not self-concurrency
    /// safe; every codec invocation takes this lock.
    codec_lock: Mutex<()>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("datacenter", &self.config.datacenter)
            .field("worker_name", &self.config.worker_name)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        control: Arc<dyn ControlPlane>,
        stores: Stores,
        providers: CloudRegistry,
        templates: Arc<dyn MasterTemplates>,
        credentials: Arc<dyn CredentialFactory>,
        versions: HashMap<String, MasterVersion>,
        updates: Vec<MasterUpdate>,
        default_version: MasterVersion,
        config: Config,
    ) -> Self {
        let automatic: Vec<MasterUpdate> = updates
            .iter()
            .filter(|u| u.automatic)
            .cloned()
            .collect();
        let automatic_update_search =
            UpdatePathSearch::new(versions.values(), &automatic, &EqualityMatcher);
        Self {
            control,
            stores,
            providers,
            templates,
            credentials,
            versions,
            updates,
            default_version,
            config,
            automatic_update_search,
            codec_lock: Mutex::new(()),
        }
    }

    /// One reconcile pass for a cluster key.
    pub async fn sync_cluster(&self, key: &str) -> Result<SyncOutcome, ControllerError> {
        let Some(tc) = self.stores.clusters.get_by_key(key) else {
            debug!(key, "cluster has been deleted");
            return Ok(SyncOutcome::Done);
        };
        if !self.stores.have_synced() {
            info!(key, "waiting for stores to sync, requeuing");
            tokio::time::sleep(STORE_SYNC_POLL).await;
            return Ok(SyncOutcome::Requeue);
        }

        let cluster = self.unmarshal(&tc).await?;
        let changed = match cluster.status.phase {
            ClusterPhase::Pending => self.sync_pending_cluster(&cluster).await,
            ClusterPhase::Launching => self.sync_launching_cluster(&cluster).await,
            ClusterPhase::Running => self.sync_running_cluster(&cluster).await,
            ClusterPhase::UpdatingMaster => self.sync_updating_master(&cluster).await,
            ClusterPhase::Failed | ClusterPhase::Unknown => {
                debug!(cluster = %cluster.name, phase = %cluster.status.phase, "ignoring cluster");
                Ok(None)
            }
        }
        .map_err(|e| e.in_phase(&cluster.name, cluster.status.phase))?;

        if let Some(changed) = changed {
            debug!(cluster = %cluster.name, phase = %cluster.status.phase, "cluster changed, persisting");
            self.persist_cluster(&cluster, &changed).await?;
        }
        Ok(SyncOutcome::Done)
    }

    /// Decodes a CR under the codec lock.
    pub(crate) async fn unmarshal(&self, tc: &TenantCluster) -> Result<Cluster, ControllerError> {
        let _guard = self.codec_lock.lock().await;
        Ok(unmarshal_cluster(&self.providers, tc)?)
    }

    /// Writes a changed cluster back with bounded conflict retry.
    ///
    /// Each attempt re-reads the backing CR so the write carries a
    /// fresh concurrency token; only conflicts are retried. Emits an
    /// event when the pass changed the phase.
    pub(crate) async fn persist_cluster(
        &self,
        old: &Cluster,
        new: &Cluster,
    ) -> Result<(), ControllerError> {
        for attempt in 1..=MAX_UPDATE_RETRIES {
            let current = self.control.get_cluster(&new.name).await?;
            let encoded = {
                let _guard = self.codec_lock.lock().await;
                marshal_cluster(&self.providers, new, &current)?
            };
            match self.control.update_cluster(&encoded).await {
                Ok(_) => {
                    if old.status.phase != new.status.phase {
                        info!(
                            cluster = %new.name,
                            from = %old.status.phase,
                            to = %new.status.phase,
                            "cluster phase changed"
                        );
                        if let Err(error) = self
                            .control
                            .record_cluster_event(
                                &new.name,
                                &new.status.phase.to_string(),
                                &format!("Cluster phase is now: {}", new.status.phase),
                            )
                            .await
                        {
                            warn!(cluster = %new.name, %error, "failed to record phase event");
                        }
                    }
                    return Ok(());
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        cluster = %new.name,
                        attempt,
                        max = MAX_UPDATE_RETRIES,
                        "write conflict, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ControllerError::RetriesExhausted(
            new.name.clone(),
            MAX_UPDATE_RETRIES,
        ))
    }

    /// Fails a cluster stuck past `timeout` since its last transition.
    pub(crate) fn check_timeout(
        &self,
        cluster: &Cluster,
        timeout: chrono::Duration,
    ) -> Option<Cluster> {
        let now = Utc::now();
        let elapsed = now - cluster.status.last_transition_time;
        if elapsed > timeout {
            info!(
                cluster = %cluster.name,
                phase = %cluster.status.phase,
                elapsed_secs = elapsed.num_seconds(),
                "phase timeout, failing cluster"
            );
            let mut failed = cluster.clone();
            failed.status.phase = ClusterPhase::Failed;
            failed.status.last_transition_time = now;
            return Some(failed);
        }
        None
    }

    /// Tears down what a deleted cluster left behind: provider-side
    /// allocations and the control-plane namespace.
    pub async fn cleanup_cluster(&self, tc: &TenantCluster) {
        let cluster = match self.unmarshal(tc).await {
            Ok(cluster) => cluster,
            Err(error) => {
                warn!(%error, "cannot decode deleted cluster, skipping provider cleanup");
                return;
            }
        };
        info!(cluster = %cluster.name, "cleaning up deleted cluster");
        if let Some(cloud) = &cluster.spec.cloud {
            match cloud_provider::provider_for(&self.providers, cloud) {
                Ok(provider) => {
                    if let Err(error) = provider.clean_up(cloud) {
                        warn!(cluster = %cluster.name, %error, "cloud provider cleanup failed");
                    }
                }
                Err(error) => {
                    warn!(cluster = %cluster.name, %error, "no provider for deleted cluster");
                }
            }
        }
        match self.control.delete_namespace(&cluster.namespace()).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {}
            Err(error) => {
                warn!(cluster = %cluster.name, %error, "failed to delete cluster namespace");
            }
        }
    }

    /// Resolves the cluster's desired master version against the
    /// catalogue; falls back to the default version when unset.
    pub(crate) fn master_version(
        &self,
        cluster: &Cluster,
    ) -> Result<&MasterVersion, ControllerError> {
        match &cluster.spec.master_version {
            Some(id) => self
                .versions
                .get(id)
                .ok_or_else(|| ControllerError::UnknownMasterVersion(id.clone())),
            None => Ok(&self.default_version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{pending_cluster, test_reconciler};
    use control_client::MockControlPlane;

    #[tokio::test]
    async fn persist_retries_through_conflicts() {
        let mock = MockControlPlane::new();
        let (reconciler, _) = test_reconciler(&mock);
        let cluster = pending_cluster("c1");
        mock.seed_cluster(crate::test_utils::encode(&reconciler, &cluster).await);

        let mut changed = cluster.clone();
        changed.spec.master_version = Some("1.5.2".to_string());

        // Two forced conflicts stay under the retry bound.
        mock.fail_cluster_updates(2);
        reconciler.persist_cluster(&cluster, &changed).await.unwrap();
        let stored = mock.cluster("c1").unwrap();
        assert_eq!(stored.spec.master_version.as_deref(), Some("1.5.2"));
    }

    #[tokio::test]
    async fn persist_gives_up_after_the_retry_bound() {
        let mock = MockControlPlane::new();
        let (reconciler, _) = test_reconciler(&mock);
        let cluster = pending_cluster("c2");
        mock.seed_cluster(crate::test_utils::encode(&reconciler, &cluster).await);

        mock.fail_cluster_updates(MAX_UPDATE_RETRIES);
        let err = reconciler
            .persist_cluster(&cluster, &cluster)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::RetriesExhausted(_, _)));
    }

    #[tokio::test]
    async fn phase_change_records_an_event() {
        let mock = MockControlPlane::new();
        let (reconciler, _) = test_reconciler(&mock);
        let cluster = pending_cluster("c3");
        mock.seed_cluster(crate::test_utils::encode(&reconciler, &cluster).await);

        let mut changed = cluster.clone();
        changed.status.phase = ClusterPhase::Launching;
        reconciler.persist_cluster(&cluster, &changed).await.unwrap();

        let events = mock.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "Launching");
    }
}
