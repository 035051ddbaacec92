//! Controller wiring: watches feed the work queue, workers drain it.
//!
//! Change-driven reconciles come from the cluster watch; periodic
//! scans re-offer clusters per phase so waiting handlers make
//! progress without a triggering event, and a slow full resync
//! re-offers everything as a safety net.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use control_client::WatchEvent;
use crds::{ClusterPhase, TenantCluster, WORKER_NAME_LABEL_KEY};

use crate::queue::WorkQueue;
use crate::sync::{Reconciler, SyncOutcome};

const WORKER_COUNT: usize = 5;
const FULL_RESYNC_PERIOD: Duration = Duration::from_secs(5 * 60);
const UPDATE_TRIGGER_PERIOD: Duration = Duration::from_secs(60);

/// Re-offer cadence per phase. Launching polls fast because it only
/// waits on health; Running barely needs the nudge at all.
const PHASE_SCAN_PERIODS: &[(ClusterPhase, Duration)] = &[
    (ClusterPhase::Pending, Duration::from_secs(10)),
    (ClusterPhase::Launching, Duration::from_secs(2)),
    (ClusterPhase::Running, Duration::from_secs(60)),
    (ClusterPhase::UpdatingMaster, Duration::from_secs(5)),
];

/// True when this controller instance is responsible for the cluster.
/// An unset shard serves clusters without a worker-name label.
fn in_shard(tc: &TenantCluster, worker_name: &str) -> bool {
    let label = tc
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(WORKER_NAME_LABEL_KEY))
        .map(String::as_str)
        .unwrap_or("");
    label == worker_name
}

fn cluster_key(tc: &TenantCluster) -> Option<String> {
    tc.metadata.name.clone()
}

/// The running cluster controller.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
}

impl Controller {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue: WorkQueue::new(),
        }
    }

    /// Runs until ctrl-c, then drains: the queue stops handing out
    /// keys, workers finish their current cluster and exit, and the
    /// watch feeds are told to stop.
    pub async fn run(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker_name = self.reconciler.config.worker_name.clone();
        let on_cluster = {
            let queue = Arc::clone(&self.queue);
            let reconciler = Arc::clone(&self.reconciler);
            let worker_name = worker_name.clone();
            move |event: &WatchEvent<TenantCluster>| match event {
                WatchEvent::Synced(clusters) => {
                    for tc in clusters {
                        if in_shard(tc, &worker_name) {
                            if let Some(key) = cluster_key(tc) {
                                queue.enqueue(&key);
                            }
                        }
                    }
                }
                WatchEvent::Applied(tc) => {
                    if in_shard(tc, &worker_name) {
                        if let Some(key) = cluster_key(tc) {
                            queue.enqueue(&key);
                        }
                    }
                }
                WatchEvent::Deleted(tc) => {
                    if in_shard(tc, &worker_name) {
                        let reconciler = Arc::clone(&reconciler);
                        let tc = tc.clone();
                        tokio::spawn(async move {
                            reconciler.cleanup_cluster(&tc).await;
                        });
                    }
                }
            }
        };
        let feeds = self
            .reconciler
            .stores
            .spawn_feeds(&self.reconciler.control, &shutdown_rx, on_cluster);

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(WORKER_COUNT);
        for id in 0..WORKER_COUNT {
            workers.push(tokio::spawn(run_worker(
                id,
                Arc::clone(&self.queue),
                Arc::clone(&self.reconciler),
            )));
        }

        let mut scanners: Vec<JoinHandle<()>> = Vec::new();
        for &(phase, period) in PHASE_SCAN_PERIODS {
            scanners.push(tokio::spawn(run_phase_scan(
                phase,
                period,
                Arc::clone(&self.queue),
                Arc::clone(&self.reconciler),
                shutdown_rx.clone(),
            )));
        }
        scanners.push(tokio::spawn(run_full_resync(
            Arc::clone(&self.queue),
            Arc::clone(&self.reconciler),
            shutdown_rx.clone(),
        )));
        scanners.push(tokio::spawn(run_update_trigger_loop(
            Arc::clone(&self.reconciler),
            shutdown_rx.clone(),
        )));

        info!(workers = WORKER_COUNT, "cluster controller started");
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received, draining");

        self.queue.shut_down();
        let _ = shutdown_tx.send(true);
        for worker in workers {
            let _ = worker.await;
        }
        for scanner in scanners {
            scanner.abort();
        }
        for feed in feeds {
            let _ = feed.await;
        }
        info!("cluster controller stopped");
        Ok(())
    }
}

/// Worker loop: pop a key, reconcile, release. A requeue outcome
/// re-offers the key after the guard dropped so another worker may
/// pick it up.
async fn run_worker(id: usize, queue: Arc<WorkQueue>, reconciler: Arc<Reconciler>) {
    debug!(worker = id, "worker started");
    while let Some(guard) = queue.pop().await {
        let key = guard.key().to_string();
        let outcome = reconciler.sync_cluster(&key).await;
        drop(guard);
        match outcome {
            Ok(SyncOutcome::Done) => {}
            Ok(SyncOutcome::Requeue) => queue.enqueue(&key),
            Err(error) => {
                warn!(worker = id, cluster = %key, %error, "reconcile failed");
            }
        }
    }
    debug!(worker = id, "worker stopped");
}

/// Periodically re-offers every shard cluster sitting in `phase`.
async fn run_phase_scan(
    phase: ClusterPhase,
    period: Duration,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }
        for tc in reconciler.stores.clusters.list() {
            if !in_shard(&tc, &reconciler.config.worker_name) {
                continue;
            }
            let current = tc.status.as_ref().map(|s| s.phase).unwrap_or_default();
            if current == phase {
                if let Some(key) = cluster_key(&tc) {
                    queue.enqueue(&key);
                }
            }
        }
    }
}

/// Slow safety net: re-offer every shard cluster regardless of phase.
async fn run_full_resync(
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(FULL_RESYNC_PERIOD);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }
        debug!("full resync");
        for tc in reconciler.stores.clusters.list() {
            if in_shard(&tc, &reconciler.config.worker_name) {
                if let Some(key) = cluster_key(&tc) {
                    queue.enqueue(&key);
                }
            }
        }
    }
}

async fn run_update_trigger_loop(reconciler: Arc<Reconciler>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(UPDATE_TRIGGER_PERIOD);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }
        reconciler.run_update_triggers().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn labeled_cluster(name: &str, worker: Option<&str>) -> TenantCluster {
        let labels = worker.map(|w| {
            let mut l = BTreeMap::new();
            l.insert(WORKER_NAME_LABEL_KEY.to_string(), w.to_string());
            l
        });
        TenantCluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels,
                ..Default::default()
            },
            spec: crds::TenantClusterSpec {
                human_readable_name: name.to_string(),
                master_version: None,
            },
            status: None,
        }
    }

    #[test]
    fn default_shard_skips_labeled_clusters() {
        assert!(in_shard(&labeled_cluster("a", None), ""));
        assert!(!in_shard(&labeled_cluster("b", Some("dev")), ""));
    }

    #[test]
    fn named_shard_only_takes_its_own() {
        assert!(in_shard(&labeled_cluster("a", Some("dev")), "dev"));
        assert!(!in_shard(&labeled_cluster("b", None), "dev"));
        assert!(!in_shard(&labeled_cluster("c", Some("other")), "dev"));
    }
}
