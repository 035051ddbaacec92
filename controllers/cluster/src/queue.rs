//! Deduplicating work queue with single-flight processing.
//!
//! Workers pop cluster keys and hold a [`WorkGuard`] while reconciling.
//! A key is never handed to two workers at once: enqueues for a key
//! that is queued or currently in progress are dropped, and the
//! periodic phase scans re-offer it later. That is safe because every
//! reconcile pass is idempotent; a skipped enqueue is deferred work,
//! not lost work.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<String>,
    queued: HashSet<String>,
    in_progress: HashSet<String>,
    shut_down: bool,
}

/// Shared dedup queue of cluster keys.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offers a key. Dropped when already queued, currently being
    /// processed, or after shutdown.
    pub fn enqueue(&self, key: &str) {
        let mut state = self.lock();
        if state.shut_down {
            return;
        }
        if state.queued.contains(key) {
            return;
        }
        if state.in_progress.contains(key) {
            debug!(key, "skipped in-progress cluster");
            return;
        }
        state.queued.insert(key.to_string());
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Pops the next key, waiting while the queue is empty. Returns
    /// `None` once the queue has been shut down.
    pub async fn pop(self: &Arc<Self>) -> Option<WorkGuard> {
        loop {
            {
                let mut state = self.lock();
                if state.shut_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.in_progress.insert(key.clone());
                    return Some(WorkGuard {
                        queue: Arc::clone(self),
                        key,
                    });
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stops the queue; blocked and future pops return `None`.
    pub fn shut_down(&self) {
        self.lock().shut_down = true;
        self.notify.notify_waiters();
    }

    fn finish(&self, key: &str) {
        self.lock().in_progress.remove(key);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().queue.len()
    }
}

/// Marks a key in progress for as long as it is held.
#[derive(Debug)]
pub struct WorkGuard {
    queue: Arc<WorkQueue>,
    key: String,
}

impl WorkGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.queue.finish(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn duplicate_enqueues_collapse() {
        let queue = WorkQueue::new();
        queue.enqueue("cluster-a");
        queue.enqueue("cluster-a");
        queue.enqueue("cluster-b");
        assert_eq!(queue.len(), 2);

        let first = queue.pop().await.unwrap();
        assert_eq!(first.key(), "cluster-a");
        let second = queue.pop().await.unwrap();
        assert_eq!(second.key(), "cluster-b");
    }

    #[tokio::test]
    async fn in_progress_key_is_not_requeued() {
        let queue = WorkQueue::new();
        queue.enqueue("cluster-a");
        let guard = queue.pop().await.unwrap();

        // The key is being processed; offering it again is a no-op.
        queue.enqueue("cluster-a");
        assert_eq!(queue.len(), 0);

        // Once the guard drops, the key may be queued again.
        drop(guard);
        queue.enqueue("cluster-a");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn no_two_workers_hold_the_same_key() {
        let queue = WorkQueue::new();
        let held = Arc::new(Mutex::new(HashSet::new()));
        let overlaps = Arc::new(Mutex::new(0u32));

        let mut workers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            let held = Arc::clone(&held);
            let overlaps = Arc::clone(&overlaps);
            workers.push(tokio::spawn(async move {
                while let Some(guard) = queue.pop().await {
                    {
                        let mut held = held.lock().unwrap();
                        if !held.insert(guard.key().to_string()) {
                            *overlaps.lock().unwrap() += 1;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    held.lock().unwrap().remove(guard.key());
                }
            }));
        }

        // Hammer the same small key set from several producers.
        let mut producers = Vec::new();
        for _ in 0..3 {
            let queue = Arc::clone(&queue);
            producers.push(tokio::spawn(async move {
                for i in 0..200 {
                    queue.enqueue(&format!("cluster-{}", i % 5));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.shut_down();
        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(*overlaps.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_releases_blocked_workers() {
        let queue = WorkQueue::new();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shut_down();
        assert!(waiter.await.unwrap());
    }
}
