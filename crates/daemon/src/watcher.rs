// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job queue watcher — grounded on `original_source/job/job.go`'s `Watch`.
//!
//! The original long-polls Consul's blocking `kv.Keys` query directly. The
//! coordination-store facade here (`CoordinationStore::blocking_get`) only
//! exposes a blocking read of a single key, since that is the operation the
//! ownership checks elsewhere in this agent need; watching an entire prefix
//! for new children is a different shape of query. Rather than stretch that
//! trait to cover both, the watcher polls `list_keys` on a fixed interval —
//! functionally equivalent for a queue (new jobs are picked up within one
//! interval) at the cost of not being a true long-poll. See DESIGN.md
//! "Job watcher: polling vs. blocking queries".

use backup_agent_adapters::store::CoordinationStore;
use backup_agent_core::{keys, Job};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// After this many consecutive failed polls the watcher gives up rather than
/// spinning forever against an unreachable store, mirroring the original's
/// `FailCount` breaker in `job.go`.
const MAX_CONSECUTIVE_FAILURES: u32 = 12;

pub struct JobWatcher {
    store: Arc<dyn CoordinationStore>,
    hostname: String,
    poll_interval: Duration,
}

impl JobWatcher {
    pub fn new(store: Arc<dyn CoordinationStore>, hostname: String, poll_interval: Duration) -> Self {
        Self { store, hostname, poll_interval }
    }

    /// Polls the node's job queue prefix until `cancel` fires, dispatching
    /// each newly-seen job id to `tx` exactly once (a job already dispatched
    /// stays tracked in `dispatched` until its key disappears from the
    /// queue, which happens once a worker finishes and deletes it).
    pub async fn run(&self, tx: mpsc::Sender<Job>, cancel: CancellationToken) {
        let prefix = keys::job_queue_prefix(&self.hostname);
        let mut dispatched: HashSet<String> = HashSet::new();
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("job watcher stopping");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let found = match self.store.list_keys(&prefix).await {
                Ok(found) => {
                    consecutive_failures = 0;
                    found
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(error = %e, consecutive_failures, "job queue poll failed");
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        tracing::error!("job watcher giving up after repeated store failures");
                        return;
                    }
                    continue;
                }
            };

            let found_set: HashSet<&String> = found.iter().collect();
            dispatched.retain(|k| found_set.contains(k));

            for key in &found {
                if dispatched.contains(key) {
                    continue;
                }
                match self.store.get(key).await {
                    Ok(Some(entry)) => match serde_json::from_slice::<Job>(&entry.value) {
                        Ok(job) => {
                            dispatched.insert(key.clone());
                            if tx.send(job).await.is_err() {
                                tracing::info!("job watcher's channel closed, stopping");
                                return;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, key, "skipping unparsable queued job"),
                    },
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, key, "failed to fetch queued job"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_agent_adapters::store::FakeCoordinationStore;

    #[tokio::test]
    async fn dispatches_each_queued_job_exactly_once_until_removed() {
        let store = Arc::new(FakeCoordinationStore::new());
        let job = Job { id: "j-1".into(), name: "volume.backup".into(), volume_name: "web-data".into(), node: "host-a".into(), ..Default::default() };
        store.put(&job.key(), serde_json::to_vec(&job).unwrap()).await.unwrap();

        let watcher = JobWatcher::new(store.clone(), "host-a".into(), Duration::from_millis(5));
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let watcher_cancel = cancel.clone();
        let handle = tokio::spawn(async move { watcher.run(tx, watcher_cancel).await });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, "j-1");

        // still present in the store -> must not be redelivered before removal
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        store.delete(&job.key()).await.unwrap();
        cancel.cancel();
        handle.await.unwrap();
    }
}
