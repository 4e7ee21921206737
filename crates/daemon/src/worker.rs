// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job worker pool — grounded on `original_source/job/worker.go`'s
//! `setupWorkers`/`worker`. A fixed pool of workers share one job channel;
//! cancellation is only observed between jobs, never mid-job, matching the
//! original's refusal to abort an in-flight backup/restore on shutdown.

use crate::guard;
use backup_agent_adapters::archive_tool::ArchiveTool;
use backup_agent_adapters::container::ContainerEngine;
use backup_agent_adapters::event_log::EventLogClient;
use backup_agent_adapters::packet_filter::PacketFilter;
use backup_agent_adapters::store::CoordinationStore;
use backup_agent_core::firewall::{ForwardRule, NatRule};
use backup_agent_core::{keys, Clock, Job, JobKind};
use backup_agent_engine::{backup, delete, firewall, restore};
use backup_agent_engine::{backup::BackupDeps, delete::DeleteDeps, restore::RestoreDeps};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Shape of the Consul record at `keys::ingress_rules_key`: the reconciler's
/// desired-state input for both packet-filter chains.
#[derive(Debug, Default, Deserialize)]
struct IngressRules {
    #[serde(default)]
    nat: Vec<NatRule>,
    #[serde(default)]
    forward: Vec<ForwardRule>,
}

pub struct WorkerDeps {
    pub store: Arc<dyn CoordinationStore>,
    pub containers: Arc<dyn ContainerEngine>,
    pub archive_tool: Arc<dyn ArchiveTool>,
    pub events: Arc<dyn EventLogClient>,
    pub clock: Arc<dyn Clock>,
    pub packet_filter: Arc<dyn PacketFilter>,
    pub hostname: String,
    pub nfs_backed: bool,
    pub overlay_driver: String,
}

/// Spawns `count` workers (minimum 1) sharing `rx`. Returns their join
/// handles so the caller can await a clean shutdown.
pub fn spawn(
    count: usize,
    deps: Arc<WorkerDeps>,
    rx: mpsc::Receiver<Job>,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count.max(1))
        .map(|id| {
            let rx = rx.clone();
            let deps = deps.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker_loop(id, rx, deps, cancel).await })
        })
        .collect()
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    deps: Arc<WorkerDeps>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut guard = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                received = guard.recv() => received,
            }
        };
        let Some(job) = job else {
            tracing::info!(worker = id, "job worker shutting down");
            return;
        };

        let job_id = job.id.clone();
        let kind = job.kind();
        if let Err(e) = guard::guarded(&job_id, process_job(job.clone(), deps.clone())).await {
            tracing::error!(worker = id, job = job_id, kind = ?kind, error = %e, "job failed");
        }

        if let Err(e) = deps.store.delete(&job.key()).await {
            tracing::warn!(error = %e, job = job.id, "failed to remove completed job from queue");
        }
    }
}

async fn process_job(job: Job, deps: Arc<WorkerDeps>) -> Result<(), backup_agent_core::AgentError> {
    match job.kind() {
        Some(JobKind::VolumeBackup) => {
            let bd = BackupDeps {
                store: deps.store.clone(),
                containers: deps.containers.clone(),
                archive_tool: deps.archive_tool.clone(),
                events: deps.events.clone(),
                clock: deps.clock.clone(),
                hostname: deps.hostname.clone(),
            };
            backup::perform(&job, &bd).await
        }
        Some(JobKind::VolumeRestore) => {
            let rd = RestoreDeps {
                store: deps.store.clone(),
                containers: deps.containers.clone(),
                archive_tool: deps.archive_tool.clone(),
                events: deps.events.clone(),
                hostname: deps.hostname.clone(),
                nfs_backed: deps.nfs_backed,
            };
            restore::perform(&job, &rd).await
        }
        Some(JobKind::BackupDelete) => {
            let dd = DeleteDeps {
                store: deps.store.clone(),
                containers: deps.containers.clone(),
                archive_tool: deps.archive_tool.clone(),
                events: deps.events.clone(),
                hostname: deps.hostname.clone(),
            };
            delete::perform(&job, &dd).await
        }
        Some(JobKind::Firewall) => reconcile_firewall(&deps).await,
        None => {
            tracing::warn!(job = job.id, name = job.name, "job has an unrecognized name, dropping");
            Ok(())
        }
    }
}

/// Runs one firewall reconcile pass. Exposed so both the job worker (for an
/// explicit `firewall` job) and the periodic cron sweep in `main` can share
/// the same logic.
pub async fn reconcile_firewall(deps: &WorkerDeps) -> Result<(), backup_agent_core::AgentError> {
    let key = keys::ingress_rules_key(&deps.hostname);
    let rules = match deps.store.get(&key).await? {
        Some(entry) => serde_json::from_slice::<IngressRules>(&entry.value)?,
        None => IngressRules::default(),
    };
    firewall::reconcile_nat(&rules.nat, &*deps.packet_filter).await?;
    firewall::reconcile_forward(&rules.forward, &*deps.packet_filter, &deps.overlay_driver).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_agent_adapters::archive_tool::FakeArchiveTool;
    use backup_agent_adapters::container::FakeContainerEngine;
    use backup_agent_adapters::event_log::FakeEventLogClient;
    use backup_agent_adapters::packet_filter::FakePacketFilter;
    use backup_agent_adapters::store::FakeCoordinationStore;
    use backup_agent_core::clock::FakeClock;
    use backup_agent_core::volume::Volume;

    fn deps() -> Arc<WorkerDeps> {
        Arc::new(WorkerDeps {
            store: Arc::new(FakeCoordinationStore::new()),
            containers: Arc::new(FakeContainerEngine::new()),
            archive_tool: Arc::new(FakeArchiveTool::new()),
            events: Arc::new(FakeEventLogClient::new()),
            clock: Arc::new(FakeClock::new("2026-07-28T12:00:00Z".parse().unwrap())),
            packet_filter: Arc::new(FakePacketFilter::new()),
            hostname: "host-a".into(),
            nfs_backed: false,
            overlay_driver: "calico-node".into(),
        })
    }

    #[tokio::test]
    async fn unrecognized_job_name_is_dropped_without_error() {
        let deps = deps();
        let job = Job { name: "bogus".into(), node: "host-a".into(), ..Default::default() };
        assert!(process_job(job, deps).await.is_ok());
    }

    #[tokio::test]
    async fn firewall_job_reconciles_with_empty_ruleset_when_unset() {
        let deps = deps();
        let job = Job { name: "firewall".into(), node: "host-a".into(), ..Default::default() };
        assert!(process_job(job, deps.clone()).await.is_ok());
        let filter = &deps.packet_filter;
        assert!(filter.applied.lock().is_empty());
    }

    #[tokio::test]
    async fn spawned_worker_drains_a_queued_backup_job_and_shuts_down_on_cancel() {
        let deps = deps();
        let volume = Volume { name: "web-data".into(), node: "host-a".into(), ..Default::default() };
        deps.store
            .put(&keys::volume_key("host-a", "web-data"), serde_json::to_vec(&volume).unwrap())
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handles = spawn(1, deps.clone(), rx, cancel.clone());

        let job = Job { id: "j-1".into(), name: "volume.backup".into(), volume_name: "web-data".into(), node: "host-a".into(), ..Default::default() };
        deps.store.put(&job.key(), serde_json::to_vec(&job).unwrap()).await.unwrap();
        tx.send(job.clone()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(deps.store.get(&job.key()).await.unwrap().is_none(), "completed job must be removed from the queue");

        cancel.cancel();
        drop(tx);
        for h in handles {
            h.await.unwrap();
        }
    }
}
