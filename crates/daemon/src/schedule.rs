// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-volume cron schedule reconciler — grounded on
//! `original_source/backup/schedule.go`'s `InitSchedule`/`scheduleBackup`/
//! `addBackupToQueue`, and on the spawn-loop-plus-`AbortHandle` pattern in
//! `other_examples/.../trailbase-core-src-scheduler.rs`.
//!
//! Cron entries are rebuilt from Consul on every boot and held only in
//! memory (see `ScheduledJob::entry_id`'s doc comment in `backup-agent-core`).
//! When a volume transitions to `backup=false`, the original only clears
//! the Consul binding and leaves the in-process cron task running until
//! the next restart. This reconciler also aborts the in-memory task
//! immediately, so a disabled volume stops firing without
//! a daemon restart.

use backup_agent_adapters::container::ContainerEngine;
use backup_agent_adapters::ssh::{ServerConnInfo, SshRemote};
use backup_agent_adapters::store::CoordinationStore;
use backup_agent_core::volume::Volume;
use backup_agent_core::{keys, Job, RepositoryIndex, ScheduledJob};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// SSH target used to remove a trashed repository's remote directory when
/// the repository volume is NFS-backed — grounded on
/// `original_source/backup/borg/container.go`'s `TrashBackupVolumeExists`,
/// whose `viper` keys (`backups.borg.nfs_host`, `nfs_ssh.port`,
/// `nfs_ssh.user`, `nfs_ssh.keyfile`) this bundles into one value.
pub struct NfsTeardown {
    pub ssh: Arc<dyn SshRemote>,
    pub conn: ServerConnInfo,
    pub export_root: String,
}

/// The `cron` crate requires seconds (and accepts an optional year) where
/// the 5-field crontab strings this agent's volumes carry (`* * * * *`) do
/// not. Pad to the 7-field form rather than require every volume's `freq`
/// field to be rewritten.
fn normalize_cron_expr(expr: &str) -> String {
    match expr.split_whitespace().count() {
        5 => format!("0 {expr} *"),
        6 => format!("{expr} *"),
        _ => expr.to_string(),
    }
}

pub struct ScheduleReconciler {
    store: Arc<dyn CoordinationStore>,
    containers: Arc<dyn ContainerEngine>,
    hostname: String,
    job_tx: tokio::sync::mpsc::Sender<Job>,
    entries: parking_lot::Mutex<HashMap<String, AbortHandle>>,
    entry_counter: AtomicU64,
    nfs: Option<NfsTeardown>,
}

impl ScheduleReconciler {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        containers: Arc<dyn ContainerEngine>,
        hostname: String,
        job_tx: tokio::sync::mpsc::Sender<Job>,
        nfs: Option<NfsTeardown>,
    ) -> Self {
        Self {
            store,
            containers,
            hostname,
            job_tx,
            entries: parking_lot::Mutex::new(HashMap::new()),
            entry_counter: AtomicU64::new(1),
            nfs,
        }
    }

    /// Runs one reconciliation pass over every volume this host owns.
    pub async fn reconcile(&self) -> Result<(), backup_agent_core::AgentError> {
        let prefix = keys::volume_prefix(&self.hostname);
        for key in self.store.list_keys(&prefix).await? {
            if key.starts_with(&keys::job_queue_prefix(&self.hostname)) || key.starts_with(&keys::schedule_prefix(&self.hostname)) {
                continue;
            }
            let Some(entry) = self.store.get(&key).await? else { continue };
            let volume: Volume = match serde_json::from_slice(&entry.value) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, key, "skipping unparsable volume during schedule reconcile");
                    continue;
                }
            };
            if volume.node != self.hostname || volume.is_empty() {
                continue;
            }
            self.reconcile_volume(&volume).await?;
        }
        Ok(())
    }

    async fn reconcile_volume(&self, volume: &Volume) -> Result<(), backup_agent_core::AgentError> {
        if volume.trash {
            return self.trash_volume(volume).await;
        }

        let schedule_key = ScheduledJob::key(&self.hostname, &volume.name);
        let binding: Option<ScheduledJob> = match self.store.get(&schedule_key).await? {
            Some(entry) => serde_json::from_slice(&entry.value).ok(),
            None => None,
        };

        if volume.backup && !volume.freq.is_empty() {
            let needs_rebuild = binding.as_ref().map(|b| b.schedule != volume.freq).unwrap_or(true)
                || !self.entries.lock().contains_key(&volume.name);
            if !needs_rebuild {
                return Ok(());
            }
            self.abort_entry(&volume.name);
            let cron_schedule = match cron::Schedule::from_str(&normalize_cron_expr(&volume.freq)) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(volume = %volume.name, freq = %volume.freq, error = %e, "invalid cron expression, skipping");
                    return Ok(());
                }
            };
            let entry_id = self.entry_counter.fetch_add(1, Ordering::SeqCst).to_string();
            let handle = spawn_volume_job(cron_schedule, volume.name.clone(), self.hostname.clone(), self.job_tx.clone());
            self.entries.lock().insert(volume.name.clone(), handle);
            self.store
                .put(&schedule_key, serde_json::to_vec(&ScheduledJob { entry_id, schedule: volume.freq.clone() })?)
                .await?;
        } else if binding.is_some() || self.entries.lock().contains_key(&volume.name) {
            self.abort_entry(&volume.name);
            self.store.delete(&schedule_key).await?;
        }
        Ok(())
    }

    /// Tears down a `trash=true` volume — grounded on `scheduleBackup`'s
    /// trash branch in `original_source/backup/schedule.go`: drop the cron
    /// binding, destroy the `b-<name>` repository volume (and its remote NFS
    /// directory if network-backed), then clear the volume's own Consul
    /// entry. Each sub-step failure is logged and swallowed rather than
    /// aborting the whole teardown, matching the original's tolerance for a
    /// repository that may already be half gone.
    async fn trash_volume(&self, volume: &Volume) -> Result<(), backup_agent_core::AgentError> {
        let schedule_key = ScheduledJob::key(&self.hostname, &volume.name);
        self.abort_entry(&volume.name);
        if let Err(e) = self.store.delete(&schedule_key).await {
            tracing::warn!(error = %e, volume = %volume.name, "failed to clear schedule binding for trashed volume");
        }

        let repo_name = format!("b-{}", volume.name);
        if let Err(e) = self.containers.remove_volume(&repo_name).await {
            tracing::warn!(error = %e, volume = %volume.name, repo = %repo_name, "failed to remove trashed repository volume");
        }

        let repo_key = RepositoryIndex::key(&repo_name);
        if let Err(e) = self.store.delete(&repo_key).await {
            tracing::warn!(error = %e, volume = %volume.name, "failed to clear repository index for trashed volume");
        }

        if let Some(nfs) = &self.nfs {
            let remote_path = format!("{}/{repo_name}", nfs.export_root);
            if let Err(e) = nfs.ssh.rm_rf(&nfs.conn, &remote_path).await {
                tracing::warn!(error = %e, volume = %volume.name, remote_path, "failed to remove trashed repository's NFS directory");
            }
        }

        let volume_key = keys::volume_key(&self.hostname, &volume.name);
        self.store.delete(&volume_key).await?;
        Ok(())
    }

    fn abort_entry(&self, volume: &str) {
        if let Some(handle) = self.entries.lock().remove(volume) {
            handle.abort();
        }
    }

    /// Aborts every in-memory cron task; used on graceful shutdown.
    pub fn stop_all(&self) {
        let mut entries = self.entries.lock();
        for (_, handle) in entries.drain() {
            handle.abort();
        }
    }
}

fn spawn_volume_job(
    schedule: cron::Schedule,
    volume_name: String,
    hostname: String,
    job_tx: tokio::sync::mpsc::Sender<Job>,
) -> AbortHandle {
    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(chrono::Utc).next() else { break };
            let Ok(duration) = (next - chrono::Utc::now()).to_std() else { continue };
            tokio::time::sleep(duration).await;

            let job = Job {
                id: format!("sched-{volume_name}-{}", next.timestamp()),
                name: "volume.backup".into(),
                volume_name: volume_name.clone(),
                node: hostname.clone(),
                archive_name: "auto".into(),
                ..Default::default()
            };
            if job_tx.send(job).await.is_err() {
                break;
            }
        }
    })
    .abort_handle()
}

/// Periodically calls `reconcile` on `check_freq` until `cancel` fires.
pub async fn run(reconciler: Arc<ScheduleReconciler>, check_freq: Duration, cancel: CancellationToken) {
    loop {
        if let Err(e) = reconciler.reconcile().await {
            tracing::error!(error = %e, "schedule reconcile pass failed");
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                reconciler.stop_all();
                return;
            }
            _ = tokio::time::sleep(check_freq) => {}
        }
    }
}
