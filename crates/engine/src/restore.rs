// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restore job state machine — grounded on `original_source/backup/restore.go`.

use crate::sidecar::with_sidecar;
use crate::strategy::{self, HookContext};
use backup_agent_adapters::archive_tool::ArchiveTool;
use backup_agent_adapters::container::{ContainerEngine, ContainerHandle, ContainerSpec, Mount};
use backup_agent_adapters::event_log::{EventCreate, EventLogClient};
use backup_agent_adapters::store::CoordinationStore;
use backup_agent_core::volume::Volume;
use backup_agent_core::{keys, AgentError, Job};
use std::sync::Arc;
use std::time::Duration;

pub struct RestoreDeps {
    pub store: Arc<dyn CoordinationStore>,
    pub containers: Arc<dyn ContainerEngine>,
    pub archive_tool: Arc<dyn ArchiveTool>,
    pub events: Arc<dyn EventLogClient>,
    pub hostname: String,
    /// Mirrors `backups.borg.nfs`: when the repository lives on shared NFS
    /// storage, the source volume does not need to be local to this host.
    pub nfs_backed: bool,
}

fn repo_name(volume: &str) -> String {
    format!("b-{volume}")
}

async fn load_volume(store: &dyn CoordinationStore, host: &str, name: &str) -> Result<Volume, AgentError> {
    let key = keys::volume_key(host, name);
    let raw = store.get(&key).await?.ok_or_else(|| AgentError::Store(format!("volume {key} not found")))?;
    Ok(serde_json::from_slice(&raw.value)?)
}

pub async fn perform(job: &Job, deps: &RestoreDeps) -> Result<(), AgentError> {
    let dest = load_volume(&*deps.store, &deps.hostname, &job.volume_name).await?;
    if dest.node != deps.hostname {
        return Err(AgentError::ForeignOwnership { volume: dest.name.clone(), owner: dest.node.clone() });
    }

    let source_name = if job.source_volume_name.is_empty() { job.volume_name.clone() } else { job.source_volume_name.clone() };
    let source = load_volume(&*deps.store, &deps.hostname, &source_name).await?;
    if !deps.nfs_backed && source.node != deps.hostname {
        return Err(AgentError::ForeignOwnership { volume: source.name.clone(), owner: source.node.clone() });
    }

    if job.archive_name.is_empty() {
        return Err(AgentError::Config("restore job is missing an archive name".into()));
    }

    let event_id = deps
        .events
        .create(EventCreate {
            project_id: dest.project_id,
            service_id: dest.service_id,
            message: format!("restoring volume {} from {}", dest.name, job.archive_name),
        })
        .await;

    let result = run_restore(job, &dest, deps).await;

    match &result {
        Ok(()) => deps.events.update(event_id, "restore completed").await,
        Err(e) => deps.events.update(event_id, &format!("restore failed: {e}")).await,
    }
    deps.events.close(event_id).await;
    result
}

async fn run_restore(job: &Job, dest: &Volume, deps: &RestoreDeps) -> Result<(), AgentError> {
    let repo = if job.source_volume_name.is_empty() { repo_name(&job.volume_name) } else { repo_name(&job.source_volume_name) };

    let service_containers = deps.containers.find_by_service(dest.service_id, true).await?;

    let file_paths = if dest.strategy().honors_file_paths() { job.file_paths.clone() } else { Vec::new() };

    let containers = deps.containers.clone();
    let archive_tool = deps.archive_tool.clone();
    let dest = dest.clone();
    let archive = job.archive_name.clone();

    let spec = ContainerSpec {
        name: repo.clone(),
        image: "computestacks/borg:latest".into(),
        mounts: vec![
            Mount { source: repo.clone(), target: "/mnt/borg".into(), read_only: false },
            Mount { source: dest.name.clone(), target: "/mnt/data".into(), read_only: false },
        ],
        env: vec![],
        labels: Default::default(),
        network_mode: "none".into(),
        privileged: false,
        auto_remove: true,
    };

    with_sidecar(containers.clone(), spec, move |sidecar| {
        let containers = containers.clone();
        let archive_tool = archive_tool.clone();
        let service_containers = service_containers.clone();
        let file_paths = file_paths.clone();
        async move {
            if let Some(target) = service_containers.first() {
                let ctx = HookContext { containers: containers.clone() };
                strategy::pre_restore(dest.strategy(), &dest, target, &ctx).await?;
            }

            stop_all(&*containers, &service_containers).await?;

            let restore_result = archive_tool.restore(&sidecar, &archive, &file_paths).await;
            let outcome = match restore_result {
                Ok(()) => {
                    if let Some(target) = service_containers.first() {
                        let ctx = HookContext { containers: containers.clone() };
                        strategy::post_restore(dest.strategy(), &dest, target, &ctx).await
                    } else {
                        Ok(())
                    }
                }
                Err(e) => Err(e),
            };

            if outcome.is_err() {
                if let Some(target) = service_containers.first() {
                    let ctx = HookContext { containers: containers.clone() };
                    if let Err(rollback_err) = strategy::rollback_restore(dest.strategy(), &dest, target, &ctx).await {
                        tracing::error!(error = %rollback_err, "rollback_restore hook also failed");
                    }
                }
            }

            // Containers are always restarted, success or failure, with a
            // 1s pause between each to avoid thrashing the disk.
            start_all(&*containers, &service_containers).await;

            outcome
        }
    })
    .await
}

async fn stop_all(containers: &dyn ContainerEngine, handles: &[ContainerHandle]) -> Result<(), AgentError> {
    let mut failed = Vec::new();
    for handle in handles {
        if let Err(e) = containers.stop(handle).await {
            failed.push((handle.clone(), e));
        }
    }
    if failed.is_empty() {
        return Ok(());
    }
    // Best-effort restart of whatever did stop, then surface the failure.
    for handle in handles {
        let _ = containers.start(handle).await;
    }
    let (handle, err) = failed.remove(0);
    Err(AgentError::Container(format!("failed to stop {}: {err}", handle.id)))
}

async fn start_all(containers: &dyn ContainerEngine, handles: &[ContainerHandle]) {
    for (i, handle) in handles.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        if let Err(e) = containers.start(handle).await {
            tracing::error!(error = %e, container = %handle.id, "failed to restart container after restore");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_agent_adapters::archive_tool::FakeArchiveTool;
    use backup_agent_adapters::container::FakeContainerEngine;
    use backup_agent_adapters::event_log::FakeEventLogClient;
    use backup_agent_adapters::store::FakeCoordinationStore;

    fn volume(name: &str, node: &str) -> Volume {
        Volume { name: name.into(), node: node.into(), ..Default::default() }
    }

    #[tokio::test]
    async fn fails_hard_when_destination_not_owned_by_this_host() {
        let store = Arc::new(FakeCoordinationStore::new());
        store.put(&keys::volume_key("host-a", "web-data"), serde_json::to_vec(&volume("web-data", "host-b")).unwrap()).await.unwrap();
        let deps = RestoreDeps {
            store,
            containers: Arc::new(FakeContainerEngine::new()),
            archive_tool: Arc::new(FakeArchiveTool::new()),
            events: Arc::new(FakeEventLogClient::new()),
            hostname: "host-a".into(),
            nfs_backed: false,
        };
        let job = Job { volume_name: "web-data".into(), archive_name: "auto-1".into(), node: "host-a".into(), ..Default::default() };
        let result = perform(&job, &deps).await;
        assert!(matches!(result, Err(AgentError::ForeignOwnership { .. })));
    }

    #[tokio::test]
    async fn rejects_empty_archive_name() {
        let store = Arc::new(FakeCoordinationStore::new());
        store.put(&keys::volume_key("host-a", "web-data"), serde_json::to_vec(&volume("web-data", "host-a")).unwrap()).await.unwrap();
        let deps = RestoreDeps {
            store,
            containers: Arc::new(FakeContainerEngine::new()),
            archive_tool: Arc::new(FakeArchiveTool::new()),
            events: Arc::new(FakeEventLogClient::new()),
            hostname: "host-a".into(),
            nfs_backed: false,
        };
        let job = Job { volume_name: "web-data".into(), node: "host-a".into(), ..Default::default() };
        let result = perform(&job, &deps).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn restarts_containers_even_when_restore_fails() {
        let store = Arc::new(FakeCoordinationStore::new());
        store.put(&keys::volume_key("host-a", "web-data"), serde_json::to_vec(&volume("web-data", "host-a")).unwrap()).await.unwrap();
        let containers = Arc::new(FakeContainerEngine::new());
        containers.register_service_containers(0, vec![backup_agent_adapters::container::ContainerHandle { id: "svc-1".into() }]);
        let archive_tool = Arc::new(FakeArchiveTool::new());
        let deps = RestoreDeps {
            store,
            containers: containers.clone(),
            archive_tool,
            events: Arc::new(FakeEventLogClient::new()),
            hostname: "host-a".into(),
            nfs_backed: false,
        };
        let job = Job { volume_name: "web-data".into(), archive_name: "missing-archive".into(), node: "host-a".into(), ..Default::default() };
        let result = perform(&job, &deps).await;
        assert!(result.is_err());
        let running = containers.is_running(&backup_agent_adapters::container::ContainerHandle { id: "svc-1".into() }).await.unwrap();
        assert!(running, "service container must be restarted even after a failed restore");
    }
}
