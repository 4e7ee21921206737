// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive-delete job — grounded on `original_source/backup/delete.go`.

use crate::sidecar::with_sidecar;
use backup_agent_adapters::archive_tool::ArchiveTool;
use backup_agent_adapters::container::{ContainerEngine, ContainerSpec, Mount};
use backup_agent_adapters::event_log::{EventCreate, EventLogClient};
use backup_agent_adapters::store::CoordinationStore;
use backup_agent_core::volume::Volume;
use backup_agent_core::{keys, AgentError, Job, RepositoryIndex};
use std::sync::Arc;

pub struct DeleteDeps {
    pub store: Arc<dyn CoordinationStore>,
    pub containers: Arc<dyn ContainerEngine>,
    pub archive_tool: Arc<dyn ArchiveTool>,
    pub events: Arc<dyn EventLogClient>,
    pub hostname: String,
}

async fn load_volume(store: &dyn CoordinationStore, host: &str, name: &str) -> Result<Volume, AgentError> {
    let key = keys::volume_key(host, name);
    let raw = store.get(&key).await?.ok_or_else(|| AgentError::Store(format!("volume {key} not found")))?;
    Ok(serde_json::from_slice(&raw.value)?)
}

pub async fn perform(job: &Job, deps: &DeleteDeps) -> Result<(), AgentError> {
    let volume = load_volume(&*deps.store, &deps.hostname, &job.volume_name).await?;
    if volume.node != deps.hostname {
        return Err(AgentError::ForeignOwnership { volume: volume.name.clone(), owner: volume.node.clone() });
    }

    let repo = if job.source_volume_name.is_empty() {
        format!("b-{}", job.volume_name)
    } else {
        format!("b-{}", job.source_volume_name)
    };

    let event_id = deps
        .events
        .create(EventCreate {
            project_id: volume.project_id,
            service_id: volume.service_id,
            message: format!("deleting archive {} from {repo}", job.archive_name),
        })
        .await;

    let result = run_delete(job, &repo, deps).await;

    match &result {
        Ok(()) => deps.events.update(event_id, "archive deleted").await,
        Err(e) => deps.events.update(event_id, &format!("delete failed: {e}\n{}", job.archive_name)).await,
    }
    deps.events.close(event_id).await;
    result
}

async fn run_delete(job: &Job, repo: &str, deps: &DeleteDeps) -> Result<(), AgentError> {
    let archive_tool = deps.archive_tool.clone();
    let store = deps.store.clone();
    let containers = deps.containers.clone();
    let repo = repo.to_string();
    let archive_name = job.archive_name.clone();

    let spec = ContainerSpec {
        name: repo.clone(),
        image: "computestacks/borg:latest".into(),
        mounts: vec![Mount { source: repo.clone(), target: "/mnt/borg".into(), read_only: false }],
        env: vec![],
        labels: Default::default(),
        network_mode: "none".into(),
        privileged: false,
        auto_remove: true,
    };

    with_sidecar(containers, spec, move |sidecar| {
        let archive_tool = archive_tool.clone();
        let store = store.clone();
        let repo = repo.clone();
        async move {
            archive_tool.delete(&sidecar, &archive_name).await?;
            let repo_key = RepositoryIndex::key(&repo);
            if let Some(entry) = store.get(&repo_key).await? {
                let mut index: RepositoryIndex = serde_json::from_slice(&entry.value)?;
                index.archives.retain(|a| a != &archive_name);
                store.put(&repo_key, serde_json::to_vec(&index)?).await?;
            }
            Ok(())
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_agent_adapters::archive_tool::FakeArchiveTool;
    use backup_agent_adapters::container::FakeContainerEngine;
    use backup_agent_adapters::event_log::FakeEventLogClient;
    use backup_agent_adapters::store::FakeCoordinationStore;

    #[tokio::test]
    async fn deletes_archive_and_updates_index() {
        let store = Arc::new(FakeCoordinationStore::new());
        let volume = Volume { name: "web-data".into(), node: "host-a".into(), ..Default::default() };
        store.put(&keys::volume_key("host-a", "web-data"), serde_json::to_vec(&volume).unwrap()).await.unwrap();
        let index = RepositoryIndex { name: "b-web-data".into(), archives: vec!["auto-1".into(), "auto-2".into()], ..Default::default() };
        store.put(&RepositoryIndex::key("b-web-data"), serde_json::to_vec(&index).unwrap()).await.unwrap();

        let archive_tool = Arc::new(FakeArchiveTool::new());
        archive_tool.seed_archives(vec!["auto-1".into(), "auto-2".into()]);

        let deps = DeleteDeps {
            store: store.clone(),
            containers: Arc::new(FakeContainerEngine::new()),
            archive_tool,
            events: Arc::new(FakeEventLogClient::new()),
            hostname: "host-a".into(),
        };
        let job = Job { volume_name: "web-data".into(), archive_name: "auto-1".into(), node: "host-a".into(), ..Default::default() };
        perform(&job, &deps).await.unwrap();

        let raw = store.get(&RepositoryIndex::key("b-web-data")).await.unwrap().unwrap();
        let saved: RepositoryIndex = serde_json::from_slice(&raw.value).unwrap();
        assert_eq!(saved.archives, vec!["auto-2".to_string()]);
    }

    #[tokio::test]
    async fn rejects_foreign_ownership() {
        let store = Arc::new(FakeCoordinationStore::new());
        let volume = Volume { name: "web-data".into(), node: "host-b".into(), ..Default::default() };
        store.put(&keys::volume_key("host-a", "web-data"), serde_json::to_vec(&volume).unwrap()).await.unwrap();
        let deps = DeleteDeps {
            store,
            containers: Arc::new(FakeContainerEngine::new()),
            archive_tool: Arc::new(FakeArchiveTool::new()),
            events: Arc::new(FakeEventLogClient::new()),
            hostname: "host-a".into(),
        };
        let job = Job { volume_name: "web-data".into(), archive_name: "auto-1".into(), node: "host-a".into(), ..Default::default() };
        let result = perform(&job, &deps).await;
        assert!(matches!(result, Err(AgentError::ForeignOwnership { .. })));
    }
}
