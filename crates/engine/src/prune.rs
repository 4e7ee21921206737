// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retention pruning — grounded on `original_source/backup/prune.go`.
//!
//! Unlike backup/restore/delete, pruning is not job-queue driven: it is a
//! cron-only sweep over every volume this host owns with backups enabled.

use crate::sidecar::with_sidecar;
use backup_agent_adapters::archive_tool::ArchiveTool;
use backup_agent_adapters::container::{ContainerEngine, ContainerSpec, Mount};
use backup_agent_core::volume::Volume;
use backup_agent_core::{keys, AgentError};
use std::sync::Arc;

pub struct PruneDeps {
    pub store: Arc<dyn backup_agent_adapters::store::CoordinationStore>,
    pub containers: Arc<dyn ContainerEngine>,
    pub archive_tool: Arc<dyn ArchiveTool>,
    pub hostname: String,
}

/// Prunes every volume owned by this host with backups enabled. Errors for
/// one volume are logged and do not stop the sweep over the rest.
pub async fn prune_all(deps: &PruneDeps) -> Result<(), AgentError> {
    let prefix = keys::volume_prefix(&deps.hostname);
    let keys_list = deps.store.list_keys(&prefix).await?;
    for key in keys_list {
        let Some(entry) = deps.store.get(&key).await? else { continue };
        let volume: Volume = match serde_json::from_slice(&entry.value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, key, "skipping unparsable volume record during prune");
                continue;
            }
        };
        if !volume.backup || volume.node != deps.hostname {
            continue;
        }
        if let Err(e) = prune_one(&volume, deps).await {
            tracing::error!(error = %e, volume = %volume.name, "prune failed");
        }
    }
    Ok(())
}

async fn prune_one(volume: &Volume, deps: &PruneDeps) -> Result<(), AgentError> {
    let repo = format!("b-{}", volume.name);
    let archive_tool = deps.archive_tool.clone();
    let retention = volume.retention;
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
    with_sidecar(deps.containers.clone(), spec, move |sidecar| {
        let archive_tool = archive_tool.clone();
        async move { archive_tool.prune(&sidecar, &retention).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_agent_adapters::archive_tool::FakeArchiveTool;
    use backup_agent_adapters::container::FakeContainerEngine;
    use backup_agent_adapters::store::FakeCoordinationStore;

    #[tokio::test]
    async fn only_prunes_volumes_owned_by_this_host_with_backup_enabled() {
        let store = Arc::new(FakeCoordinationStore::new());
        let owned = Volume { name: "owned".into(), node: "host-a".into(), backup: true, ..Default::default() };
        let not_backed_up = Volume { name: "no-backup".into(), node: "host-a".into(), backup: false, ..Default::default() };
        let foreign = Volume { name: "foreign".into(), node: "host-b".into(), backup: true, ..Default::default() };
        store.put(&keys::volume_key("host-a", "owned"), serde_json::to_vec(&owned).unwrap()).await.unwrap();
        store.put(&keys::volume_key("host-a", "no-backup"), serde_json::to_vec(&not_backed_up).unwrap()).await.unwrap();
        store.put(&keys::volume_key("host-a", "foreign"), serde_json::to_vec(&foreign).unwrap()).await.unwrap();

        let archive_tool = Arc::new(FakeArchiveTool::new());
        let deps = PruneDeps { store, containers: Arc::new(FakeContainerEngine::new()), archive_tool, hostname: "host-a".into() };
        prune_all(&deps).await.unwrap();
    }
}
