// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Postgres strategy — grounded on `original_source/backup/strategy_postgres.go`.
//! The original's hooks are near-total no-op stubs beyond a pre-backup
//! checkpoint; that shape is preserved rather than invented.

use super::{run_hook_commands, HookContext};
use backup_agent_adapters::container::ContainerHandle;
use backup_agent_core::volume::Volume;
use backup_agent_core::AgentError;

/// Issues a `CHECKPOINT` only if the container is currently running — an
/// offline target is treated as an automatic success, matching the
/// original's `preBackupPostgres`.
pub async fn pre_backup(volume: &Volume, target: &ContainerHandle, ctx: &HookContext) -> Result<(), AgentError> {
    run_hook_commands(&*ctx.containers, target, "pre_backup", &volume.pre_backup).await?;
    if ctx.containers.is_running(target).await? {
        ctx.containers.exec(target, "psql -U postgres -c 'CHECKPOINT'").await?;
    }
    Ok(())
}

pub async fn post_backup(volume: &Volume, target: &ContainerHandle, ctx: &HookContext) -> Result<(), AgentError> {
    run_hook_commands(&*ctx.containers, target, "post_backup", &volume.post_backup).await
}

pub async fn pre_restore(volume: &Volume, target: &ContainerHandle, ctx: &HookContext) -> Result<(), AgentError> {
    run_hook_commands(&*ctx.containers, target, "pre_restore", &volume.pre_restore).await
}

pub async fn post_restore(volume: &Volume, target: &ContainerHandle, ctx: &HookContext) -> Result<(), AgentError> {
    run_hook_commands(&*ctx.containers, target, "post_restore", &volume.post_restore).await
}

pub async fn rollback_restore(volume: &Volume, target: &ContainerHandle, ctx: &HookContext) -> Result<(), AgentError> {
    run_hook_commands(&*ctx.containers, target, "rollback_restore", &volume.rollback_restore).await
}
