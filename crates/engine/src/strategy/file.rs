// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain file-copy strategy: hooks run verbatim, no strategy-specific
//! dump/restore staging. Grounded on `original_source/backup/backup_hooks.go`
//! and `restore_hooks.go`'s default (no-strategy-match) path.

use super::{run_hook_commands, HookContext};
use backup_agent_adapters::container::ContainerHandle;
use backup_agent_core::volume::Volume;
use backup_agent_core::AgentError;

pub async fn pre_backup(volume: &Volume, target: &ContainerHandle, ctx: &HookContext) -> Result<(), AgentError> {
    run_hook_commands(&*ctx.containers, target, "pre_backup", &volume.pre_backup).await
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
