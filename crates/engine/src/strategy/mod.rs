// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backup-strategy dispatch — grounded on
//! `original_source/backup/backup_hooks.go`, `restore_hooks.go`,
//! `strategy_mysql_backup.go`, `strategy_mysql_restore.go`, and
//! `strategy_postgres.go`.
//!
//! A `Strategy` is modeled as a value with five optional operations
//! (pre_backup, post_backup, pre_restore, post_restore, rollback_restore),
//! dispatched by the closed `Strategy` enum tag rather than through a
//! `dyn Trait` — see DESIGN.md "Strategy dispatch".

mod file;
mod mysql;
mod postgres;

use backup_agent_adapters::container::{ContainerEngine, ContainerHandle};
use backup_agent_core::volume::{Strategy, Volume};
use backup_agent_core::AgentError;
use std::sync::Arc;

/// Hook commands shorter than this are treated as the legacy "not really
/// configured" placeholder and skipped — mirrors the original's
/// `len(vol.PreBackup) > 2` gate.
const HOOK_PRESENT_THRESHOLD: usize = 2;

/// Carries the shared container engine handle into strategy hooks. Held as
/// an `Arc` rather than a borrow because the mysql strategy needs to hand it
/// to `with_sidecar` to stand up a separate backup-worker container.
pub struct HookContext {
    pub containers: Arc<dyn ContainerEngine>,
}

fn hook_configured(commands: &[String]) -> bool {
    commands.len() > HOOK_PRESENT_THRESHOLD
}

/// Runs each command in `commands` against `target`, in order, stopping at
/// the first failure. Unlike the original's `recover()`-based guard (which
/// shadows its own error variable and drops any panic on the floor), this
/// function lets a panic unwind to the job-level crash guard rather than
/// hiding it here.
pub(crate) async fn run_hook_commands(
    containers: &dyn ContainerEngine,
    target: &ContainerHandle,
    hook_name: &str,
    commands: &[String],
) -> Result<(), AgentError> {
    if !hook_configured(commands) {
        return Ok(());
    }
    for command in commands {
        let outcome = containers.exec(target, command).await?;
        if !outcome.success() {
            return Err(AgentError::HookFailed {
                hook: hook_name.to_string(),
                code: outcome.exit_code,
                detail: format!("{command} (non-zero exit code {}): {}", outcome.exit_code, outcome.stderr),
            });
        }
    }
    Ok(())
}

pub async fn pre_backup(
    strategy: Strategy,
    volume: &Volume,
    target: &ContainerHandle,
    ctx: &HookContext,
) -> Result<(), AgentError> {
    match strategy {
        Strategy::File => file::pre_backup(volume, target, ctx).await,
        Strategy::Mysql | Strategy::Mariadb => mysql::pre_backup(strategy, volume, target, ctx).await,
        Strategy::Postgres => postgres::pre_backup(volume, target, ctx).await,
    }
}

pub async fn post_backup(
    strategy: Strategy,
    volume: &Volume,
    target: &ContainerHandle,
    ctx: &HookContext,
) -> Result<(), AgentError> {
    match strategy {
        Strategy::File => file::post_backup(volume, target, ctx).await,
        Strategy::Mysql | Strategy::Mariadb => mysql::post_backup(volume, target, ctx).await,
        Strategy::Postgres => postgres::post_backup(volume, target, ctx).await,
    }
}

pub async fn pre_restore(
    strategy: Strategy,
    volume: &Volume,
    target: &ContainerHandle,
    ctx: &HookContext,
) -> Result<(), AgentError> {
    match strategy {
        Strategy::File => file::pre_restore(volume, target, ctx).await,
        Strategy::Mysql | Strategy::Mariadb => mysql::pre_restore(volume, target, ctx).await,
        Strategy::Postgres => postgres::pre_restore(volume, target, ctx).await,
    }
}

pub async fn post_restore(
    strategy: Strategy,
    volume: &Volume,
    target: &ContainerHandle,
    ctx: &HookContext,
) -> Result<(), AgentError> {
    match strategy {
        Strategy::File => file::post_restore(volume, target, ctx).await,
        Strategy::Mysql | Strategy::Mariadb => mysql::post_restore(volume, target, ctx).await,
        Strategy::Postgres => postgres::post_restore(volume, target, ctx).await,
    }
}

/// Whether the archive-create step must tolerate a failure regardless of
/// the volume's own `backup_continue_on_error` flag — mirrors
/// `preBackupMysql` forcing `backup_error_cont = true` for the mysql family
/// so the sidecar teardown always runs.
pub fn force_continue_on_error(strategy: Strategy) -> bool {
    match strategy {
        Strategy::Mysql | Strategy::Mariadb => mysql::force_continue_on_error(strategy),
        Strategy::File | Strategy::Postgres => false,
    }
}

/// Runs `volume.rollback_restore`, the authoritative field for this hook.
/// The original instead re-runs `PostRestore` here, treated here as a
/// distinct inconsistency rather than intended behavior — see DESIGN.md
/// "rollback_restore hook".
pub async fn rollback_restore(
    strategy: Strategy,
    volume: &Volume,
    target: &ContainerHandle,
    ctx: &HookContext,
) -> Result<(), AgentError> {
    match strategy {
        Strategy::File => run_hook_commands(&*ctx.containers, target, "rollback_restore", &volume.rollback_restore).await,
        Strategy::Mysql | Strategy::Mariadb => mysql::rollback_restore(volume, target, ctx).await,
        Strategy::Postgres => postgres::rollback_restore(volume, target, ctx).await,
    }
}
