// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MySQL/MariaDB physical-backup strategy — grounded on
//! `original_source/backup/strategy_mysql.go`'s `loadMysqlMaster` variant and
//! image-version selection, and `strategy_mysql_backup.go`'s
//! `preBackupMysql`/`isMysqlReady`/`backupMysql`/`prepareMysqlBackup`.
//!
//! `mariadb` reuses the target database container itself as the backup
//! worker (the original sets `container = mysqlMaster.Container` directly);
//! plain `mysql` stands up a dedicated worker container via `with_sidecar`,
//! mounted onto the same data volume, so `xtrabackup` never shares a
//! filesystem namespace with the server it is backing up.

use super::{run_hook_commands, HookContext};
use crate::sidecar::with_sidecar;
use backup_agent_adapters::container::{ContainerEngine, ContainerHandle, ContainerSpec, Mount};
use backup_agent_core::volume::{Strategy, Volume};
use backup_agent_core::AgentError;
use std::collections::HashMap;

/// Where `xtrabackup`/`mariabackup --backup` lands its physical copy,
/// mirroring the original's `<datapath>/backups`.
pub const BACKUP_DIR: &str = "/mnt/data/backups";

/// `preBackupMysql` forces `backup_error_cont = true` for the mysql/mariadb
/// strategies specifically before running the configured pre-backup hook —
/// an intentional original behavior (not one of the flagged bugs), preserved
/// here as a parameter rather than mutating the caller's `Volume`. Wired
/// into `backup.rs`'s archive-create failure check so a transient
/// `xtrabackup` hiccup never blocks the sidecar teardown that has to run
/// regardless.
pub fn force_continue_on_error(strategy: Strategy) -> bool {
    strategy.is_mysql_family()
}

/// Database variant as discovered from the target container's environment,
/// distinct from the `Volume`'s own `Strategy` tag: a volume tagged
/// `mariadb` can still be running a bitnami image, which needs its own
/// image-tag lookup (`BITNAMI_APP_NAME`/`BITNAMI_IMAGE_VERSION`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Mysql,
    Mariadb,
    BitnamiMariadb,
}

struct MysqlMaster {
    variant: Variant,
    root_password: String,
    backup_image: String,
}

fn parse_env(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.trim_end().to_string()))
        .collect()
}

/// Mirrors `loadMysqlMaster`'s variant/version detection: reads the target
/// container's environment rather than trusting the volume's own strategy
/// tag, since a `mariadb`-tagged volume may be running a bitnami image with
/// its own env var set.
async fn load_mysql_master(containers: &dyn ContainerEngine, target: &ContainerHandle) -> Result<MysqlMaster, AgentError> {
    let outcome = containers.exec(target, "env").await?;
    let env = parse_env(&outcome.stdout);

    let is_bitnami = env.contains_key("BITNAMI_APP_NAME");
    let is_mariadb = is_bitnami || env.contains_key("MARIADB_MAJOR") || env.contains_key("MARIADB_VERSION");

    let variant = if is_bitnami {
        Variant::BitnamiMariadb
    } else if is_mariadb {
        Variant::Mariadb
    } else {
        Variant::Mysql
    };

    let major_version = env
        .get("MARIADB_MAJOR")
        .or_else(|| env.get("MYSQL_MAJOR"))
        .or_else(|| env.get("BITNAMI_IMAGE_VERSION"))
        .or_else(|| env.get("MARIADB_VERSION"))
        .cloned()
        .unwrap_or_default();

    let root_password = env
        .get("MYSQL_ROOT_PASSWORD")
        .or_else(|| env.get("MARIADB_ROOT_PASSWORD"))
        .cloned()
        .unwrap_or_default();

    let backup_image = select_backup_image(variant, &major_version);

    Ok(MysqlMaster { variant, root_password, backup_image })
}

/// Mirrors `loadMysqlMaster`'s `BackupImage` selection table: mysql picks
/// `xtrabackup` by a `5.6` version threshold, mariadb/bitnami-mariadb pick
/// `mariadb-backup` by exact major-version match, defaulting to the newest
/// known tag when the version is unrecognized.
fn select_backup_image(variant: Variant, major_version: &str) -> String {
    match variant {
        Variant::Mysql => {
            if !major_version.is_empty() && major_version.as_str() < "5.6" {
                "cmptstks/xtrabackup:2.4".to_string()
            } else {
                "cmptstks/xtrabackup:8.0".to_string()
            }
        }
        Variant::Mariadb | Variant::BitnamiMariadb => match major_version {
            "10.1" | "10.2" | "10.3" | "10.4" | "10.5" | "10.6" | "10.7" | "10.8" | "10.9" => {
                format!("cmptstks/mariadb-backup:{major_version}")
            }
            _ => "cmptstks/mariadb-backup:10.9".to_string(),
        },
    }
}

fn backup_binary(variant: Variant) -> &'static str {
    match variant {
        Variant::Mysql => "xtrabackup",
        Variant::Mariadb | Variant::BitnamiMariadb => "mariabackup",
    }
}

/// Mirrors `isMysqlReady`'s bash loop: up to 11 failed `STATUS;` probes are
/// tolerated (the 12th attempt is the failure boundary, matching the
/// original's `counter == 11` exit), one probe per second rather than the
/// original's `sleep 5` so the whole probe still fits comfortably inside a
/// job's overall timeout.
async fn wait_db_ready(
    containers: &dyn ContainerEngine,
    worker: &ContainerHandle,
    host: &str,
    root_password: &str,
) -> Result<(), AgentError> {
    const MAX_ATTEMPTS: u32 = 11;
    let probe = format!("mysql -h {host} -uroot -p{root_password} -e \"STATUS;\"");
    for attempt in 1..=MAX_ATTEMPTS {
        let outcome = containers.exec(worker, &probe).await?;
        if outcome.success() {
            return Ok(());
        }
        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }
    Err(AgentError::HookFailed {
        hook: "pre_backup".into(),
        code: 1,
        detail: format!("mysql at {host} never became ready for backup after {MAX_ATTEMPTS} attempts"),
    })
}

/// Mirrors `backupMysql`'s `xtrabackup`/`mariabackup --backup` invocation,
/// including the mariadb-only FTWRL/kill-query flags the original always
/// passes for that variant.
async fn run_backup(containers: &dyn ContainerEngine, worker: &ContainerHandle, variant: Variant, host: &str, root_password: &str) -> Result<(), AgentError> {
    let binary = backup_binary(variant);
    let mut command = format!(
        "mkdir -p {BACKUP_DIR} && {binary} --backup --datadir=/var/lib/mysql --port=3306 \
         --target-dir={BACKUP_DIR} --user=root --password={root_password} --host={host}"
    );
    if matches!(variant, Variant::Mariadb | Variant::BitnamiMariadb) {
        command.push_str(
            " --ftwrl-wait-query-type=all --ftwrl-wait-timeout=60 \
             --kill-long-query-type=all --kill-long-queries-timeout=20",
        );
    }
    let outcome = containers.exec(worker, &command).await?;
    if !outcome.success() {
        return Err(AgentError::HookFailed {
            hook: "pre_backup".into(),
            code: outcome.exit_code,
            detail: format!("{binary} --backup failed: {}", outcome.stderr),
        });
    }
    Ok(())
}

/// Mirrors `prepareMysqlBackup`'s `--prepare` pass over the freshly taken
/// physical backup, required before the directory is archivable.
async fn run_prepare(containers: &dyn ContainerEngine, worker: &ContainerHandle, variant: Variant) -> Result<(), AgentError> {
    let binary = backup_binary(variant);
    let command = format!("{binary} --prepare --target-dir={BACKUP_DIR}");
    let outcome = containers.exec(worker, &command).await?;
    if !outcome.success() {
        return Err(AgentError::HookFailed {
            hook: "pre_backup".into(),
            code: outcome.exit_code,
            detail: format!("{binary} --prepare failed: {}", outcome.stderr),
        });
    }
    Ok(())
}

pub async fn pre_backup(
    _strategy: Strategy,
    volume: &Volume,
    target: &ContainerHandle,
    ctx: &HookContext,
) -> Result<(), AgentError> {
    run_hook_commands(&*ctx.containers, target, "pre_backup", &volume.pre_backup).await?;

    let master = load_mysql_master(&*ctx.containers, target).await?;

    if matches!(master.variant, Variant::Mariadb | Variant::BitnamiMariadb) {
        // mariadb reuses the target container itself as the backup worker.
        wait_db_ready(&*ctx.containers, target, "127.0.0.1", &master.root_password).await?;
        run_backup(&*ctx.containers, target, master.variant, "127.0.0.1", &master.root_password).await?;
        run_prepare(&*ctx.containers, target, master.variant).await?;
        return Ok(());
    }

    // Plain mysql stands up a dedicated backup-worker container sharing the
    // database's data volume and network namespace, matching
    // `buildBackupAgent`.
    let worker_spec = ContainerSpec {
        name: format!("{}-xtrabackup", volume.name),
        image: master.backup_image.clone(),
        mounts: vec![Mount { source: volume.name.clone(), target: "/var/lib/mysql".into(), read_only: true }],
        env: vec![("MYSQL_HOST".into(), target.id.clone()), ("MYSQL_PASSWORD".into(), master.root_password.clone())],
        labels: Default::default(),
        network_mode: format!("service:{}", target.id),
        privileged: false,
        auto_remove: true,
    };

    let containers = ctx.containers.clone();
    let root_password = master.root_password.clone();
    let target_id = target.id.clone();
    let variant = master.variant;
    with_sidecar(containers.clone(), worker_spec, move |worker| {
        let containers = containers.clone();
        let root_password = root_password.clone();
        let target_id = target_id.clone();
        async move {
            wait_db_ready(&*containers, &worker, &target_id, &root_password).await?;
            run_backup(&*containers, &worker, variant, &target_id, &root_password).await?;
            run_prepare(&*containers, &worker, variant).await
        }
    })
    .await
}

/// Removes the physical-backup directory from the target container once the
/// archive has captured it.
pub async fn post_backup(volume: &Volume, target: &ContainerHandle, ctx: &HookContext) -> Result<(), AgentError> {
    ctx.containers.exec(target, &format!("rm -rf {BACKUP_DIR}")).await?;
    run_hook_commands(&*ctx.containers, target, "post_backup", &volume.post_backup).await
}

/// Snapshots the live data directory before wiping it for the restore, so a
/// failed restore can roll back to the pre-restore state.
pub async fn pre_restore(volume: &Volume, target: &ContainerHandle, ctx: &HookContext) -> Result<(), AgentError> {
    run_hook_commands(&*ctx.containers, target, "pre_restore", &volume.pre_restore).await?;
    ctx.containers
        .exec(target, "mkdir -p /root/.snapshot && cp -a /var/lib/mysql /root/.snapshot/ 2>/dev/null; true")
        .await?;
    Ok(())
}

/// Restores via a staging directory so a partially-extracted archive never
/// overwrites a known-good data directory directly.
pub async fn post_restore(volume: &Volume, target: &ContainerHandle, ctx: &HookContext) -> Result<(), AgentError> {
    ctx.containers
        .exec(
            target,
            "mkdir -p /root/.staging && mv /var/lib/mysql/* /root/.staging/ 2>/dev/null; \
             cp -a /root/.staging/backups/* /var/lib/mysql/ 2>/dev/null; true",
        )
        .await?;
    run_hook_commands(&*ctx.containers, target, "post_restore", &volume.post_restore).await
}

/// Restores the pre-restore snapshot and cleans any leftover staged backup.
pub async fn rollback_restore(_volume: &Volume, target: &ContainerHandle, ctx: &HookContext) -> Result<(), AgentError> {
    ctx.containers
        .exec(target, "rm -rf /var/lib/mysql && cp -a /root/.snapshot/mysql /var/lib/mysql 2>/dev/null; true")
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_agent_adapters::container::{ExecOutcome, FakeContainerEngine};

    #[test]
    fn mysql_and_mariadb_force_continue_on_error() {
        assert!(force_continue_on_error(Strategy::Mysql));
        assert!(force_continue_on_error(Strategy::Mariadb));
        assert!(!force_continue_on_error(Strategy::File));
    }

    #[test]
    fn select_backup_image_picks_xtrabackup_by_version_threshold() {
        assert_eq!(select_backup_image(Variant::Mysql, "5.5"), "cmptstks/xtrabackup:2.4");
        assert_eq!(select_backup_image(Variant::Mysql, "8.0"), "cmptstks/xtrabackup:8.0");
    }

    #[test]
    fn select_backup_image_picks_mariadb_backup_by_exact_match_with_fallback() {
        assert_eq!(select_backup_image(Variant::Mariadb, "10.5"), "cmptstks/mariadb-backup:10.5");
        assert_eq!(select_backup_image(Variant::Mariadb, "99.0"), "cmptstks/mariadb-backup:10.9");
    }

    #[tokio::test]
    async fn load_mysql_master_detects_bitnami_mariadb_from_env() {
        let containers = FakeContainerEngine::new();
        containers.program_exec(
            "env",
            ExecOutcome {
                exit_code: 0,
                stdout: "BITNAMI_APP_NAME=mariadb\nBITNAMI_IMAGE_VERSION=10.6\nMARIADB_ROOT_PASSWORD=secret\n".into(),
                stderr: String::new(),
            },
        );
        let target = ContainerHandle { id: "db-1".into() };
        let master = load_mysql_master(&containers, &target).await.unwrap();
        assert_eq!(master.variant, Variant::BitnamiMariadb);
        assert_eq!(master.root_password, "secret");
    }

    #[tokio::test]
    async fn wait_db_ready_fails_after_eleven_attempts() {
        let containers = FakeContainerEngine::new();
        let target = ContainerHandle { id: "db-1".into() };
        containers.program_exec(
            "mysql -h 127.0.0.1 -uroot -ppw -e \"STATUS;\"",
            ExecOutcome { exit_code: 1, stdout: String::new(), stderr: "connection refused".into() },
        );
        let result = wait_db_ready(&containers, &target, "127.0.0.1", "pw").await;
        assert!(matches!(result, Err(AgentError::HookFailed { .. })));
    }
}
