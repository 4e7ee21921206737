// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `csbackupd`: per-host volume-backup and firewall reconciliation agent.
//!
//! Startup order mirrors `original_source/main.go`'s `configureApp()`
//! followed by `main()`'s adapter wiring: load config, build every adapter,
//! spawn the job watcher, worker pool, schedule reconciler, and firewall
//! sweep, then block until a shutdown signal cancels them all.

use backup_agent_adapters::archive_tool::BorgArchiveTool;
use backup_agent_adapters::container::DockerEngine;
use backup_agent_adapters::event_log::{EventLogClient, HttpEventLogClient, NoopEventLogClient};
use backup_agent_adapters::packet_filter::SystemPacketFilter;
use backup_agent_adapters::store::ConsulStore;
use backup_agent_core::SystemClock;
use backup_agent_daemon::config::AgentConfig;
use backup_agent_daemon::{guard, schedule, signal, watcher, worker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn config_path() -> PathBuf {
    std::env::var("CSBACKUPD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/csbackupd/csbackupd.yaml"))
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = AgentConfig::load(&config_path())?;
    tracing::info!(node = %config.node, "csbackupd starting");

    let store: Arc<dyn backup_agent_adapters::store::CoordinationStore> =
        Arc::new(ConsulStore::new(config.consul.address.clone(), config.consul.token.clone()));
    let containers = Arc::new(DockerEngine::connect()?);
    let containers: Arc<dyn backup_agent_adapters::container::ContainerEngine> = containers;
    let archive_tool: Arc<dyn backup_agent_adapters::archive_tool::ArchiveTool> =
        Arc::new(BorgArchiveTool::new(containers.clone(), config.backups.borg.lock_wait));
    let events: Arc<dyn EventLogClient> = if config.events.base_url.is_empty() {
        Arc::new(NoopEventLogClient)
    } else {
        Arc::new(HttpEventLogClient::new(config.events.base_url.clone(), config.events.token.clone()))
    };
    let packet_filter = Arc::new(CombinedPacketFilter::new());

    let worker_deps = Arc::new(worker::WorkerDeps {
        store: store.clone(),
        containers: containers.clone(),
        archive_tool: archive_tool.clone(),
        events: events.clone(),
        clock: Arc::new(SystemClock),
        packet_filter: packet_filter.clone(),
        hostname: config.node.clone(),
        nfs_backed: config.backups.borg.nfs,
        overlay_driver: config.firewall.overlay_driver.clone(),
    });

    let (job_tx, job_rx) = tokio::sync::mpsc::channel(256);
    let cancel = CancellationToken::new();

    let watcher = watcher::JobWatcher::new(store.clone(), config.node.clone(), Duration::from_secs(5));
    let watcher_tx = job_tx.clone();
    let watcher_cancel = cancel.clone();
    let watcher_handle = tokio::spawn(async move { watcher.run(watcher_tx, watcher_cancel).await });

    let worker_handles = worker::spawn(config.queue.numworkers, worker_deps.clone(), job_rx, cancel.clone());

    let nfs_teardown = if config.backups.borg.nfs && !config.backups.borg.nfs_server.is_empty() {
        Some(schedule::NfsTeardown {
            ssh: Arc::new(backup_agent_adapters::ssh::SystemSshRemote),
            conn: backup_agent_adapters::ssh::ServerConnInfo {
                server: config.backups.borg.nfs_server.clone(),
                port: config.backups.borg.nfs_ssh.port,
                user: config.backups.borg.nfs_ssh.user.clone(),
                keyfile: config.backups.borg.nfs_ssh.keyfile.clone(),
            },
            export_root: config.backups.borg.nfs_export_root.clone(),
        })
    } else {
        None
    };
    let reconciler = Arc::new(schedule::ScheduleReconciler::new(
        store.clone(),
        containers.clone(),
        config.node.clone(),
        job_tx.clone(),
        nfs_teardown,
    ));
    let check_freq = parse_freq_seconds(&config.backups.check_freq, 60);
    let schedule_cancel = cancel.clone();
    let schedule_handle = tokio::spawn(schedule::run(reconciler, check_freq, schedule_cancel));

    let prune_deps = backup_agent_engine::prune::PruneDeps {
        store: store.clone(),
        containers: containers.clone(),
        archive_tool: archive_tool.clone(),
        hostname: config.node.clone(),
    };
    let prune_freq = parse_freq_seconds(&config.backups.prune_freq, 3600);
    let prune_cancel = cancel.clone();
    let prune_handle = tokio::spawn(run_prune_loop(prune_deps, prune_freq, prune_cancel));

    let firewall_enabled = config.firewall.enabled;
    let firewall_worker_deps = worker_deps.clone();
    let firewall_freq = parse_freq_seconds(&config.firewall.reconcile_freq, 300);
    let firewall_cancel = cancel.clone();
    let firewall_handle = tokio::spawn(async move {
        if !firewall_enabled {
            return;
        }
        run_firewall_loop(firewall_worker_deps, firewall_freq, firewall_cancel).await
    });

    signal::shutdown_on_signal(cancel.clone()).await;

    drop(job_tx);
    let _ = watcher_handle.await;
    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = schedule_handle.await;
    let _ = prune_handle.await;
    let _ = firewall_handle.await;

    tracing::info!("csbackupd stopped");
    Ok(())
}

fn parse_freq_seconds(_cron_expr: &str, fallback_secs: u64) -> Duration {
    // The cron-based reconcilers (schedule, prune, firewall sweeps) re-check
    // on a fixed poll tick rather than sleeping to the exact next cron
    // occurrence; `fallback_secs` is that tick. Per-volume backups use the
    // real `cron::Schedule` occurrence math in `schedule.rs`.
    Duration::from_secs(fallback_secs)
}

async fn run_prune_loop(deps: backup_agent_engine::prune::PruneDeps, interval: Duration, cancel: CancellationToken) {
    loop {
        if let Err(e) = guard::guarded("prune-sweep", run_prune_once(clone_prune_deps(&deps))).await {
            tracing::error!(error = %e, "prune sweep failed");
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

fn clone_prune_deps(deps: &backup_agent_engine::prune::PruneDeps) -> backup_agent_engine::prune::PruneDeps {
    backup_agent_engine::prune::PruneDeps {
        store: deps.store.clone(),
        containers: deps.containers.clone(),
        archive_tool: deps.archive_tool.clone(),
        hostname: deps.hostname.clone(),
    }
}

async fn run_prune_once(deps: backup_agent_engine::prune::PruneDeps) -> Result<(), backup_agent_core::AgentError> {
    backup_agent_engine::prune::prune_all(&deps).await
}

async fn run_firewall_loop(deps: Arc<worker::WorkerDeps>, interval: Duration, cancel: CancellationToken) {
    loop {
        if let Err(e) = worker::reconcile_firewall(&deps).await {
            tracing::error!(error = %e, "firewall reconcile sweep failed");
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Fans writes out to both the NAT and filter tables so the rest of the
/// daemon can treat packet-filter reconciliation as one facade. The two
/// chains live in different iptables tables (`nat`/`filter`), so a plain
/// `SystemPacketFilter` can only ever speak to one; this routes each call
/// by the chain name the caller asks for.
struct CombinedPacketFilter {
    nat: SystemPacketFilter,
    forward: SystemPacketFilter,
}

impl CombinedPacketFilter {
    fn new() -> Self {
        Self { nat: SystemPacketFilter::nat(), forward: SystemPacketFilter::filter() }
    }

    fn route(&self, chain: &str) -> &SystemPacketFilter {
        if chain == backup_agent_adapters::packet_filter::FORWARD_CHAIN {
            &self.forward
        } else {
            &self.nat
        }
    }
}

#[async_trait::async_trait]
impl backup_agent_adapters::packet_filter::PacketFilter for CombinedPacketFilter {
    async fn current_rules(&self, chain: &str) -> Result<Vec<String>, backup_agent_core::AgentError> {
        self.route(chain).current_rules(chain).await
    }

    async fn apply_rule(&self, line: &str) -> Result<(), backup_agent_core::AgentError> {
        let chain = line.split_whitespace().nth(1).unwrap_or_default();
        self.route(chain).apply_rule(line).await
    }

    async fn delete_rule(&self, applied_line: &str) -> Result<(), backup_agent_core::AgentError> {
        let chain = applied_line.split_whitespace().nth(1).unwrap_or_default();
        self.route(chain).delete_rule(applied_line).await
    }
}
