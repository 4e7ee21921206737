// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration — grounded on `original_source/main.go`'s
//! `configureApp()`, which seeds every setting below as a `viper.SetDefault`
//! and then overlays a YAML config file on top. This loads the YAML file the
//! same way, via `serde_yaml_ng`, with every section defaulting independently
//! so a config file only needs to mention what it overrides.

use backup_agent_core::AgentError;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    pub address: String,
    pub token: Option<String>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self { address: "http://127.0.0.1:8500".into(), token: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub numworkers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { numworkers: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BorgConfig {
    pub compression: String,
    pub lock_wait: u32,
    pub image: String,
    pub nfs: bool,
    pub nfs_server: String,
    pub nfs_export_root: String,
    pub nfs_ssh: NfsSshConfig,
}

impl Default for BorgConfig {
    fn default() -> Self {
        Self {
            compression: "zstd,3".into(),
            lock_wait: 1,
            image: "computestacks/borg:latest".into(),
            nfs: false,
            nfs_server: String::new(),
            nfs_export_root: "/exports".into(),
            nfs_ssh: NfsSshConfig::default(),
        }
    }
}

/// Mirrors the original's `nfs_ssh.port`/`nfs_ssh.user`/`nfs_ssh.keyfile`
/// viper keys, used to reach the NFS host when tearing down a trashed
/// repository's remote directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NfsSshConfig {
    pub port: u16,
    pub user: String,
    pub keyfile: String,
}

impl Default for NfsSshConfig {
    fn default() -> Self {
        Self { port: 22, user: "root".into(), keyfile: "/etc/csbackupd/id_rsa".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupsConfig {
    pub check_freq: String,
    pub prune_freq: String,
    /// Placeholder encryption key reference; the real secret is expected to
    /// be supplied out-of-band (environment, secrets mount), never committed
    /// to the config file itself.
    pub key: String,
    pub borg: BorgConfig,
}

impl Default for BackupsConfig {
    fn default() -> Self {
        Self {
            check_freq: "* * * * *".into(),
            prune_freq: "15 1 * * *".into(),
            key: "changeme".into(),
            borg: BorgConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub base_url: String,
    pub token: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { base_url: String::new(), token: String::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    pub enabled: bool,
    pub overlay_driver: String,
    pub reconcile_freq: String,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self { enabled: true, overlay_driver: "calico-node".into(), reconcile_freq: "*/5 * * * *".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub node: String,
    pub consul: ConsulConfig,
    pub queue: QueueConfig,
    pub backups: BackupsConfig,
    pub events: EventsConfig,
    pub firewall: FirewallConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node: String::new(),
            consul: ConsulConfig::default(),
            queue: QueueConfig::default(),
            backups: BackupsConfig::default(),
            events: EventsConfig::default(),
            firewall: FirewallConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads `path` if it exists, overlaying onto the defaults above; a
    /// missing file is not an error, matching viper's behavior of falling
    /// back entirely to defaults when no config file is present.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => serde_yaml_ng::from_str(&raw).map_err(|e| AgentError::Config(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AgentConfig::default(),
            Err(e) => return Err(AgentError::Config(e.to_string())),
        };
        if config.node.is_empty() {
            config.node = system_hostname();
        }
        Ok(config)
    }
}

/// Shells to `hostname` rather than adding a dedicated crate dependency for
/// a single startup call, consistent with how this agent already shells to
/// `ssh` and `iptables` for narrow, infrequent system calls.
fn system_hostname() -> String {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AgentConfig::load(Path::new("/nonexistent/csbackupd.yaml")).unwrap();
        assert_eq!(config.queue.numworkers, 3);
        assert_eq!(config.backups.check_freq, "* * * * *");
        assert!(!config.node.is_empty());
    }

    #[test]
    fn partial_yaml_overlays_onto_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("csbackupd.yaml");
        std::fs::write(&path, "node: host-a\nqueue:\n  numworkers: 7\n").unwrap();
        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.node, "host-a");
        assert_eq!(config.queue.numworkers, 7);
        assert_eq!(config.backups.borg.compression, "zstd,3");
    }
}
