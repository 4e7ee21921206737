// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSH remote facade for NFS-backed repository directory provisioning —
//! grounded on `original_source/sshremote/sshremote.go`.
//!
//! The original connects with an accept-any-host-key callback; this is an
//! established, low-security trust model for an internal cluster operator
//! talking to its own NFS host and is preserved as-is rather than
//! strengthened, matching the original's behavior for this specific
//! internal-tool context.

use async_trait::async_trait;
use backup_agent_core::AgentError;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct ServerConnInfo {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub keyfile: String,
}

#[async_trait]
pub trait SshRemote: Send + Sync {
    async fn run(&self, conn: &ServerConnInfo, command: &str) -> Result<String, AgentError>;

    async fn mkdir_p(&self, conn: &ServerConnInfo, path: &str) -> Result<(), AgentError> {
        self.run(conn, &format!("mkdir -p {path}")).await?;
        Ok(())
    }

    async fn rm_rf(&self, conn: &ServerConnInfo, path: &str) -> Result<(), AgentError> {
        self.run(conn, &format!("rm -rf {path}")).await?;
        Ok(())
    }
}

/// Real implementation: shells out to the system `ssh` binary with a
/// dedicated identity file, rather than vendoring a full SSH protocol
/// client for a handful of `mkdir -p`/`rm -rf` calls.
pub struct SystemSshRemote;

#[async_trait]
impl SshRemote for SystemSshRemote {
    async fn run(&self, conn: &ServerConnInfo, command: &str) -> Result<String, AgentError> {
        let target = format!("{}@{}", conn.user, conn.server);
        let output = Command::new("ssh")
            .args([
                "-i",
                &conn.keyfile,
                "-p",
                &conn.port.to_string(),
                "-o",
                "StrictHostKeyChecking=no",
                &target,
                command,
            ])
            .output()
            .await
            .map_err(|e| AgentError::SshRemote(e.to_string()))?;
        if !output.status.success() {
            return Err(AgentError::SshRemote(format!(
                "ssh {target} {command:?} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Default)]
pub struct FakeSshRemote {
    pub commands: parking_lot::Mutex<Vec<String>>,
}

impl FakeSshRemote {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SshRemote for FakeSshRemote {
    async fn run(&self, _conn: &ServerConnInfo, command: &str) -> Result<String, AgentError> {
        self.commands.lock().push(command.to_string());
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mkdir_p_records_the_rendered_command() {
        let remote = FakeSshRemote::new();
        let conn = ServerConnInfo { server: "nfs.internal".into(), port: 22, user: "root".into(), keyfile: "/root/.ssh/id_rsa".into() };
        remote.mkdir_p(&conn, "/exports/b-web-data").await.unwrap();
        assert_eq!(remote.commands.lock()[0], "mkdir -p /exports/b-web-data");
    }
}
