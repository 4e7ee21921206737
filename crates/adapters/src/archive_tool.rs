// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive tool facade: runs `borg` inside the repository sidecar container
//! and parses its line-delimited JSON protocol — grounded on
//! `original_source/backup/borg/responder.go` and `archive.go`.

use crate::container::{ContainerEngine, ContainerHandle};
use async_trait::async_trait;
use backup_agent_core::archive::{ArchiveStats, LogLine};
use backup_agent_core::volume::Retention;
use backup_agent_core::AgentError;
use std::sync::Arc;

pub use crate::container::ExecOutcome;

/// Splits a raw borg `--log-json` stream into individual JSON lines.
///
/// Borg does not guarantee a trailing newline between objects under every
/// version, so splitting must re-synchronize on `"\n{"` rather than trusting
/// `.lines()` — this mirrors `responder.go`'s `strings.Split(out, "\n{")`
/// plus re-prepending the stripped `{`.
pub fn split_ldjson(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split("\n{")
        .enumerate()
        .map(|(i, part)| if i == 0 { part.to_string() } else { format!("{{{part}") })
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// Parses each line as a [`LogLine`], dropping lines that fail to parse
/// (non-JSON borg banner text) and short-circuiting on the first line that
/// represents a real error (not ignorable and not an informational message).
pub fn first_error_line(raw: &str) -> Option<LogLine> {
    split_ldjson(raw).into_iter().find_map(|line| {
        let parsed: LogLine = serde_json::from_str(&line).ok()?;
        if parsed.is_ignorable() {
            return None;
        }
        if parsed.msg_type == "log_message" && parsed.levelname.eq_ignore_ascii_case("error") {
            Some(parsed)
        } else {
            None
        }
    })
}

#[async_trait]
pub trait ArchiveTool: Send + Sync {
    async fn init(&self, sidecar: &ContainerHandle) -> Result<(), AgentError>;
    async fn create(&self, sidecar: &ContainerHandle, archive: &str, paths: &[String]) -> Result<(), AgentError>;
    async fn restore(&self, sidecar: &ContainerHandle, archive: &str, paths: &[String]) -> Result<(), AgentError>;
    async fn info(&self, sidecar: &ContainerHandle) -> Result<ArchiveStats, AgentError>;
    async fn list_archives(&self, sidecar: &ContainerHandle) -> Result<Vec<String>, AgentError>;
    async fn delete(&self, sidecar: &ContainerHandle, archive: &str) -> Result<(), AgentError>;
    async fn prune(&self, sidecar: &ContainerHandle, retention: &Retention) -> Result<(), AgentError>;
}

/// Real implementation: shells `borg` commands into the sidecar via the
/// container engine's `exec` and parses the LDJSON response.
pub struct BorgArchiveTool {
    containers: Arc<dyn ContainerEngine>,
    lock_wait_secs: u32,
}

impl BorgArchiveTool {
    pub fn new(containers: Arc<dyn ContainerEngine>, lock_wait_secs: u32) -> Self {
        Self { containers, lock_wait_secs }
    }

    async fn run(&self, sidecar: &ContainerHandle, cmd: &str) -> Result<String, AgentError> {
        let outcome = self.containers.exec(sidecar, cmd).await?;
        if let Some(err) = first_error_line(&outcome.stdout) {
            return Err(AgentError::Archive(err.message));
        }
        if !outcome.success() {
            return Err(AgentError::Archive(format!(
                "borg exited with code {}: {}",
                outcome.exit_code, outcome.stderr
            )));
        }
        Ok(outcome.stdout)
    }
}

#[async_trait]
impl ArchiveTool for BorgArchiveTool {
    async fn init(&self, sidecar: &ContainerHandle) -> Result<(), AgentError> {
        self.run(
            sidecar,
            &format!("borg init --lock-wait {} --encryption=repokey-blake2 ::", self.lock_wait_secs),
        )
        .await?;
        Ok(())
    }

    async fn create(&self, sidecar: &ContainerHandle, archive: &str, paths: &[String]) -> Result<(), AgentError> {
        let target_paths = if paths.is_empty() { "/mnt/data".to_string() } else { paths.join(" ") };
        self.run(
            sidecar,
            &format!(
                "borg create --lock-wait {} --log-json --compression zstd,3 ::{} {}",
                self.lock_wait_secs, archive, target_paths
            ),
        )
        .await?;
        Ok(())
    }

    async fn restore(&self, sidecar: &ContainerHandle, archive: &str, paths: &[String]) -> Result<(), AgentError> {
        let target_paths = paths.join(" ");
        self.run(
            sidecar,
            &format!(
                "borg extract --lock-wait {} --log-json ::{} {}",
                self.lock_wait_secs, archive, target_paths
            ),
        )
        .await?;
        Ok(())
    }

    async fn info(&self, sidecar: &ContainerHandle) -> Result<ArchiveStats, AgentError> {
        let raw = self
            .run(sidecar, &format!("borg info --lock-wait {} --json ::", self.lock_wait_secs))
            .await?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| AgentError::Archive(e.to_string()))?;
        let stats = &value["cache"]["stats"];
        serde_json::from_value(stats.clone()).map_err(|e| AgentError::Archive(e.to_string()))
    }

    async fn list_archives(&self, sidecar: &ContainerHandle) -> Result<Vec<String>, AgentError> {
        let raw = self
            .run(sidecar, &format!("borg list --lock-wait {} --json ::", self.lock_wait_secs))
            .await?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| AgentError::Archive(e.to_string()))?;
        let archives = value["archives"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| a["name"].as_str().map(str::to_string))
            .collect();
        Ok(archives)
    }

    async fn delete(&self, sidecar: &ContainerHandle, archive: &str) -> Result<(), AgentError> {
        self.run(
            sidecar,
            &format!("borg delete --lock-wait {} --log-json ::{}", self.lock_wait_secs, archive),
        )
        .await?;
        Ok(())
    }

    async fn prune(&self, sidecar: &ContainerHandle, retention: &Retention) -> Result<(), AgentError> {
        self.run(
            sidecar,
            &format!(
                "borg prune --lock-wait {} --log-json --prefix=\"auto-\" --keep-hourly={} --keep-daily={} --keep-weekly={} --keep-monthly={} --keep-yearly={} ::",
                self.lock_wait_secs,
                retention.hourly,
                retention.daily,
                retention.weekly,
                retention.monthly,
                retention.annual,
            ),
        )
        .await?;
        Ok(())
    }
}

/// Scripted double: each call pops a pre-programmed result in FIFO order.
#[derive(Default)]
pub struct FakeArchiveTool {
    archives: parking_lot::Mutex<Vec<String>>,
    fail_next_create: std::sync::atomic::AtomicBool,
}

impl FakeArchiveTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn seed_archives(&self, archives: Vec<String>) {
        *self.archives.lock() = archives;
    }
}

#[async_trait]
impl ArchiveTool for FakeArchiveTool {
    async fn init(&self, _sidecar: &ContainerHandle) -> Result<(), AgentError> {
        Ok(())
    }

    async fn create(&self, _sidecar: &ContainerHandle, archive: &str, _paths: &[String]) -> Result<(), AgentError> {
        if self.fail_next_create.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(AgentError::Archive("simulated create failure".into()));
        }
        self.archives.lock().push(archive.to_string());
        Ok(())
    }

    async fn restore(&self, _sidecar: &ContainerHandle, archive: &str, _paths: &[String]) -> Result<(), AgentError> {
        if !self.archives.lock().iter().any(|a| a == archive) {
            return Err(AgentError::ArchiveMissing(archive.to_string()));
        }
        Ok(())
    }

    async fn info(&self, _sidecar: &ContainerHandle) -> Result<ArchiveStats, AgentError> {
        Ok(ArchiveStats::default())
    }

    async fn list_archives(&self, _sidecar: &ContainerHandle) -> Result<Vec<String>, AgentError> {
        Ok(self.archives.lock().clone())
    }

    async fn delete(&self, _sidecar: &ContainerHandle, archive: &str) -> Result<(), AgentError> {
        self.archives.lock().retain(|a| a != archive);
        Ok(())
    }

    async fn prune(&self, _sidecar: &ContainerHandle, _retention: &Retention) -> Result<(), AgentError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_ldjson_resynchronizes_on_brace_boundary() {
        let raw = r#"{"type":"log_message","msgid":"x"}
{"type":"archive_progress"}"#;
        let lines = split_ldjson(raw);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with('{'));
    }

    #[test]
    fn first_error_line_ignores_question_prompts() {
        let raw = r#"{"type":"log_message","msgid":"question_prompt","levelname":"error","message":"ignored"}
{"type":"log_message","levelname":"error","message":"real failure"}"#;
        let found = first_error_line(raw).unwrap();
        assert_eq!(found.message, "real failure");
    }

    #[tokio::test]
    async fn fake_restore_fails_for_unknown_archive() {
        let tool = FakeArchiveTool::new();
        let handle = ContainerHandle { id: "sidecar".into() };
        let err = tool.restore(&handle, "missing", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::ArchiveMissing(_)));
    }
}
