// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job entity — grounded on `original_source/types/job.go`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    #[serde(rename = "volume.backup")]
    VolumeBackup,
    #[serde(rename = "volume.restore")]
    VolumeRestore,
    #[serde(rename = "backup.delete")]
    BackupDelete,
    Firewall,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "volume")]
    pub volume_name: String,
    #[serde(default, rename = "source_volume")]
    pub source_volume_name: String,
    #[serde(default, rename = "archive")]
    pub archive_name: String,
    /// Deprecated in favor of strategy-specific restore behavior; only the
    /// file strategy still honors an override here.
    #[serde(default, rename = "file_paths")]
    pub file_paths: Vec<String>,
    #[serde(default, rename = "audit_id")]
    pub audit_id: i64,
    pub node: String,
}

impl Job {
    pub fn kind(&self) -> Option<JobKind> {
        match self.name.as_str() {
            "volume.backup" => Some(JobKind::VolumeBackup),
            "volume.restore" => Some(JobKind::VolumeRestore),
            "backup.delete" => Some(JobKind::BackupDelete),
            "firewall" => Some(JobKind::Firewall),
            _ => None,
        }
    }

    /// Consul key a queued job lives at: `borg/nodes/<host>/queue/<job-id>`.
    pub fn key(&self) -> String {
        crate::keys::job_key(&self.node, &self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_known_job_names() {
        let job = Job { name: "volume.backup".into(), ..Default::default() };
        assert_eq!(job.kind(), Some(JobKind::VolumeBackup));
    }

    #[test]
    fn unknown_job_name_has_no_kind() {
        let job = Job { name: "unknown.thing".into(), ..Default::default() };
        assert_eq!(job.kind(), None);
    }

    #[test]
    fn serializes_with_original_json_tags() {
        let job = Job {
            id: "j-1".into(),
            name: "volume.restore".into(),
            volume_name: "dest".into(),
            source_volume_name: "src".into(),
            archive_name: "auto-20260728T000000".into(),
            node: "host-a".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["volume"], "dest");
        assert_eq!(value["source_volume"], "src");
        assert_eq!(value["archive"], "auto-20260728T000000");
    }
}
