// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduled-job binding — grounded on `VolumeJob` in
//! `original_source/types/volume.go` and `backup/schedule.go`.

use serde::{Deserialize, Serialize};

/// The Consul-persisted record of a volume's current cron binding.
///
/// `entry_id` is an opaque in-process handle: cron entries are rebuilt
/// fresh on every daemon boot (the `cron` crate gives out new `JobId`s per
/// process), so this field is never read back across a restart — only the
/// `schedule` string carries real information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    #[serde(rename = "jid")]
    pub entry_id: String,
    pub schedule: String,
}

impl ScheduledJob {
    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }

    /// Consul key: `borg/nodes/<host>/schedules/<volume>`.
    pub fn key(host: &str, volume: &str) -> String {
        crate::keys::schedule_key(host, volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binding_is_empty() {
        assert!(ScheduledJob::default().is_empty());
    }

    #[test]
    fn non_empty_schedule_is_not_empty() {
        let binding = ScheduledJob { entry_id: "1".into(), schedule: "0 3 * * *".into() };
        assert!(!binding.is_empty());
    }
}
