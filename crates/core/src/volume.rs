// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Volume entity — grounded on `original_source/types/volume.go`.

use serde::{Deserialize, Serialize};

/// Retention counts, one per borg `--keep-*` bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    #[serde(rename = "keep_hourly")]
    pub hourly: i32,
    #[serde(rename = "keep_daily")]
    pub daily: i32,
    #[serde(rename = "keep_weekly")]
    pub weekly: i32,
    #[serde(rename = "keep_monthly")]
    pub monthly: i32,
    #[serde(rename = "keep_annually")]
    pub annual: i32,
}

/// Which backup strategy module governs hooks and file selection for a volume.
///
/// Closed enum, dispatched by value rather than `dyn Trait` — see DESIGN.md
/// "Strategy dispatch".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    File,
    Mysql,
    Mariadb,
    Postgres,
}

impl Default for Strategy {
    fn default() -> Self {
        // The original treats an absent/empty `strategy` field as the
        // plain file-copy strategy.
        Strategy::File
    }
}

impl Strategy {
    pub fn from_field(raw: &str) -> Self {
        match raw {
            "mysql" => Strategy::Mysql,
            "mariadb" => Strategy::Mariadb,
            "postgres" => Strategy::Postgres,
            _ => Strategy::File,
        }
    }

    /// Only the file strategy honors job-level `file_paths` overrides during
    /// restore; database strategies always restore the full dump directory.
    pub fn honors_file_paths(self) -> bool {
        matches!(self, Strategy::File)
    }

    pub fn is_mysql_family(self) -> bool {
        matches!(self, Strategy::Mysql | Strategy::Mariadb)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: i64,
    pub name: String,
    pub node: String,
    #[serde(default)]
    pub backup: bool,
    #[serde(default)]
    pub freq: String,
    #[serde(default)]
    pub retention: Retention,
    #[serde(default, rename = "last_backup")]
    pub last_backup: i64,
    #[serde(default, rename = "project_id")]
    pub project_id: i64,
    #[serde(default, rename = "service_id")]
    pub service_id: i64,
    #[serde(default)]
    pub trash: bool,
    #[serde(default)]
    pub strategy: String,
    #[serde(default, rename = "pre_backup")]
    pub pre_backup: Vec<String>,
    #[serde(default, rename = "post_backup")]
    pub post_backup: Vec<String>,
    #[serde(default, rename = "pre_restore")]
    pub pre_restore: Vec<String>,
    #[serde(default, rename = "post_restore")]
    pub post_restore: Vec<String>,
    #[serde(default, rename = "rollback_restore")]
    pub rollback_restore: Vec<String>,
    #[serde(default, rename = "backup_error_cont")]
    pub backup_continue_on_error: bool,
    #[serde(default, rename = "restore_error_cont")]
    pub restore_continue_on_error: bool,
}

impl Volume {
    pub fn strategy(&self) -> Strategy {
        Strategy::from_field(&self.strategy)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Consul key this volume record lives at: `borg/nodes/<host>/<name>`.
    pub fn key(host: &str, name: &str) -> String {
        crate::keys::volume_key(host, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_defaults_to_file_for_empty_field() {
        let vol = Volume { strategy: String::new(), ..Default::default() };
        assert_eq!(vol.strategy(), Strategy::File);
        assert!(vol.strategy().honors_file_paths());
    }

    #[test]
    fn mysql_and_mariadb_are_the_mysql_family() {
        assert!(Strategy::Mysql.is_mysql_family());
        assert!(Strategy::Mariadb.is_mysql_family());
        assert!(!Strategy::Postgres.is_mysql_family());
    }

    #[test]
    fn round_trips_through_json_with_original_field_names() {
        let raw = serde_json::json!({
            "id": 7,
            "name": "web-data",
            "node": "host-a",
            "backup": true,
            "freq": "0 3 * * *",
            "retention": {"keep_hourly": 0, "keep_daily": 7, "keep_weekly": 4, "keep_monthly": 6, "keep_annually": 1},
            "last_backup": 0,
            "project_id": 1,
            "service_id": 2,
            "trash": false,
            "strategy": "postgres",
            "backup_error_cont": true,
            "restore_error_cont": false,
        });
        let vol: Volume = serde_json::from_value(raw).unwrap();
        assert_eq!(vol.name, "web-data");
        assert_eq!(vol.strategy(), Strategy::Postgres);
        assert_eq!(vol.retention.daily, 7);
        assert!(vol.backup_continue_on_error);
    }
}
