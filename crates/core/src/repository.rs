// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Derived repository index — grounded on
//! `original_source/backup/borg/consul_repository.go`.

use serde::{Deserialize, Serialize};

/// The derived, Consul-persisted index over a borg repository's contents.
/// Rebuilt from `borg info`/`borg list` output after every mutating
/// operation (`SyncConsul` in the original).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    pub name: String,
    #[serde(default, rename = "usage", skip_serializing_if = "Option::is_none")]
    pub size_on_disk: Option<i64>,
    #[serde(default, rename = "size", skip_serializing_if = "Option::is_none")]
    pub total_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub archives: Vec<String>,
}

impl RepositoryIndex {
    pub fn empty(name: impl Into<String>) -> Self {
        Self { name: name.into(), size_on_disk: None, total_size: None, archives: Vec::new() }
    }

    pub fn contains(&self, archive: &str) -> bool {
        self.archives.iter().any(|a| a == archive)
    }

    /// Consul key: `borg/repository/<name>`.
    pub fn key(name: &str) -> String {
        crate::keys::repository_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_index_has_no_archives() {
        let idx = RepositoryIndex::empty("b-web-data");
        assert!(!idx.contains("auto-1"));
    }

    #[test]
    fn omits_absent_size_fields_when_serialized() {
        let idx = RepositoryIndex::empty("b-web-data");
        let value = serde_json::to_value(&idx).unwrap();
        assert!(value.get("usage").is_none());
        assert!(value.get("size").is_none());
    }
}
