// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive entity and LDJSON response types — grounded on
//! `original_source/backup/borg/types.go` and `responder.go`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub name: String,
    pub repository: String,
}

impl Archive {
    /// The borg archive path fragment: `::<name>` (repo comes from the
    /// sidecar container's mounted cwd, not from this string).
    pub fn path_fragment(&self) -> String {
        format!("::{}", self.name)
    }
}

/// Aggregate size stats parsed from a borg `info --json` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStats {
    pub total_chunks: i64,
    pub total_csize: i64,
    pub total_size: i64,
    pub total_unique_chunks: i64,
    pub unique_csize: i64,
    pub unique_size: i64,
}

/// One line of the archive tool's line-delimited JSON protocol.
///
/// The sidecar process emits a stream of JSON objects separated by bare
/// newlines. Dispatch is by the presence of a `msgid` field (a log/progress
/// line) versus its absence (a terminal response object) — see
/// `responder.go`'s `readRepoResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(default)]
    pub time: String,
    #[serde(rename = "type", default)]
    pub msg_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub msgid: Option<String>,
    #[serde(default)]
    pub levelname: String,
    #[serde(default)]
    pub name: String,
}

impl LogLine {
    /// Progress/question chatter to ignore, never a terminal error.
    pub fn is_ignorable(&self) -> bool {
        matches!(self.msgid.as_deref(), Some("question_env_answer") | Some("question_prompt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_fragment_has_double_colon_prefix() {
        let archive = Archive { name: "auto-1".into(), repository: "b-web".into() };
        assert_eq!(archive.path_fragment(), "::auto-1");
    }

    #[test]
    fn ignorable_lines_are_question_chatter_only() {
        let question = LogLine { msgid: Some("question_prompt".into()), ..blank() };
        let real_error = LogLine { msgid: Some("archiver.error".into()), ..blank() };
        assert!(question.is_ignorable());
        assert!(!real_error.is_ignorable());
    }

    fn blank() -> LogLine {
        LogLine {
            time: String::new(),
            msg_type: String::new(),
            message: String::new(),
            msgid: None,
            levelname: String::new(),
            name: String::new(),
        }
    }
}
