// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by every adapter and engine crate.
//!
//! One `thiserror` enum per layer, no stringly-typed errors crossing
//! crate boundaries, matching the `ConnectionError`/`ProtocolError`
//! pattern in `daemon::listener`/`daemon::protocol`.

use thiserror::Error;

/// Top-level error for every fallible operation in the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("coordination store: {0}")]
    Store(String),

    #[error("container engine: {0}")]
    Container(String),

    #[error("archive tool: {0}")]
    Archive(String),

    #[error("ssh remote: {0}")]
    SshRemote(String),

    #[error("packet filter: {0}")]
    PacketFilter(String),

    #[error("event log: {0}")]
    EventLog(String),

    #[error("volume {volume:?} not owned by this host (owned by {owner:?})")]
    ForeignOwnership { volume: String, owner: String },

    #[error("repository does not exist: {0}")]
    RepositoryMissing(String),

    #[error("archive not found: {0}")]
    ArchiveMissing(String),

    #[error("hook {hook} exited with code {code}: {detail}")]
    HookFailed { hook: String, code: i32, detail: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("job cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AgentError>;
