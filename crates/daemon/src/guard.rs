// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job crash isolation.
//!
//! `strategy::run_hook_commands` deliberately lets a panicking hook command
//! propagate instead of swallowing it (see engine's `strategy/mod.rs`). This
//! module is where that propagation is caught: each job body runs inside its
//! own `tokio::spawn`, so a panic unwinds that task alone and is reported as
//! a `JoinError` rather than taking down the worker loop or the daemon.

use backup_agent_core::AgentError;
use std::future::Future;

/// Runs `body` on its own task and turns a panic into an `AgentError`
/// instead of letting it propagate into the calling worker loop.
pub async fn guarded<F>(job_label: &str, body: F) -> Result<(), AgentError>
where
    F: Future<Output = Result<(), AgentError>> + Send + 'static,
{
    match tokio::spawn(body).await {
        Ok(result) => result,
        Err(join_err) => {
            tracing::error!(job = job_label, error = %join_err, "job task panicked");
            Err(AgentError::Config(format!("job {job_label} panicked: {join_err}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicking_body_is_reported_as_an_error_not_a_crash() {
        let result = guarded("test-job", async { panic!("boom") }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn normal_completion_passes_through() {
        let result = guarded("test-job", async { Ok(()) }).await;
        assert!(result.is_ok());
    }
}
