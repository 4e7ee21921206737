// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scoped acquisition of the repository sidecar container — grounded on
//! `original_source/backup/borg/container.go`'s `InitBackupContainer` and
//! the always-deferred stop visible throughout `backup.go`/`restore.go`.
//!
//! Cleanup is expressed as a plain `async fn` that stops the container on
//! every exit path of its body, not as a `Drop` impl: `Drop` cannot await,
//! so a finaliser-style guard would either block or leak the stop call.

use backup_agent_adapters::container::{ContainerEngine, ContainerHandle, ContainerSpec};
use backup_agent_core::AgentError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Up to 11 successful readiness checks are attempted (the 12th iteration
/// never runs a check — it is the failure boundary), matching the
/// original's `for counter := 1; counter < 12; counter++` loop exactly.
const MAX_READY_ATTEMPTS: u32 = 11;

/// If `is_running` itself errors (not just reports not-ready) more than
/// twice, stop polling early rather than spending the full budget on a
/// daemon that is unreachable.
const MAX_INSPECT_FAILURES: u32 = 3;

pub struct SidecarOutcome<T> {
    pub value: T,
}

/// Creates and starts `spec`, polls until the container reports running,
/// runs `body` against the resulting handle, then unconditionally stops
/// the container — regardless of whether `body` succeeded, failed, or the
/// readiness poll itself failed after the container was already created.
pub async fn with_sidecar<F, Fut, T>(
    containers: Arc<dyn ContainerEngine>,
    spec: ContainerSpec,
    body: F,
) -> Result<T, AgentError>
where
    F: FnOnce(ContainerHandle) -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    containers.pull_image_if_missing(&spec.image).await?;
    let handle = containers.create_and_start(spec).await?;
    let ready = wait_ready(&*containers, &handle).await;
    let result = match ready {
        Ok(()) => body(handle.clone()).await,
        Err(e) => Err(e),
    };
    if let Err(stop_err) = containers.stop(&handle).await {
        tracing::warn!(error = %stop_err, container = %handle.id, "failed to stop sidecar container");
    }
    result
}

async fn wait_ready(containers: &dyn ContainerEngine, handle: &ContainerHandle) -> Result<(), AgentError> {
    let mut inspect_failures = 0u32;
    for attempt in 1..=MAX_READY_ATTEMPTS {
        match containers.is_running(handle).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                inspect_failures += 1;
                if inspect_failures > MAX_INSPECT_FAILURES - 1 {
                    return Err(e);
                }
            }
        }
        if attempt < MAX_READY_ATTEMPTS {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    Err(AgentError::Container(format!("sidecar {} never became ready", handle.id)))
}
