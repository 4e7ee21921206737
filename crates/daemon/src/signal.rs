// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shutdown signal handling — grounded on `original_source/main.go`'s
//! `captureExit`, which calls `os.Exit(0)` directly from the signal handler
//! and races any in-flight job against process teardown. This instead
//! cancels a shared `CancellationToken`: workers finish their current job,
//! the watcher and schedule reconciler stop polling, and `main` joins every
//! task before the process exits.

use tokio_util::sync::CancellationToken;

/// Resolves once SIGINT or SIGTERM is received (Ctrl-C on any platform,
/// plus SIGTERM on Unix where the fleet's process supervisor sends it).
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sigterm) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            std::future::pending::<()>().await;
            return;
        };
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

/// Cancels `token` once a shutdown signal arrives.
pub async fn shutdown_on_signal(token: CancellationToken) {
    wait_for_shutdown_signal().await;
    token.cancel();
}
