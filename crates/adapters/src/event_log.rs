// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-log HTTP client — grounded on `original_source/csevent/csevent.go`.
//! Failures here must never block a backup/restore job; every method
//! degrades silently and logs via `tracing` instead of propagating.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct EventCreate {
    pub project_id: i64,
    pub service_id: i64,
    pub message: String,
}

#[async_trait]
pub trait EventLogClient: Send + Sync {
    /// Creates a running event, returning its id (0 if the call failed —
    /// callers must treat 0 as "no event", never as a real id).
    async fn create(&self, event: EventCreate) -> i64;

    /// Appends a detail message to an in-progress event. No-op if `id == 0`
    /// or `message` is empty.
    async fn update(&self, id: i64, message: &str);

    /// Flips the event to completed and clears its detail buffer.
    async fn close(&self, id: i64);
}

pub struct HttpEventLogClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpEventLogClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl EventLogClient for HttpEventLogClient {
    async fn create(&self, event: EventCreate) -> i64 {
        let url = format!("{}/api/system/events", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&event)
            .send()
            .await;
        match resp {
            Ok(resp) => resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v["id"].as_i64())
                .unwrap_or(0),
            Err(e) => {
                tracing::warn!(error = %e, "event log create failed, continuing without event tracking");
                0
            }
        }
    }

    async fn update(&self, id: i64, message: &str) {
        if id == 0 || message.is_empty() {
            return;
        }
        let url = format!("{}/api/system/events/{id}", self.base_url.trim_end_matches('/'));
        if let Err(e) = self
            .client
            .patch(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "detail": message }))
            .send()
            .await
        {
            tracing::warn!(error = %e, event_id = id, "event log update failed");
        }
    }

    async fn close(&self, id: i64) {
        if id == 0 {
            return;
        }
        let url = format!("{}/api/system/events/{id}", self.base_url.trim_end_matches('/'));
        if let Err(e) = self
            .client
            .patch(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "status": "completed", "detail": "" }))
            .send()
            .await
        {
            tracing::warn!(error = %e, event_id = id, "event log close failed");
        }
    }
}

#[derive(Default)]
pub struct FakeEventLogClient {
    next_id: std::sync::atomic::AtomicI64,
    pub updates: parking_lot::Mutex<Vec<(i64, String)>>,
    pub closed: parking_lot::Mutex<Vec<i64>>,
}

impl FakeEventLogClient {
    pub fn new() -> Self {
        Self { next_id: std::sync::atomic::AtomicI64::new(1), ..Default::default() }
    }
}

#[async_trait]
impl EventLogClient for FakeEventLogClient {
    async fn create(&self, _event: EventCreate) -> i64 {
        self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    async fn update(&self, id: i64, message: &str) {
        if id == 0 || message.is_empty() {
            return;
        }
        self.updates.lock().push((id, message.to_string()));
    }

    async fn close(&self, id: i64) {
        if id == 0 {
            return;
        }
        self.closed.lock().push(id);
    }
}

/// A no-op client for contexts with no configured event-log endpoint.
pub struct NoopEventLogClient;

#[async_trait]
impl EventLogClient for NoopEventLogClient {
    async fn create(&self, _event: EventCreate) -> i64 {
        0
    }
    async fn update(&self, _id: i64, _message: &str) {}
    async fn close(&self, _id: i64) {}
}

pub type SharedEventLogClient = Arc<dyn EventLogClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_is_ignored_for_id_zero() {
        let client = FakeEventLogClient::new();
        client.update(0, "hello").await;
        assert!(client.updates.lock().is_empty());
    }

    #[tokio::test]
    async fn create_then_close_records_the_id() {
        let client = FakeEventLogClient::new();
        let id = client.create(EventCreate { project_id: 1, service_id: 2, message: "m".into() }).await;
        client.close(id).await;
        assert_eq!(*client.closed.lock(), vec![id]);
    }
}
