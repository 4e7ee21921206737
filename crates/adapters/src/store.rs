// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination store facade over the Consul HTTP KV API — grounded on
//! `original_source/cnslclient/cnslclient.go` and the `kv.Get`/`kv.Put`/
//! `kv.Keys` blocking-query usage in `original_source/job/job.go`.

use async_trait::async_trait;
use backup_agent_core::AgentError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// One KV entry plus its Consul modify-index, used to detect concurrent
/// writes and to resume a blocking query from where it left off.
#[derive(Debug, Clone)]
pub struct KvEntry {
    pub value: Vec<u8>,
    pub mod_index: u64,
}

/// Result of a blocking (long-poll) read: either the index advanced and a
/// (possibly absent) value is returned, or the wait timed out with no change.
#[derive(Debug, Clone)]
pub struct BlockingResult {
    pub entry: Option<KvEntry>,
    pub index: u64,
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, AgentError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), AgentError>;
    async fn delete(&self, key: &str) -> Result<(), AgentError>;
    async fn delete_tree(&self, prefix: &str) -> Result<(), AgentError>;
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, AgentError>;

    /// Long-poll for a change to `key` since `wait_index`. `consistent`
    /// requests a leader-routed strongly-consistent read (used for the
    /// ownership check before a destructive operation); otherwise a stale
    /// read is acceptable (used by the watcher's steady-state poll).
    async fn blocking_get(
        &self,
        key: &str,
        wait_index: u64,
        consistent: bool,
        wait: Duration,
    ) -> Result<BlockingResult, AgentError>;
}

/// Real Consul client, talking to `GET/PUT/DELETE /v1/kv/<key>` over HTTP.
pub struct ConsulStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ConsulStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), token }
    }

    fn url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base_url.trim_end_matches('/'), key)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("X-Consul-Token", token),
            None => builder,
        }
    }
}

#[derive(serde::Deserialize)]
struct RawKvEntry {
    #[serde(rename = "Value")]
    value: Option<String>,
    #[serde(rename = "ModifyIndex")]
    mod_index: u64,
}

#[async_trait]
impl CoordinationStore for ConsulStore {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, AgentError> {
        let resp = self
            .request(self.client.get(self.url(key)))
            .send()
            .await
            .map_err(|e| AgentError::Store(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entries: Vec<RawKvEntry> =
            resp.json().await.map_err(|e| AgentError::Store(e.to_string()))?;
        decode_first(entries)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), AgentError> {
        self.request(self.client.put(self.url(key)))
            .body(value)
            .send()
            .await
            .map_err(|e| AgentError::Store(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AgentError> {
        self.request(self.client.delete(self.url(key)))
            .send()
            .await
            .map_err(|e| AgentError::Store(e.to_string()))?;
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<(), AgentError> {
        self.request(self.client.delete(self.url(prefix)))
            .query(&[("recurse", "true")])
            .send()
            .await
            .map_err(|e| AgentError::Store(e.to_string()))?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, AgentError> {
        let resp = self
            .request(self.client.get(self.url(prefix)))
            .query(&[("keys", "true")])
            .send()
            .await
            .map_err(|e| AgentError::Store(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        resp.json().await.map_err(|e| AgentError::Store(e.to_string()))
    }

    async fn blocking_get(
        &self,
        key: &str,
        wait_index: u64,
        consistent: bool,
        wait: Duration,
    ) -> Result<BlockingResult, AgentError> {
        let mut req = self
            .request(self.client.get(self.url(key)))
            .query(&[("index", wait_index.to_string()), ("wait", format!("{}s", wait.as_secs()))]);
        req = if consistent { req.query(&[("consistent", "true")]) } else { req.query(&[("stale", "true")]) };
        let resp = req.send().await.map_err(|e| AgentError::Store(e.to_string()))?;
        let index = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(wait_index);
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(BlockingResult { entry: None, index });
        }
        let entries: Vec<RawKvEntry> =
            resp.json().await.map_err(|e| AgentError::Store(e.to_string()))?;
        Ok(BlockingResult { entry: decode_first(entries)?, index })
    }
}

fn decode_first(entries: Vec<RawKvEntry>) -> Result<Option<KvEntry>, AgentError> {
    let Some(raw) = entries.into_iter().next() else { return Ok(None) };
    let Some(encoded) = raw.value else { return Ok(Some(KvEntry { value: Vec::new(), mod_index: raw.mod_index })) };
    let decoded = base64_decode(&encoded).map_err(|e| AgentError::Store(e))?;
    Ok(Some(KvEntry { value: decoded, mod_index: raw.mod_index }))
}

/// Consul base64-encodes KV values; avoid a dedicated `base64` dependency
/// for a single decode call by doing it inline.
fn base64_decode(input: &str) -> Result<Vec<u8>, String> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut table = [255u8; 256];
    for (i, &b) in ALPHABET.iter().enumerate() {
        table[b as usize] = i as u8;
    }
    let clean: Vec<u8> = input.bytes().filter(|&b| b != b'=' && !b.is_ascii_whitespace()).collect();
    let mut out = Vec::with_capacity(clean.len() * 3 / 4);
    for chunk in clean.chunks(4) {
        let mut buf = [0u8; 4];
        for (i, &c) in chunk.iter().enumerate() {
            let v = table[c as usize];
            if v == 255 {
                return Err(format!("invalid base64 byte {c}"));
            }
            buf[i] = v;
        }
        out.push((buf[0] << 2) | (buf[1] >> 4));
        if chunk.len() > 2 {
            out.push((buf[1] << 4) | (buf[2] >> 2));
        }
        if chunk.len() > 3 {
            out.push((buf[2] << 6) | buf[3]);
        }
    }
    Ok(out)
}

/// In-memory double used throughout adapter/engine/daemon tests.
#[cfg_attr(not(any(test, feature = "test-support")), allow(dead_code))]
pub struct FakeCoordinationStore {
    inner: Arc<parking_lot::Mutex<HashMap<String, KvEntry>>>,
    index: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl Default for FakeCoordinationStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            index: Arc::new(AtomicU64::new(1)),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl FakeCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for FakeCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, AgentError> {
        Ok(self.inner.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), AgentError> {
        let mod_index = self.index.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.lock().insert(key.to_string(), KvEntry { value, mod_index });
        self.notify.notify_waiters();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AgentError> {
        self.inner.lock().remove(key);
        self.index.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<(), AgentError> {
        self.inner.lock().retain(|k, _| !k.starts_with(prefix));
        self.index.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, AgentError> {
        Ok(self.inner.lock().keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    async fn blocking_get(
        &self,
        key: &str,
        wait_index: u64,
        _consistent: bool,
        wait: Duration,
    ) -> Result<BlockingResult, AgentError> {
        let current = self.index.load(Ordering::SeqCst);
        if current > wait_index {
            let entry = self.inner.lock().get(key).cloned();
            return Ok(BlockingResult { entry, index: current });
        }
        let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        let current = self.index.load(Ordering::SeqCst);
        let entry = self.inner.lock().get(key).cloned();
        Ok(BlockingResult { entry, index: current })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = FakeCoordinationStore::new();
        store.put("borg/nodes/host-a/web-data", b"hello".to_vec()).await.unwrap();
        let entry = store.get("borg/nodes/host-a/web-data").await.unwrap().unwrap();
        assert_eq!(entry.value, b"hello");
    }

    #[tokio::test]
    async fn delete_tree_removes_only_matching_prefix() {
        let store = FakeCoordinationStore::new();
        store.put("borg/nodes/host-a/schedules/a", b"1".to_vec()).await.unwrap();
        store.put("borg/nodes/host-a/schedules/b", b"1".to_vec()).await.unwrap();
        store.put("borg/nodes/host-a/web-data", b"1".to_vec()).await.unwrap();
        store.delete_tree("borg/nodes/host-a/schedules/").await.unwrap();
        let keys = store.list_keys("borg/nodes/host-a/").await.unwrap();
        assert_eq!(keys, vec!["borg/nodes/host-a/web-data".to_string()]);
    }

    #[tokio::test]
    async fn blocking_get_returns_immediately_when_index_already_advanced() {
        let store = FakeCoordinationStore::new();
        store.put("k", b"v".to_vec()).await.unwrap();
        let result = store.blocking_get("k", 0, false, Duration::from_secs(5)).await.unwrap();
        assert!(result.entry.is_some());
    }

    #[test]
    fn base64_decode_round_trips_ascii() {
        // "aGVsbG8=" is the standard base64 encoding of "hello".
        assert_eq!(base64_decode("aGVsbG8=").unwrap(), b"hello".to_vec());
    }
}
