//! Ephemeral fingerprint ledger backing message and receipt dedup.
//!
//! A fingerprint maps a key derived from the channel and sender (and, for
//! receipts, the provider's external id) to the UUID and text of the last
//! submission seen under that key. Entries expire after the dedup window and
//! are overwritten by the next submission with the same key.
//!
//! The cache is an optimization: an unavailable or slow store is reported as
//! "not seen" and never blocks or fails ingestion.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_nats::jetstream::{
    Context as JsContext,
    context::KeyValueErrorKind,
    kv::{self},
};
use async_trait::async_trait;
use inlet_telemetry::{TelemetryLabels, record_counter};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Length of a hyphenated UUID plus the `|` separator.
const VALUE_PREFIX_LEN: usize = 37;

/// Size at which the in-memory store sweeps expired entries on write.
const PURGE_THRESHOLD: usize = 4096;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("fingerprint store unavailable: {0}")]
    Unavailable(String),
    #[error("fingerprint store timed out after {0:?}")]
    Timeout(Duration),
}

/// What was recorded for a key: the UUID the submission was stored under and its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub uuid: Uuid,
    pub text: String,
}

impl Fingerprint {
    fn encode(&self) -> String {
        format!("{}|{}", self.uuid, self.text)
    }

    fn decode(raw: &str) -> Option<Self> {
        if raw.len() < VALUE_PREFIX_LEN || !raw.is_char_boundary(VALUE_PREFIX_LEN) {
            return None;
        }
        let (head, text) = raw.split_at(VALUE_PREFIX_LEN);
        let uuid = head.strip_suffix('|')?.parse().ok()?;
        Some(Self {
            uuid,
            text: text.to_string(),
        })
    }
}

/// Contract implemented by fingerprint backends.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, FingerprintError>;
    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), FingerprintError>;
    async fn remove(&self, key: &str) -> Result<(), FingerprintError>;
}

pub type SharedFingerprintStore = Arc<dyn FingerprintStore>;

/// Process-local store used in tests or when JetStream is unavailable.
#[derive(Clone, Default)]
pub struct InMemoryFingerprintStore {
    inner: Arc<RwLock<HashMap<String, (String, OffsetDateTime)>>>,
}

impl InMemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FingerprintStore for InMemoryFingerprintStore {
    async fn get(&self, key: &str) -> Result<Option<String>, FingerprintError> {
        let now = OffsetDateTime::now_utc();
        let guard = self.inner.read().await;
        Ok(guard
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), FingerprintError> {
        let now = OffsetDateTime::now_utc();
        let mut guard = self.inner.write().await;
        if guard.len() >= PURGE_THRESHOLD {
            guard.retain(|_, (_, expires)| *expires > now);
        }
        guard.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), FingerprintError> {
        self.inner.write().await.remove(key);
        Ok(())
    }
}

/// JetStream key-value backed store.
///
/// Expiry is configured once on the bucket (`max_age`), so the per-call TTL
/// is ignored. Keys are hashed because KV keys only allow a restricted
/// character set while fingerprints embed arbitrary addresses.
pub struct NatsKvFingerprintStore {
    bucket: kv::Store,
}

impl NatsKvFingerprintStore {
    /// Opens the bucket, creating it with `window` as max age when missing.
    pub async fn new(js: &JsContext, namespace: &str, window: Duration) -> Result<Self, FingerprintError> {
        let bucket = match js.get_key_value(namespace).await {
            Ok(store) => store,
            Err(err) if err.kind() == KeyValueErrorKind::GetBucket => js
                .create_key_value(kv::Config {
                    bucket: namespace.to_string(),
                    history: 1,
                    max_age: window,
                    ..Default::default()
                })
                .await
                .map_err(|e| {
                    FingerprintError::Unavailable(format!("create bucket {namespace}: {e}"))
                })?,
            Err(err) => return Err(FingerprintError::Unavailable(err.to_string())),
        };
        Ok(Self { bucket })
    }

    fn kv_key(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }
}

#[async_trait]
impl FingerprintStore for NatsKvFingerprintStore {
    async fn get(&self, key: &str) -> Result<Option<String>, FingerprintError> {
        let entry = self
            .bucket
            .get(Self::kv_key(key))
            .await
            .map_err(|e| FingerprintError::Unavailable(e.to_string()))?;
        Ok(entry.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn set(&self, key: &str, value: String, _ttl: Duration) -> Result<(), FingerprintError> {
        self.bucket
            .put(Self::kv_key(key), value.into())
            .await
            .map(|_| ())
            .map_err(|e| FingerprintError::Unavailable(e.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), FingerprintError> {
        self.bucket
            .delete(Self::kv_key(key))
            .await
            .map_err(|e| FingerprintError::Unavailable(e.to_string()))
    }
}

/// Configuration derived at runtime.
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    pub window: Duration,
    pub timeout: Duration,
    pub namespace: String,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            timeout: Duration::from_millis(250),
            namespace: "inlet-fingerprints".to_string(),
        }
    }
}

impl FingerprintConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(secs) = env_u64("INLET_DEDUP_WINDOW_SECS") {
            cfg.window = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = env_u64("INLET_CACHE_TIMEOUT_MS") {
            cfg.timeout = Duration::from_millis(ms.max(1));
        }
        if let Ok(ns) = std::env::var("INLET_FINGERPRINT_BUCKET") {
            if !ns.trim().is_empty() {
                cfg.namespace = ns;
            }
        }
        cfg
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Dedup front end used by the orchestrator and the status notifier.
#[derive(Clone)]
pub struct FingerprintCache {
    store: SharedFingerprintStore,
    window: Duration,
    timeout: Duration,
}

impl FingerprintCache {
    pub fn new(store: SharedFingerprintStore, config: &FingerprintConfig) -> Self {
        Self {
            store,
            window: config.window,
            timeout: config.timeout,
        }
    }

    pub fn in_memory(config: &FingerprintConfig) -> Self {
        Self::new(Arc::new(InMemoryFingerprintStore::new()), config)
    }

    /// Looks up `key`. Misses, store errors and timeouts all return `None`.
    #[instrument(name = "fingerprint.lookup", skip(self), fields(key = %key))]
    pub async fn lookup(&self, key: &str) -> Option<Fingerprint> {
        let raw = match tokio::time::timeout(self.timeout, self.store.get(key)).await {
            Ok(Ok(raw)) => raw?,
            Ok(Err(err)) => {
                warn!(error = %err, "fingerprint lookup failed, treating as unseen");
                record_counter("inlet_fingerprint_errors", 1, &TelemetryLabels::new().kind("get"));
                return None;
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "fingerprint lookup timed out, treating as unseen");
                record_counter("inlet_fingerprint_errors", 1, &TelemetryLabels::new().kind("timeout"));
                return None;
            }
        };
        let decoded = Fingerprint::decode(&raw);
        if decoded.is_none() {
            debug!("ignoring undecodable fingerprint value");
        }
        decoded
    }

    /// Returns the UUID of the earlier submission when `key` was seen with the
    /// exact same `text`. A different text under the same key is not a duplicate.
    pub async fn seen(&self, key: &str, text: &str) -> Option<Uuid> {
        self.lookup(key)
            .await
            .filter(|prev| prev.text == text)
            .map(|prev| prev.uuid)
    }

    /// Best-effort write; failures are logged and swallowed.
    #[instrument(name = "fingerprint.record", skip(self, text), fields(key = %key))]
    pub async fn record(&self, key: &str, uuid: Uuid, text: &str) {
        let value = Fingerprint {
            uuid,
            text: text.to_string(),
        }
        .encode();
        match tokio::time::timeout(self.timeout, self.store.set(key, value, self.window)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "unable to record fingerprint"),
            Err(_) => warn!(timeout = ?self.timeout, "recording fingerprint timed out"),
        }
    }

    /// Drops a fingerprint so the next identical submission is stored again.
    pub async fn forget(&self, key: &str) {
        match tokio::time::timeout(self.timeout, self.store.remove(key)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, key, "unable to clear fingerprint"),
            Err(_) => warn!(key, "clearing fingerprint timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    #[async_trait]
    impl FingerprintStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, FingerprintError> {
            Err(FingerprintError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), FingerprintError> {
            Err(FingerprintError::Unavailable("connection refused".into()))
        }
        async fn remove(&self, _key: &str) -> Result<(), FingerprintError> {
            Err(FingerprintError::Unavailable("connection refused".into()))
        }
    }

    struct SlowStore;

    #[async_trait]
    impl FingerprintStore for SlowStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, FingerprintError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(format!("{}|hi", Uuid::new_v4())))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), FingerprintError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        async fn remove(&self, _key: &str) -> Result<(), FingerprintError> {
            Ok(())
        }
    }

    #[test]
    fn value_encoding_keeps_pipes_in_text() {
        let fp = Fingerprint {
            uuid: Uuid::new_v4(),
            text: "a|b|c".into(),
        };
        assert_eq!(Fingerprint::decode(&fp.encode()), Some(fp));
        assert_eq!(Fingerprint::decode("short"), None);
        assert_eq!(Fingerprint::decode(&format!("{}xhi", Uuid::new_v4())), None);
    }

    #[tokio::test]
    async fn same_text_is_duplicate_different_text_is_not() {
        let cache = FingerprintCache::in_memory(&FingerprintConfig::default());
        let uuid = Uuid::new_v4();
        assert_eq!(cache.seen("ch:tel:+1", "hi").await, None);
        cache.record("ch:tel:+1", uuid, "hi").await;
        assert_eq!(cache.seen("ch:tel:+1", "hi").await, Some(uuid));
        assert_eq!(cache.seen("ch:tel:+1", "hi there").await, None);
        assert_eq!(cache.seen("ch:tel:+2", "hi").await, None);

        cache.forget("ch:tel:+1").await;
        assert_eq!(cache.seen("ch:tel:+1", "hi").await, None);
    }

    #[tokio::test]
    async fn newer_submission_overwrites_key() {
        let cache = FingerprintCache::in_memory(&FingerprintConfig::default());
        cache.record("k", Uuid::new_v4(), "first").await;
        let second = Uuid::new_v4();
        cache.record("k", second, "second").await;
        assert_eq!(cache.seen("k", "first").await, None);
        assert_eq!(cache.seen("k", "second").await, Some(second));
    }

    #[tokio::test]
    async fn expired_entries_are_not_seen() {
        let store = InMemoryFingerprintStore::new();
        store.inner.write().await.insert(
            "old".into(),
            (
                format!("{}|hi", Uuid::new_v4()),
                OffsetDateTime::now_utc() - time::Duration::seconds(5),
            ),
        );
        assert_eq!(store.get("old").await.unwrap(), None);
    }

    #[tokio::test]
    async fn full_store_sweeps_expired_entries_on_write() {
        let store = InMemoryFingerprintStore::new();
        let expired = OffsetDateTime::now_utc() - time::Duration::seconds(5);
        {
            let mut guard = store.inner.write().await;
            for n in 0..PURGE_THRESHOLD {
                guard.insert(format!("old-{n}"), (String::new(), expired));
            }
        }
        store
            .set("fresh", format!("{}|hi", Uuid::new_v4()), Duration::from_secs(30))
            .await
            .unwrap();
        let guard = store.inner.read().await;
        assert_eq!(guard.len(), 1);
        assert!(guard.contains_key("fresh"));
    }

    #[tokio::test]
    async fn store_errors_read_as_misses() {
        let cache = FingerprintCache::new(Arc::new(BrokenStore), &FingerprintConfig::default());
        assert_eq!(cache.lookup("k").await, None);
        cache.record("k", Uuid::new_v4(), "hi").await;
        cache.forget("k").await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out_as_miss() {
        let cache = FingerprintCache::new(Arc::new(SlowStore), &FingerprintConfig::default());
        assert_eq!(cache.seen("k", "hi").await, None);
        cache.record("k", Uuid::new_v4(), "hi").await;
    }
}
