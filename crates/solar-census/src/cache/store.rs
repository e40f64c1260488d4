//! Cache store with per-key fetch coalescing and stale fallback

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::SourceKind;

use super::policy::{CachePolicy, Churn, Clock, TtlClass};

/// One cache slot: a source plus the shape of the query sent to it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub source: SourceKind,
    pub query: String,
}

impl CacheKey {
    pub fn new(source: SourceKind, query: impl Into<String>) -> Self {
        Self { source, query: query.into() }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source, self.query)
    }
}

/// Decoded cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
    pub ttl_class: TtlClass,
    pub churn: Churn,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Entry as persisted by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub key: CacheKey,
    /// JSON text of the payload
    pub payload: String,
    /// Hex SHA-256 of `payload`
    pub checksum: String,
    pub fetched_at: DateTime<Utc>,
    pub ttl_class: TtlClass,
    pub churn: Churn,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    fn encode(entry: &CacheEntry) -> Result<Self> {
        let payload = serde_json::to_string(&entry.payload)?;
        Ok(Self {
            key: entry.key.clone(),
            checksum: payload_checksum(&payload),
            payload,
            fetched_at: entry.fetched_at,
            ttl_class: entry.ttl_class,
            churn: entry.churn,
            expires_at: entry.expires_at,
        })
    }

    fn decode(self) -> Result<CacheEntry> {
        if payload_checksum(&self.payload) != self.checksum {
            return Err(Error::corrupt_cache(&self.key, "checksum mismatch"));
        }
        let payload: Value = serde_json::from_str(&self.payload)
            .map_err(|e| Error::corrupt_cache(&self.key, format!("unreadable payload: {}", e)))?;
        Ok(CacheEntry {
            key: self.key,
            payload,
            fetched_at: self.fetched_at,
            ttl_class: self.ttl_class,
            churn: self.churn,
            expires_at: self.expires_at,
        })
    }
}

pub(crate) fn payload_checksum(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Persistence behind the cache store
///
/// A `store` replaces any previous entry for the key in one step.
pub trait CacheBackend: Send + Sync {
    fn load(&self, key: &CacheKey) -> Result<Option<StoredEntry>>;
    fn store(&self, entry: &StoredEntry) -> Result<()>;
    fn remove(&self, key: &CacheKey) -> Result<bool>;
    fn remove_source(&self, source: SourceKind) -> Result<usize>;
    fn list(&self) -> Result<Vec<StoredEntry>>;
}

/// Process-local backend
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: DashMap<CacheKey, StoredEntry>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn load(&self, key: &CacheKey) -> Result<Option<StoredEntry>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    fn store(&self, entry: &StoredEntry) -> Result<()> {
        self.entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn remove_source(&self, source: SourceKind) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.source != source);
        Ok(before - self.entries.len())
    }

    fn list(&self) -> Result<Vec<StoredEntry>> {
        let mut entries: Vec<StoredEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

/// Answer of a freshness check
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Entry is fresh and may be served without a fetch
    pub use_cache: bool,
    /// Present entry, fresh or stale
    pub entry: Option<CacheEntry>,
}

/// Where a payload handed to the pipeline came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOrigin {
    Network,
    Cache,
    /// Expired entry served because the refetch failed
    Stale,
}

/// Payload plus the moment its data was fetched
#[derive(Debug, Clone)]
pub struct Fetched {
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
    pub origin: FetchOrigin,
}

impl Fetched {
    pub fn is_degraded(&self) -> bool {
        self.origin == FetchOrigin::Stale
    }
}

/// Inspection row for one cache entry
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub key: String,
    pub source: SourceKind,
    pub ttl_class: TtlClass,
    pub churn: Churn,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub age_hours: f64,
    pub is_fresh: bool,
    pub is_corrupt: bool,
    pub payload_bytes: usize,
}

/// Cache of source payloads keyed by (source, query)
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    locks: DashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            policy,
            clock,
            locks: DashMap::new(),
        }
    }

    /// Store backed by process memory
    pub fn in_memory(policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), policy, clock)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Decoded entry; corrupt entries read as absent
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let loaded = self.backend.load(key).and_then(|stored| stored.map(StoredEntry::decode).transpose());
        match loaded {
            Ok(entry) => entry,
            Err(e @ Error::CorruptCacheEntry { .. }) => {
                tracing::warn!("{}; treating as cache miss", e);
                None
            }
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Replace the entry for `key` with a new snapshot fetched now
    ///
    /// Live data is returned but never persisted.
    pub fn put(&self, key: CacheKey, payload: Value, ttl_class: TtlClass, churn: Churn) -> Result<CacheEntry> {
        let fetched_at = self.clock.now();
        let entry = CacheEntry {
            expires_at: self.policy.expires_at(ttl_class, churn, fetched_at),
            key,
            payload,
            fetched_at,
            ttl_class,
            churn,
        };
        if ttl_class != TtlClass::Live {
            self.backend.store(&StoredEntry::encode(&entry)?)?;
        }
        Ok(entry)
    }

    /// Force the next request for `key` to refetch
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.backend.remove(key)?;
        if removed {
            tracing::info!("Invalidated cache entry {}", key);
        }
        Ok(removed)
    }

    /// Force every query of a source to refetch
    pub fn invalidate_source(&self, source: SourceKind) -> Result<usize> {
        let removed = self.backend.remove_source(source)?;
        tracing::info!("Invalidated {} cache entries for {}", removed, source);
        Ok(removed)
    }

    /// `now - fetched_at < ttl` under the current policy
    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        match self.policy.ttl(entry.ttl_class, entry.churn) {
            Some(ttl) => self.clock.now().signed_duration_since(entry.fetched_at) < ttl,
            None => false,
        }
    }

    /// Decide whether `key` can be served from cache
    pub fn resolve(&self, key: &CacheKey) -> Resolution {
        match self.get(key) {
            Some(entry) => Resolution {
                use_cache: self.is_fresh(&entry),
                entry: Some(entry),
            },
            None => Resolution { use_cache: false, entry: None },
        }
    }

    /// Serve a fresh entry or run `fetch`, at most one fetch per key at a time
    ///
    /// A failed fetch falls back to an expired entry when one exists.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        ttl_class: TtlClass,
        churn: Churn,
        force_refresh: bool,
        fetch: F,
    ) -> Result<Fetched>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-checked under the lock so a waiter picks up the entry its predecessor wrote
        let resolution = self.resolve(key);
        if resolution.use_cache && !force_refresh && ttl_class != TtlClass::Live {
            if let Some(entry) = resolution.entry {
                tracing::debug!("Cache hit: {}", key);
                return Ok(Fetched {
                    payload: entry.payload,
                    fetched_at: entry.fetched_at,
                    origin: FetchOrigin::Cache,
                });
            }
        }
        tracing::debug!("Cache miss: {}", key);

        match fetch().await {
            Ok(payload) => {
                let fetched_at = self.clock.now();
                match self.put(key.clone(), payload.clone(), ttl_class, churn) {
                    Ok(entry) => Ok(Fetched {
                        payload: entry.payload,
                        fetched_at: entry.fetched_at,
                        origin: FetchOrigin::Network,
                    }),
                    Err(e) => {
                        tracing::warn!("Could not cache {}: {}", key, e);
                        Ok(Fetched { payload, fetched_at, origin: FetchOrigin::Network })
                    }
                }
            }
            Err(e) => match resolution.entry {
                Some(stale) => {
                    tracing::warn!(
                        "Fetch for {} failed ({}); serving entry fetched at {} as degraded data",
                        key,
                        e,
                        stale.fetched_at.to_rfc3339()
                    );
                    Ok(Fetched {
                        payload: stale.payload,
                        fetched_at: stale.fetched_at,
                        origin: FetchOrigin::Stale,
                    })
                }
                None => Err(e),
            },
        }
    }

    /// Every persisted entry with its age and validity
    pub fn status(&self) -> Result<Vec<CacheStatus>> {
        let now = self.clock.now();
        let entries = self.backend.list()?;
        Ok(entries
            .into_iter()
            .map(|stored| {
                let age = now.signed_duration_since(stored.fetched_at);
                let is_corrupt = payload_checksum(&stored.payload) != stored.checksum
                    || serde_json::from_str::<Value>(&stored.payload).is_err();
                let is_fresh = !is_corrupt
                    && self
                        .policy
                        .ttl(stored.ttl_class, stored.churn)
                        .map(|ttl| age < ttl)
                        .unwrap_or(false);
                CacheStatus {
                    key: stored.key.to_string(),
                    source: stored.key.source,
                    ttl_class: stored.ttl_class,
                    churn: stored.churn,
                    fetched_at: stored.fetched_at,
                    expires_at: stored.expires_at,
                    age_hours: age.num_seconds() as f64 / 3600.0,
                    is_fresh,
                    is_corrupt,
                    payload_bytes: stored.payload.len(),
                }
            })
            .collect())
    }
}
