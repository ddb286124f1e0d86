//! TTL cache for source lookups, keyed by filter fingerprint.
//!
//! Each entry carries its own TTL (the server profile's `cache_timeout`), so
//! profiles with different timeouts share one cache. Entries are independent:
//! writing or invalidating one fingerprint never touches another.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::debug;

use recon_core::defaults::CACHE_MAX_ENTRIES;
use recon_core::{Result, SearchFilters};

/// Stable, order-independent cache key.
///
/// Pairs are sorted before hashing, so the same key/value pairs in any order
/// produce the same fingerprint.
pub fn fingerprint<K, V>(profile: &str, pairs: &[(K, V)], data_type: &str) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut sorted: Vec<(&str, &str)> = pairs
        .iter()
        .map(|(k, v)| (k.as_ref().trim(), v.as_ref().trim()))
        .collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(profile.as_bytes());
    hasher.update([0u8]);
    hasher.update(data_type.as_bytes());
    hasher.update([0u8]);
    for (key, value) in sorted {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }

    let hash = hex::encode(hasher.finalize());
    format!("recon:{}:{}", data_type, &hash[..32])
}

/// Fingerprint of a search-filter set.
pub fn filter_fingerprint(profile: &str, filters: &SearchFilters, data_type: &str) -> String {
    fingerprint(profile, &filters.pairs(), data_type)
}

#[derive(Debug, Clone)]
struct StoredEntry {
    data: Arc<JsonValue>,
    fetched_at: DateTime<Utc>,
    stored_at: Instant,
    ttl: Duration,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

struct PerEntryTtl;

impl Expiry<String, StoredEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// A cache hit.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
}

/// Fingerprint-keyed TTL cache.
#[derive(Clone)]
pub struct ResultCache {
    entries: Cache<String, StoredEntry>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CACHE_MAX_ENTRIES)
    }
}

impl ResultCache {
    pub fn new(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { entries }
    }

    /// Look up a live entry.
    pub async fn get<T: DeserializeOwned>(&self, fingerprint: &str) -> Option<Cached<T>> {
        let entry = match self.entries.get(fingerprint).await {
            Some(entry) => entry,
            None => {
                debug!(fingerprint, "Cache MISS");
                return None;
            }
        };
        if entry.is_expired() {
            self.entries.invalidate(fingerprint).await;
            debug!(fingerprint, "Cache MISS (expired)");
            return None;
        }
        match serde_json::from_value(entry.data.as_ref().clone()) {
            Ok(value) => {
                debug!(fingerprint, "Cache HIT");
                Some(Cached {
                    value,
                    fetched_at: entry.fetched_at,
                })
            }
            Err(e) => {
                debug!(fingerprint, error = %e, "Cached value has a different shape; ignoring");
                None
            }
        }
    }

    /// Store a value for `ttl_secs` seconds. Returns the fetch timestamp.
    pub async fn put<T: Serialize>(
        &self,
        fingerprint: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<DateTime<Utc>> {
        self.put_for(fingerprint, value, Duration::from_secs(ttl_secs))
            .await
    }

    pub async fn put_for<T: Serialize>(
        &self,
        fingerprint: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<DateTime<Utc>> {
        let fetched_at = Utc::now();
        let entry = StoredEntry {
            data: Arc::new(serde_json::to_value(value)?),
            fetched_at,
            stored_at: Instant::now(),
            ttl,
        };
        self.entries.insert(fingerprint.to_string(), entry).await;
        debug!(fingerprint, ttl_secs = ttl.as_secs(), "Cache SET");
        Ok(fetched_at)
    }

    /// Remove exactly one entry.
    pub async fn invalidate(&self, fingerprint: &str) {
        self.entries.invalidate(fingerprint).await;
        debug!(fingerprint, "Cache INVALIDATE");
    }

    pub async fn contains(&self, fingerprint: &str) -> bool {
        self.entries
            .get(fingerprint)
            .await
            .is_some_and(|e| !e.is_expired())
    }
}
