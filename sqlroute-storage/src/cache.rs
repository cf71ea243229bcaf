//! Read-path result caching with TTL expiry and LRU eviction.
//!
//! Entries are keyed by a content hash of the statement text and its bound
//! parameters. Only successful results are stored. Concurrent misses on the
//! same key are collapsed onto one producer unless `dedupe_in_flight` is off.
//!
//! # Examples
//!
//! ```no_run
//! use sqlroute_core::Params;
//! use sqlroute_storage::cache::{CacheConfig, CacheKey, ResultCache};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheConfig::builder()
//!     .ttl(Duration::from_secs(60))
//!     .max_entries(1000)
//!     .build()?;
//!
//! let cache: ResultCache<String> = ResultCache::new(config);
//! let key = CacheKey::compute("SELECT 1", &Params::None);
//! let value = cache
//!     .get_or_compute(&key, || async { Ok::<_, std::io::Error>("one".to_string()) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlroute_core::{Params, QueryOutcome, Result, RouteError};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Cache settings, usually nested under `cache` in the client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long an entry stays fresh.
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,

    /// Entries beyond this count evict the least recently used one.
    pub max_entries: usize,

    /// Collapse concurrent misses on one key onto a single producer.
    pub dedupe_in_flight: bool,

    /// Periodically sweep expired entries in the background.
    pub auto_cleanup: bool,

    #[serde(rename = "cleanup_interval_ms", with = "duration_ms")]
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600), // 10 minutes
            max_entries: 10000,
            dedupe_in_flight: true,
            auto_cleanup: true,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(RouteError::configuration(
                "cache max_entries must be greater than 0",
            ));
        }
        if self.ttl.is_zero() {
            return Err(RouteError::configuration("cache ttl must be greater than 0"));
        }
        if self.auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(RouteError::configuration(
                "cache cleanup_interval must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    ttl: Option<Duration>,
    max_entries: Option<usize>,
    dedupe_in_flight: Option<bool>,
    auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn dedupe_in_flight(mut self, enabled: bool) -> Self {
        self.dedupe_in_flight = Some(enabled);
        self
    }

    pub fn auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = Some(enabled);
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `RouteError::Configuration` for a zero capacity, TTL or sweep
    /// interval.
    pub fn build(self) -> Result<CacheConfig> {
        let default = CacheConfig::default();
        let config = CacheConfig {
            ttl: self.ttl.unwrap_or(default.ttl),
            max_entries: self.max_entries.unwrap_or(default.max_entries),
            dedupe_in_flight: self.dedupe_in_flight.unwrap_or(default.dedupe_in_flight),
            auto_cleanup: self.auto_cleanup.unwrap_or(default.auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(default.cleanup_interval),
        };
        config.validate()?;
        Ok(config)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Content hash of a statement and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// `sha256(hex(sha256(query)) ++ hex(sha256(canonical params json)))`.
    ///
    /// Named parameters serialize in key order, so the same mapping built in
    /// any order yields the same key. Positional order is significant.
    pub fn compute(query: &str, params: &Params) -> Self {
        let params_json = serde_json::to_string(params).unwrap_or_default();

        let query_digest = hex::encode(Sha256::digest(query.as_bytes()));
        let params_digest = hex::encode(Sha256::digest(params_json.as_bytes()));

        let mut hasher = Sha256::new();
        hasher.update(query_digest.as_bytes());
        hasher.update(params_digest.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_accessed: u64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration, tick: u64) -> Self {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::seconds(600));

        Self {
            value,
            created_at: now,
            expires_at: now + ttl,
            last_accessed: tick,
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Membership in the per-key producer gate. Leaving, including by
/// cancellation, drops the map entry once no other caller holds it.
struct InFlight<'a> {
    map: &'a DashMap<CacheKey, Arc<Mutex<()>>>,
    key: &'a CacheKey,
    gate: Arc<Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn join(map: &'a DashMap<CacheKey, Arc<Mutex<()>>>, key: &'a CacheKey) -> Self {
        let gate = map
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self { map, key, gate }
    }

    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // Held only by the map and this slot.
        self.map
            .remove_if(self.key, |_, gate| Arc::strong_count(gate) <= 2);
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub current_entries: usize,
    pub max_entries: usize,
    /// 0.0 - 1.0
    pub hit_rate: f64,
    pub collected_at: DateTime<Utc>,
}

impl CacheStatistics {
    fn calculate_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// In-memory result cache backed by `DashMap`.
pub struct ResultCache<V = QueryOutcome>
where
    V: Clone + Send + Sync + 'static,
{
    config: CacheConfig,
    entries: Arc<DashMap<CacheKey, CacheEntry<V>>>,
    in_flight: DashMap<CacheKey, Arc<Mutex<()>>>,
    tick: AtomicU64,
    counters: Arc<Counters>,
    sweeper: Option<JoinHandle<()>>,
}

impl<V> ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache. The background sweep only starts when a tokio runtime
    /// is available; expired entries are dropped on lookup either way.
    pub fn new(config: CacheConfig) -> Self {
        let entries = Arc::new(DashMap::new());
        let counters = Arc::new(Counters::default());

        let sweeper = if config.auto_cleanup {
            tokio::runtime::Handle::try_current().ok().map(|handle| {
                let entries = entries.clone();
                let counters = counters.clone();
                let interval = config.cleanup_interval;

                handle.spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    loop {
                        ticker.tick().await;
                        let removed = Self::remove_expired(&entries, &counters);
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired cache entries");
                        }
                    }
                })
            })
        } else {
            None
        };

        Self {
            config,
            entries,
            in_flight: DashMap::new(),
            tick: AtomicU64::new(0),
            counters,
            sweeper,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    fn remove_expired(entries: &DashMap<CacheKey, CacheEntry<V>>, counters: &Counters) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(entries.len());
        counters
            .expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Drops every expired entry now, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        Self::remove_expired(&self.entries, &self.counters)
    }

    fn lookup(&self, key: &CacheKey) -> Option<V> {
        let mut entry = self.entries.get_mut(key)?;
        if entry.is_expired() {
            drop(entry);
            if self
                .entries
                .remove_if(key, |_, entry| entry.is_expired())
                .is_some()
            {
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            }
            return None;
        }

        entry.last_accessed = self.next_tick();
        Some(entry.value.clone())
    }

    /// Returns the fresh value under `key`, counting a hit or a miss.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let value = self.lookup(key);
        let counter = if value.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    pub fn insert(&self, key: CacheKey, value: V) {
        self.insert_with_ttl(key, value, self.config.ttl);
    }

    pub fn insert_with_ttl(&self, key: CacheKey, value: V, ttl: Duration) {
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(&key) {
            self.evict_lru();
        }

        let entry = CacheEntry::new(value, ttl, self.next_tick());
        self.entries.insert(key, entry);
    }

    fn evict_lru(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| (entry.value().last_accessed, entry.value().created_at))
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the cached value, or runs `producer` and stores its success.
    ///
    /// A producer error is returned unchanged and nothing is stored.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &CacheKey, producer: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        if !self.config.dedupe_in_flight {
            return self.produce(key, producer).await;
        }

        let slot = InFlight::join(&self.in_flight, key);
        let _guard = slot.lock().await;
        // Another caller may have filled the entry while we waited.
        match self.lookup(key) {
            Some(value) => Ok(value),
            None => self.produce(key, producer).await,
        }
    }

    async fn produce<F, Fut, E>(&self, key: &CacheKey, producer: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        let value = producer().await?;
        self.insert(key.clone(), value.clone());
        tracing::trace!(key = %key, "Cached query result");
        Ok(value)
    }

    /// Removes `key`, returning its value if it was still fresh.
    pub fn invalidate(&self, key: &CacheKey) -> Option<V> {
        let (_, entry) = self.entries.remove(key)?;
        if entry.is_expired() {
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some(entry.value)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn statistics(&self) -> CacheStatistics {
        let mut stats = CacheStatistics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            current_entries: self.entries.len(),
            max_entries: self.config.max_entries,
            hit_rate: 0.0,
            collected_at: Utc::now(),
        };
        stats.calculate_hit_rate();
        stats
    }
}

impl<V> Drop for ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl<V> fmt::Debug for ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .finish()
    }
}
