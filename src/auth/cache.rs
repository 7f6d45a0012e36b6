//! TTL cache of the databases each API key may read.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::debug;

use crate::auth::api_key::{parse_api_key, verify_secret};
use crate::auth::CredentialStore;
use crate::status::{http, RdrsError};

/// Timing knobs of the API key cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiKeyCacheConfig {
    /// How long a refreshed entry is trusted.
    pub refresh_interval: Duration,
    /// Random spread applied to each entry's refresh interval.
    pub refresh_jitter: Duration,
    /// Entries unused for longer than this are evicted.
    pub eviction_window: Duration,
    /// Period of the background eviction sweep.
    pub sweep_interval: Duration,
}

impl Default for ApiKeyCacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(10_000),
            refresh_jitter: Duration::from_millis(1_000),
            eviction_window: Duration::from_millis(60_000),
            sweep_interval: Duration::from_millis(1_000),
        }
    }
}

impl ApiKeyCacheConfig {
    /// Create a configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the refresh interval
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the refresh jitter
    pub fn with_refresh_jitter(mut self, jitter: Duration) -> Self {
        self.refresh_jitter = jitter;
        self
    }

    /// Set the eviction window
    pub fn with_eviction_window(mut self, window: Duration) -> Self {
        self.eviction_window = window;
        self
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    fn jittered_refresh_interval(&self) -> Duration {
        let jitter_ms = self.refresh_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.refresh_interval;
        }
        let mut rng = rand::thread_rng();
        let jitter = Duration::from_millis(rng.gen_range(0..jitter_ms));
        if rng.gen_bool(0.5) {
            self.refresh_interval.saturating_sub(jitter)
        } else {
            self.refresh_interval + jitter
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApiKeyCacheStats {
    /// Lookups answered from a fresh entry
    pub hits: u64,
    /// Lookups that found no entry
    pub misses: u64,
    /// Backend refreshes
    pub refreshes: u64,
    /// Backend refreshes that failed
    pub refresh_failures: u64,
    /// Lookups denied
    pub denials: u64,
    /// Entries removed by eviction sweeps
    pub evictions: u64,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    denials: AtomicU64,
    evictions: AtomicU64,
}

impl CacheCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct EntryState {
    databases: HashSet<String>,
    last_refreshed: Option<Instant>,
    refresh_interval: Duration,
}

impl EntryState {
    fn is_fresh(&self, now: Instant) -> bool {
        self.last_refreshed
            .is_some_and(|at| now.duration_since(at) < self.refresh_interval)
    }

    fn allows(&self, databases: &[&str]) -> bool {
        databases.iter().all(|db| self.databases.contains(*db))
    }
}

struct CacheEntry {
    /// Serializes refresh-then-check for one key.
    state: Mutex<EntryState>,
    /// Microseconds since the cache epoch.
    last_used: AtomicU64,
}

/// Cache of API key permissions backed by a [`CredentialStore`].
///
/// Entries are created on first use of a key, refreshed from the backend
/// once their (jittered) refresh interval has passed and evicted by
/// [`evict_unused`](Self::evict_unused) once unused for the eviction window.
/// Validations of different keys only share the map lock, which is never
/// held across a backend call.
pub struct ApiKeyCache {
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    store: Arc<dyn CredentialStore>,
    config: ApiKeyCacheConfig,
    epoch: Instant,
    counters: CacheCounters,
}

impl ApiKeyCache {
    /// Create an empty cache
    pub fn new(store: Arc<dyn CredentialStore>, config: ApiKeyCacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
            config,
            epoch: Instant::now(),
            counters: CacheCounters::default(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ApiKeyCacheConfig {
        &self.config
    }

    fn micros_since_epoch(&self, at: Instant) -> u64 {
        at.duration_since(self.epoch).as_micros() as u64
    }

    fn touch(&self, entry: &CacheEntry, now: Instant) {
        entry
            .last_used
            .store(self.micros_since_epoch(now), Ordering::Release);
    }

    /// Check that `api_key` may read every database in `databases`.
    ///
    /// A malformed key fails without touching the cache. An empty database
    /// list only checks the format. A fresh entry answers directly and a
    /// denial from it is final; a missing or stale entry is refreshed from
    /// the backend once and checked again.
    pub fn validate(&self, api_key: &str, databases: &[&str]) -> Result<(), RdrsError> {
        let (prefix, secret) = parse_api_key(api_key)?;
        if databases.is_empty() {
            return Ok(());
        }

        let existing = self.entries.read().get(api_key).cloned();
        let entry = match existing {
            Some(entry) => entry,
            None => {
                CacheCounters::bump(&self.counters.misses);
                self.insert_entry(api_key)
            }
        };

        let mut state = entry.state.lock();
        let now = Instant::now();
        if state.is_fresh(now) {
            CacheCounters::bump(&self.counters.hits);
            if !state.allows(databases) {
                CacheCounters::bump(&self.counters.denials);
                return Err(RdrsError::Unauthorized(
                    "unauthorized: no access to db registered in cache".to_string(),
                ));
            }
            self.touch(&entry, now);
            return Ok(());
        }

        match self.fetch_databases(prefix, secret) {
            Ok(dbs) => {
                state.databases = dbs;
                state.last_refreshed = Some(Instant::now());
                CacheCounters::bump(&self.counters.refreshes);
                if tracing::enabled!(tracing::Level::DEBUG) {
                    debug!(
                        prefix,
                        databases = state.databases.len(),
                        "api key cache entry refreshed"
                    );
                }
            }
            Err(err) => {
                CacheCounters::bump(&self.counters.refresh_failures);
                drop(state);
                self.remove_entry(api_key, &entry);
                return Err(err);
            }
        }

        if !state.allows(databases) {
            CacheCounters::bump(&self.counters.denials);
            return Err(RdrsError::Unauthorized(
                "unauthorized: no access to db registered".to_string(),
            ));
        }
        self.touch(&entry, Instant::now());
        Ok(())
    }

    fn insert_entry(&self, api_key: &str) -> Arc<CacheEntry> {
        let mut entries = self.entries.write();
        let entry = entries.entry(api_key.to_string()).or_insert_with(|| {
            Arc::new(CacheEntry {
                state: Mutex::new(EntryState {
                    databases: HashSet::new(),
                    last_refreshed: None,
                    refresh_interval: self.config.jittered_refresh_interval(),
                }),
                last_used: AtomicU64::new(self.micros_since_epoch(Instant::now())),
            })
        });
        Arc::clone(entry)
    }

    fn remove_entry(&self, api_key: &str, entry: &Arc<CacheEntry>) {
        let mut entries = self.entries.write();
        if entries
            .get(api_key)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(api_key);
        }
    }

    fn fetch_databases(&self, prefix: &str, secret: &str) -> Result<HashSet<String>, RdrsError> {
        let stored = self.store.api_key(prefix).map_err(|status| {
            if status.code == http::NOT_FOUND || status.code == http::UNAUTHORIZED {
                RdrsError::Unauthorized(status.message)
            } else {
                RdrsError::Native(status)
            }
        })?;
        if !verify_secret(secret, &stored) {
            return Err(RdrsError::Unauthorized("bad API Key".to_string()));
        }
        let dbs = self.store.user_databases(stored.user_id)?;
        Ok(dbs.into_iter().collect())
    }

    /// Remove every entry not used within the eviction window.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_unused(&self) -> usize {
        let now = self.micros_since_epoch(Instant::now());
        let window = self.config.eviction_window.as_micros() as u64;

        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, entry| {
            let idle = now.saturating_sub(entry.last_used.load(Ordering::Acquire));
            let keep = idle <= window;
            if !keep && tracing::enabled!(tracing::Level::DEBUG) {
                let prefix = key.split('.').next().unwrap_or_default();
                debug!(prefix, idle_us = idle, "api key cache entry evicted");
            }
            keep
        });
        let evicted = before - entries.len();
        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Drop every entry.
    pub fn cleanup(&self) {
        self.entries.write().clear();
    }

    /// Number of cached keys
    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    /// When `api_key` was last used successfully, if cached
    pub fn last_used(&self, api_key: &str) -> Option<Instant> {
        let entry = self.entries.read().get(api_key).cloned()?;
        let micros = entry.last_used.load(Ordering::Acquire);
        Some(self.epoch + Duration::from_micros(micros))
    }

    /// When `api_key` was last refreshed from the backend, if cached
    pub fn last_refreshed(&self, api_key: &str) -> Option<Instant> {
        let entry = self.entries.read().get(api_key).cloned()?;
        let at = entry.state.lock().last_refreshed;
        at
    }

    /// Counter snapshot
    pub fn stats(&self) -> ApiKeyCacheStats {
        let c = &self.counters;
        ApiKeyCacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            refreshes: c.refreshes.load(Ordering::Relaxed),
            refresh_failures: c.refresh_failures.load(Ordering::Relaxed),
            denials: c.denials.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ApiKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyCache")
            .field("config", &self.config)
            .field("size", &self.size())
            .finish()
    }
}
