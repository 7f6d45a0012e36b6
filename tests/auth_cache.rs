//! API key cache tests with the in-memory engine as credential backend.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use rdrs::auth::{ApiKeyCache, CacheSweeper, CredentialStore};
use rdrs::engine::{MemoryEngine, NativeEngine};
use rdrs::status::{ErrorKind, RdrsError};

fn cache(engine: &Arc<MemoryEngine>, refresh_ms: u64, eviction_ms: u64) -> Arc<ApiKeyCache> {
    let store: Arc<dyn CredentialStore> = engine.clone();
    Arc::new(ApiKeyCache::new(store, common::fast_cache(refresh_ms, eviction_ms)))
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

// ============ Refresh Tests ============

#[test]
fn test_hits_within_refresh_interval() {
    let engine = common::engine();
    let cache = cache(&engine, 10_000, 60_000);

    for _ in 0..5 {
        cache.validate(common::API_KEY, &["db004"]).unwrap();
    }
    cache.validate(common::API_KEY, &["db000", "db004"]).unwrap();

    assert_eq!(engine.api_key_lookups(), 1);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.refreshes, 1);
    assert_eq!(stats.hits, 5);
}

#[test]
fn test_stale_entry_is_refreshed() {
    let engine = common::engine();
    let cache = cache(&engine, 30, 60_000);

    cache.validate(common::API_KEY, &["db004"]).unwrap();
    let first = cache.last_refreshed(common::API_KEY).unwrap();

    thread::sleep(Duration::from_millis(60));
    cache.validate(common::API_KEY, &["db004"]).unwrap();
    let second = cache.last_refreshed(common::API_KEY).unwrap();

    assert!(second > first);
    assert_eq!(engine.api_key_lookups(), 2);
    assert!(cache.last_used(common::API_KEY).is_some());
}

#[test]
fn test_revoked_grant_visible_after_refresh() {
    let engine = common::engine();
    let cache = cache(&engine, 30, 60_000);

    cache.validate(common::API_KEY, &["db004"]).unwrap();
    engine.revoke_all(common::USER_ID);

    // Still served from the fresh entry.
    cache.validate(common::API_KEY, &["db004"]).unwrap();

    thread::sleep(Duration::from_millis(60));
    let err = cache.validate(common::API_KEY, &["db004"]).unwrap_err();
    assert_eq!(
        err,
        RdrsError::Unauthorized("unauthorized: no access to db registered".into())
    );
    assert_eq!(cache.size(), 1);
}

#[test]
fn test_grant_visible_after_refresh() {
    let engine = common::engine();
    let cache = cache(&engine, 30, 60_000);

    let err = cache.validate(common::API_KEY, &["db001"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    engine.grant(common::USER_ID, "db001");
    let err = cache.validate(common::API_KEY, &["db001"]).unwrap_err();
    assert_eq!(
        err,
        RdrsError::Unauthorized("unauthorized: no access to db registered in cache".into())
    );

    thread::sleep(Duration::from_millis(60));
    cache.validate(common::API_KEY, &["db001"]).unwrap();
}

// ============ Rejection Tests ============

#[test]
fn test_unknown_prefix_is_not_cached() {
    let engine = common::engine();
    let cache = cache(&engine, 10_000, 60_000);

    let err = cache
        .validate("AAAAAAAAAAAAAAAA.whatever", &["db004"])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.stats().refresh_failures, 1);
}

#[test]
fn test_wrong_secret() {
    let engine = common::engine();
    let cache = cache(&engine, 10_000, 60_000);

    let key = format!("{}.wrong-secret", common::API_KEY_PREFIX);
    let err = cache.validate(&key, &["db004"]).unwrap_err();
    assert_eq!(err, RdrsError::Unauthorized("bad API Key".into()));
    assert_eq!(cache.size(), 0);

    cache.validate(common::API_KEY, &["db004"]).unwrap();
    assert_eq!(cache.size(), 1);
}

#[test]
fn test_backend_outage_drops_entry() {
    let engine = common::engine();
    let cache = cache(&engine, 30, 60_000);

    cache.validate(common::API_KEY, &["db004"]).unwrap();
    engine.disconnect().unwrap();
    thread::sleep(Duration::from_millis(60));

    let err = cache.validate(common::API_KEY, &["db004"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Native);
    assert_eq!(err.http_status(), 503);
    assert_eq!(cache.size(), 0);

    engine.reconnect().unwrap();
    cache.validate(common::API_KEY, &["db004"]).unwrap();
}

// ============ Concurrency Tests ============

#[test]
fn test_concurrent_first_use_single_lookup() {
    let engine = common::engine();
    let cache = cache(&engine, 10_000, 60_000);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.validate(common::API_KEY, &["db004"]).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.api_key_lookups(), 1);
    assert_eq!(cache.size(), 1);
    assert_eq!(cache.stats().hits, 7);
}

#[test]
fn test_concurrent_distinct_keys() {
    let engine = common::engine();
    for i in 0..4u64 {
        let prefix = format!("prefix{i:0>10}");
        engine.add_api_key(&prefix, "s", "salt", 100 + i);
        engine.grant(100 + i, "db004");
    }
    let cache = cache(&engine, 10_000, 60_000);

    let handles: Vec<_> = (0..4u64)
        .map(|i| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let key = format!("prefix{i:0>10}.s");
                for _ in 0..50 {
                    cache.validate(&key, &["db004"]).unwrap();
                    assert!(cache.validate(&key, &["db000"]).is_err());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.size(), 4);
    assert_eq!(engine.api_key_lookups(), 4);
}

// ============ Eviction Tests ============

#[test]
fn test_sweeper_evicts_idle_keys() {
    let engine = common::engine();
    let cache = cache(&engine, 10_000, 20);

    cache.validate(common::API_KEY, &["db004"]).unwrap();
    assert_eq!(cache.size(), 1);

    let mut sweeper = CacheSweeper::for_cache(&cache);
    assert!(sweeper.start());
    assert!(wait_until(Duration::from_secs(2), || cache.size() == 0));
    sweeper.stop();
    assert!(!sweeper.is_running());
    assert!(cache.stats().evictions >= 1);

    // Evicted keys are looked up again on next use.
    cache.validate(common::API_KEY, &["db004"]).unwrap();
    assert_eq!(engine.api_key_lookups(), 2);
}

#[test]
fn test_cleanup() {
    let engine = common::engine();
    let cache = cache(&engine, 10_000, 60_000);

    cache.validate(common::API_KEY, &["db004"]).unwrap();
    cache.cleanup();
    assert_eq!(cache.size(), 0);
    assert!(cache.last_used(common::API_KEY).is_none());
}
