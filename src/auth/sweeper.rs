//! Background eviction of idle API key cache entries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use tracing::debug;

use crate::auth::ApiKeyCache;

/// Periodic sweeper calling [`ApiKeyCache::evict_unused`].
///
/// The worker holds a weak reference, so it stops by itself once the cache
/// is dropped. [`stop`](Self::stop) wakes it immediately instead of waiting
/// for the next tick.
pub struct CacheSweeper {
    cache: Weak<ApiKeyCache>,
    interval: Duration,
    running: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CacheSweeper {
    /// Create a stopped sweeper for `cache`
    pub fn new(cache: &Arc<ApiKeyCache>, interval: Duration) -> Self {
        Self {
            cache: Arc::downgrade(cache),
            interval,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: None,
            handle: None,
        }
    }

    /// Sweeper using the cache's configured sweep interval
    pub fn for_cache(cache: &Arc<ApiKeyCache>) -> Self {
        Self::new(cache, cache.config().sweep_interval)
    }

    /// Check if the worker is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get the sweep interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the sweeper.
    ///
    /// Returns true if the worker was started, false if already running.
    pub fn start(&mut self) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }

        let (tx, rx) = channel::bounded::<()>(1);
        let running = Arc::clone(&self.running);
        let cache = self.cache.clone();
        let interval = self.interval;

        let handle = thread::spawn(move || {
            loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let evicted = cache.evict_unused();
                if evicted > 0 && tracing::enabled!(tracing::Level::DEBUG) {
                    debug!(evicted, remaining = cache.size(), "api key cache swept");
                }
            }
            running.store(false, Ordering::Release);
        });

        self.shutdown = Some(tx);
        self.handle = Some(handle);
        true
    }

    /// Stop the sweeper and wait for the worker to exit.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CacheSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSweeper")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}
