//! Pipeline statistics
//!
//! Counters are updated on the request path with relaxed atomics and read
//! as a [`PipelineStatsSnapshot`] for a stat endpoint. The [`prometheus`]
//! module renders snapshots in the Prometheus text format.

pub mod prometheus;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::status::ErrorKind;

pub use prometheus::{PrometheusOptions, PrometheusRenderer};

/// Number of [`ErrorKind`] variants.
const ERROR_KINDS: usize = 6;

/// Counters of the read pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Single reads started
    pub reads: AtomicU64,
    /// Single reads that found no row
    pub not_found: AtomicU64,
    /// Batches started
    pub batches: AtomicU64,
    /// Sub-operations carried by all batches
    pub batch_operations: AtomicU64,
    /// Failed calls, indexed by `ErrorKind as usize`
    failures: [AtomicU64; ERROR_KINDS],
    /// Total time spent in engine calls, in nanoseconds
    pub engine_time_ns: AtomicU64,
    /// Number of engine calls
    pub engine_calls: AtomicU64,
    /// Total time spent serving single reads, in nanoseconds
    pub read_time_ns: AtomicU64,
    /// Total time spent serving batches, in nanoseconds
    pub batch_time_ns: AtomicU64,
    /// Answered calls by HTTP status
    responses: Mutex<BTreeMap<i32, u64>>,
}

impl PipelineStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single read
    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a single read that found no row
    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch of `operations` sub-operations
    pub fn record_batch(&self, operations: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.batch_operations
            .fetch_add(operations as u64, Ordering::Relaxed);
    }

    /// Record a failed call
    pub fn record_failure(&self, kind: ErrorKind) {
        self.failures[kind as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Record the duration of one engine call
    pub fn record_engine_call(&self, duration: Duration) {
        self.engine_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.engine_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the duration of one single read, successful or not
    pub fn record_read_latency(&self, duration: Duration) {
        self.read_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record the duration of one batch, successful or not
    pub fn record_batch_latency(&self, duration: Duration) {
        self.batch_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record the status a call was answered with
    pub fn record_response(&self, status: i32) {
        *self.responses.lock().entry(status).or_insert(0) += 1;
    }

    /// Failures of one kind
    pub fn failures(&self, kind: ErrorKind) -> u64 {
        self.failures[kind as usize].load(Ordering::Relaxed)
    }

    /// Average engine call latency
    pub fn average_engine_latency(&self) -> Duration {
        let count = self.engine_calls.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.engine_time_ns.load(Ordering::Relaxed) / count)
    }

    /// Copy the counters
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            batch_operations: self.batch_operations.load(Ordering::Relaxed),
            validation_failures: self.failures(ErrorKind::Validation),
            resource_failures: self.failures(ErrorKind::Resource),
            corruption_failures: self.failures(ErrorKind::Corruption),
            native_failures: self.failures(ErrorKind::Native),
            unauthorized_failures: self.failures(ErrorKind::Unauthorized),
            configuration_failures: self.failures(ErrorKind::Configuration),
            engine_calls: self.engine_calls.load(Ordering::Relaxed),
            average_engine_latency: self.average_engine_latency(),
            read_time: Duration::from_nanos(self.read_time_ns.load(Ordering::Relaxed)),
            batch_time: Duration::from_nanos(self.batch_time_ns.load(Ordering::Relaxed)),
            responses: self.responses.lock().clone(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.not_found.store(0, Ordering::Relaxed);
        self.batches.store(0, Ordering::Relaxed);
        self.batch_operations.store(0, Ordering::Relaxed);
        for counter in &self.failures {
            counter.store(0, Ordering::Relaxed);
        }
        self.engine_time_ns.store(0, Ordering::Relaxed);
        self.engine_calls.store(0, Ordering::Relaxed);
        self.read_time_ns.store(0, Ordering::Relaxed);
        self.batch_time_ns.store(0, Ordering::Relaxed);
        self.responses.lock().clear();
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    /// Single reads started
    pub reads: u64,
    /// Single reads that found no row
    pub not_found: u64,
    /// Batches started
    pub batches: u64,
    /// Sub-operations carried by all batches
    pub batch_operations: u64,
    /// Validation failures
    pub validation_failures: u64,
    /// Buffer capacity failures
    pub resource_failures: u64,
    /// Corrupt response buffers
    pub corruption_failures: u64,
    /// Engine failures
    pub native_failures: u64,
    /// Rejected credentials
    pub unauthorized_failures: u64,
    /// Lifecycle misuse
    pub configuration_failures: u64,
    /// Engine calls
    pub engine_calls: u64,
    /// Average engine call latency
    pub average_engine_latency: Duration,
    /// Time spent serving single reads
    pub read_time: Duration,
    /// Time spent serving batches
    pub batch_time: Duration,
    /// Answered calls by HTTP status
    pub responses: BTreeMap<i32, u64>,
}

impl PipelineStatsSnapshot {
    /// Failures of every kind
    pub fn total_failures(&self) -> u64 {
        self.validation_failures
            + self.resource_failures
            + self.corruption_failures
            + self.native_failures
            + self.unauthorized_failures
            + self.configuration_failures
    }

    /// Failures of one kind
    pub fn failures(&self, kind: ErrorKind) -> u64 {
        match kind {
            ErrorKind::Validation => self.validation_failures,
            ErrorKind::Resource => self.resource_failures,
            ErrorKind::Corruption => self.corruption_failures,
            ErrorKind::Native => self.native_failures,
            ErrorKind::Unauthorized => self.unauthorized_failures,
            ErrorKind::Configuration => self.configuration_failures,
        }
    }

    /// Calls answered with `status`
    pub fn responses_with(&self, status: i32) -> u64 {
        self.responses.get(&status).copied().unwrap_or(0)
    }
}
