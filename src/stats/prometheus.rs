//! Prometheus text exposition for rdrs statistics.
//!
//! Maps the pipeline, buffer pool, engine and API key cache snapshots to
//! the Prometheus text exposition format without a client dependency.
//!
//! Metric naming conventions:
//! - All metrics are prefixed with `rdrs_`.
//! - Counters use the `_total` suffix.
//! - Durations are reported in seconds (`*_seconds`).

use std::fmt::Write as _;

use crate::auth::ApiKeyCacheStats;
use crate::buffer_pool::BufferPoolStats;
use crate::engine::EngineStats;
use crate::stats::PipelineStatsSnapshot;
use crate::status::ErrorKind;

/// Render options for Prometheus text exposition.
#[derive(Debug, Clone)]
pub struct PrometheusOptions {
    /// Whether to include `# HELP` and `# TYPE` lines.
    pub include_metadata: bool,
}

impl Default for PrometheusOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
        }
    }
}

/// A renderer for Prometheus text exposition.
#[derive(Debug, Clone, Default)]
pub struct PrometheusRenderer {
    options: PrometheusOptions,
}

impl PrometheusRenderer {
    /// Create a renderer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a renderer with custom options.
    pub fn with_options(options: PrometheusOptions) -> Self {
        Self { options }
    }

    /// Render pipeline counters.
    pub fn render_pipeline(&self, snapshot: &PipelineStatsSnapshot) -> String {
        let mut out = String::with_capacity(2048);

        self.metric_counter_u64(
            &mut out,
            "rdrs_pk_read_requests_total",
            "Single primary key reads received.",
            snapshot.reads,
        );
        self.metric_counter_u64(
            &mut out,
            "rdrs_pk_read_not_found_total",
            "Single primary key reads that found no row.",
            snapshot.not_found,
        );
        self.metric_summary(
            &mut out,
            "rdrs_pk_read_duration_seconds",
            "Time spent serving single primary key reads.",
            snapshot.read_time.as_secs_f64(),
            snapshot.reads,
        );

        self.metric_counter_u64(
            &mut out,
            "rdrs_pk_batch_read_requests_total",
            "Batched primary key reads received.",
            snapshot.batches,
        );
        self.metric_counter_u64(
            &mut out,
            "rdrs_pk_batch_read_operations_total",
            "Sub-operations carried by all batches.",
            snapshot.batch_operations,
        );
        self.metric_summary(
            &mut out,
            "rdrs_pk_batch_read_duration_seconds",
            "Time spent serving batched primary key reads.",
            snapshot.batch_time.as_secs_f64(),
            snapshot.batches,
        );

        self.metric_counter_u64(
            &mut out,
            "rdrs_engine_calls_total",
            "Calls into the native engine.",
            snapshot.engine_calls,
        );
        self.metric_gauge_f64(
            &mut out,
            "rdrs_engine_avg_latency_seconds",
            "Average native engine call latency (seconds).",
            snapshot.average_engine_latency.as_secs_f64(),
        );

        self.maybe_metadata(
            &mut out,
            "rdrs_failures_total",
            "Failed calls by failure class.",
            "counter",
        );
        for kind in ErrorKind::ALL {
            let _ = writeln!(
                out,
                "rdrs_failures_total{{kind=\"{}\"}} {}",
                kind.as_str(),
                snapshot.failures(kind)
            );
        }

        self.maybe_metadata(
            &mut out,
            "rdrs_response_status_total",
            "Calls answered, by HTTP status.",
            "counter",
        );
        for (status, count) in &snapshot.responses {
            let _ = writeln!(out, "rdrs_response_status_total{{code=\"{status}\"}} {count}");
        }

        out
    }

    /// Render buffer pool gauges.
    pub fn render_pool(&self, stats: &BufferPoolStats) -> String {
        let mut out = String::with_capacity(512);

        self.metric_counter_u64(
            &mut out,
            "rdrs_buffer_allocations_total",
            "Native buffers allocated since the pool was initialized.",
            stats.allocations,
        );
        self.metric_counter_u64(
            &mut out,
            "rdrs_buffer_deallocations_total",
            "Native buffers released since the pool was initialized.",
            stats.deallocations,
        );
        self.metric_gauge_u64(
            &mut out,
            "rdrs_buffers",
            "Native buffers owned by the pool.",
            stats.total_buffers,
        );
        self.metric_gauge_u64(
            &mut out,
            "rdrs_buffers_free",
            "Native buffers on the free list.",
            stats.free_buffers,
        );
        self.metric_gauge_u64(
            &mut out,
            "rdrs_buffers_checked_out",
            "Native buffers held by in-flight requests.",
            stats.checked_out(),
        );

        out
    }

    /// Render engine connection and transaction object gauges.
    pub fn render_engine(&self, stats: &EngineStats) -> String {
        let mut out = String::with_capacity(512);

        self.metric_gauge_u64(
            &mut out,
            "rdrs_engine_connection_state",
            "Connection state (0 connected, 1 connecting, 2 disconnected).",
            stats.connection_state as u64,
        );
        self.metric_gauge_u64(
            &mut out,
            "rdrs_engine_reconnection_in_progress",
            "Whether a reconnect is running.",
            u64::from(stats.is_reconnection_in_progress),
        );
        self.metric_gauge_u64(
            &mut out,
            "rdrs_engine_objects_created",
            "Transaction objects created by the engine.",
            u64::from(stats.objects_created),
        );
        self.metric_gauge_u64(
            &mut out,
            "rdrs_engine_objects_deleted",
            "Transaction objects deleted by the engine.",
            u64::from(stats.objects_deleted),
        );
        self.metric_gauge_u64(
            &mut out,
            "rdrs_engine_objects",
            "Transaction objects alive.",
            u64::from(stats.objects_count),
        );
        self.metric_gauge_u64(
            &mut out,
            "rdrs_engine_objects_available",
            "Transaction objects idle in the engine's pool.",
            u64::from(stats.objects_available),
        );

        out
    }

    /// Render API key cache counters.
    pub fn render_cache(&self, stats: &ApiKeyCacheStats) -> String {
        let mut out = String::with_capacity(512);

        self.metric_counter_u64(
            &mut out,
            "rdrs_api_key_cache_hits_total",
            "Lookups answered from a fresh entry.",
            stats.hits,
        );
        self.metric_counter_u64(
            &mut out,
            "rdrs_api_key_cache_misses_total",
            "Lookups that found no entry.",
            stats.misses,
        );
        self.metric_counter_u64(
            &mut out,
            "rdrs_api_key_cache_refreshes_total",
            "Backend refreshes.",
            stats.refreshes,
        );
        self.metric_counter_u64(
            &mut out,
            "rdrs_api_key_cache_refresh_failures_total",
            "Backend refreshes that failed.",
            stats.refresh_failures,
        );
        self.metric_counter_u64(
            &mut out,
            "rdrs_api_key_cache_denials_total",
            "Lookups denied.",
            stats.denials,
        );
        self.metric_counter_u64(
            &mut out,
            "rdrs_api_key_cache_evictions_total",
            "Entries removed by eviction sweeps.",
            stats.evictions,
        );

        out
    }

    fn maybe_metadata(&self, out: &mut String, name: &str, help: &str, ty: &str) {
        if !self.options.include_metadata {
            return;
        }
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} {ty}");
    }

    fn metric_counter_u64(&self, out: &mut String, name: &str, help: &str, value: u64) {
        self.maybe_metadata(out, name, help, "counter");
        let _ = writeln!(out, "{name} {value}");
    }

    fn metric_gauge_u64(&self, out: &mut String, name: &str, help: &str, value: u64) {
        self.maybe_metadata(out, name, help, "gauge");
        let _ = writeln!(out, "{name} {value}");
    }

    fn metric_gauge_f64(&self, out: &mut String, name: &str, help: &str, value: f64) {
        self.maybe_metadata(out, name, help, "gauge");
        let v = if value.is_finite() { value } else { 0.0 };
        let _ = writeln!(out, "{name} {v}");
    }

    fn metric_summary(&self, out: &mut String, name: &str, help: &str, sum: f64, count: u64) {
        self.maybe_metadata(out, name, help, "summary");
        let sum = if sum.is_finite() { sum } else { 0.0 };
        let _ = writeln!(out, "{name}_sum {sum}");
        let _ = writeln!(out, "{name}_count {count}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConnectionState;
    use crate::stats::PipelineStats;
    use std::time::Duration;

    #[test]
    fn test_render_pipeline() {
        let stats = PipelineStats::new();
        stats.record_read();
        stats.record_read();
        stats.record_read_latency(Duration::from_millis(500));
        stats.record_response(200);
        stats.record_response(404);
        stats.record_failure(ErrorKind::Native);
        stats.record_response(503);

        let out = PrometheusRenderer::new().render_pipeline(&stats.snapshot());
        assert!(out.contains("# TYPE rdrs_pk_read_requests_total counter"));
        assert!(out.contains("rdrs_pk_read_requests_total 2\n"));
        assert!(out.contains("rdrs_pk_read_duration_seconds_sum 0.5\n"));
        assert!(out.contains("rdrs_pk_read_duration_seconds_count 2\n"));
        assert!(out.contains("rdrs_failures_total{kind=\"Native\"} 1\n"));
        assert!(out.contains("rdrs_failures_total{kind=\"Validation\"} 0\n"));
        assert!(out.contains("rdrs_response_status_total{code=\"200\"} 1\n"));
        assert!(out.contains("rdrs_response_status_total{code=\"404\"} 1\n"));
        assert!(out.contains("rdrs_response_status_total{code=\"503\"} 1\n"));
        assert_eq!(out.matches("# TYPE rdrs_response_status_total").count(), 1);
    }

    #[test]
    fn test_render_without_metadata() {
        let renderer = PrometheusRenderer::with_options(PrometheusOptions {
            include_metadata: false,
        });
        let out = renderer.render_pool(&BufferPoolStats {
            allocations: 5,
            deallocations: 1,
            total_buffers: 4,
            free_buffers: 3,
        });
        assert!(!out.contains('#'));
        assert!(out.contains("rdrs_buffers 4\n"));
        assert!(out.contains("rdrs_buffers_checked_out 1\n"));
    }

    #[test]
    fn test_render_engine_and_cache() {
        let renderer = PrometheusRenderer::new();
        let out = renderer.render_engine(&EngineStats {
            objects_count: 3,
            connection_state: ConnectionState::Connecting,
            is_reconnection_in_progress: true,
            ..EngineStats::default()
        });
        assert!(out.contains("rdrs_engine_connection_state 1\n"));
        assert!(out.contains("rdrs_engine_reconnection_in_progress 1\n"));
        assert!(out.contains("rdrs_engine_objects 3\n"));

        let out = renderer.render_cache(&ApiKeyCacheStats {
            hits: 7,
            ..ApiKeyCacheStats::default()
        });
        assert!(out.contains("rdrs_api_key_cache_hits_total 7\n"));
    }
}
