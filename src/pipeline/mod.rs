//! Single and batched PK read dispatch.
//!
//! Every call runs the same stages: validate, authorize, check out buffers,
//! encode, call the engine, decode. Buffers are [`PooledBuffer`]s and go back
//! to the pool on every exit path.

mod async_pipeline;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

pub use async_pipeline::AsyncPipeline;

use crate::api::{BatchOpRequest, BatchOpResponse};
use crate::auth::ApiKeyCache;
use crate::buffer_pool::{BufferPool, BufferPoolStats, PooledBuffer};
use crate::codec::{decode_pk_read, encode_pk_read, is_pk_response};
use crate::engine::{EngineStats, NativeEngine};
use crate::operation::{ReadRequest, ReadResponse};
use crate::stats::{PipelineStats, PipelineStatsSnapshot, PrometheusRenderer};
use crate::status::{http, ErrorKind, RdrsError};
use crate::validation::{validate_batch_size, validate_read_request, ValidationLimits};

/// Pipeline settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineConfig {
    /// Limits applied by the validation gate
    pub limits: ValidationLimits,
    /// Require an API key on every call
    pub use_api_keys: bool,
}

impl PipelineConfig {
    /// Create a configuration with default limits and no API keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the validation limits
    pub fn with_limits(mut self, limits: ValidationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Require API keys
    pub fn with_api_keys(mut self, enabled: bool) -> Self {
        self.use_api_keys = enabled;
        self
    }
}

/// Outcome of a batch, index-aligned with the requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// One response per sub-operation; `status` carries its own code.
    pub responses: Vec<ReadResponse>,
}

impl BatchResult {
    /// Number of sub-operations
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Response of sub-operation `index`
    pub fn get(&self, index: usize) -> Option<&ReadResponse> {
        self.responses.get(index)
    }

    /// Iterate over the responses in request order
    pub fn iter(&self) -> impl Iterator<Item = &ReadResponse> {
        self.responses.iter()
    }
}

/// The PK read pipeline.
pub struct Pipeline {
    pool: BufferPool,
    engine: Arc<dyn NativeEngine>,
    auth: Option<Arc<ApiKeyCache>>,
    config: PipelineConfig,
    stats: PipelineStats,
}

impl Pipeline {
    /// Create a pipeline over an initialized pool
    pub fn new(pool: BufferPool, engine: Arc<dyn NativeEngine>, config: PipelineConfig) -> Self {
        Self {
            pool,
            engine,
            auth: None,
            config,
            stats: PipelineStats::new(),
        }
    }

    /// Attach the API key cache consulted when API keys are required
    pub fn with_auth(mut self, cache: Arc<ApiKeyCache>) -> Self {
        self.auth = Some(cache);
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get the buffer pool
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Get the engine
    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    /// Get the API key cache, if attached
    pub fn auth(&self) -> Option<&Arc<ApiKeyCache>> {
        self.auth.as_ref()
    }

    /// Buffer pool statistics
    pub fn pool_stats(&self) -> BufferPoolStats {
        self.pool.stats()
    }

    /// Pipeline counters
    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Engine connection statistics
    pub fn engine_stats(&self) -> Result<EngineStats, RdrsError> {
        self.engine.stats().map_err(RdrsError::Native)
    }

    /// Pipeline, pool, engine and key cache metrics in the Prometheus text
    /// format. Engine gauges are left out while the engine cannot report.
    pub fn render_metrics(&self, renderer: &PrometheusRenderer) -> String {
        let mut out = renderer.render_pipeline(&self.stats());
        out.push_str(&renderer.render_pool(&self.pool_stats()));
        if let Ok(stats) = self.engine.stats() {
            out.push_str(&renderer.render_engine(&stats));
        }
        if let Some(cache) = &self.auth {
            out.push_str(&renderer.render_cache(&cache.stats()));
        }
        out
    }

    /// Read one row by primary key.
    ///
    /// A missing row is not an error: the response carries status `404`.
    pub fn pk_read(
        &self,
        request: &ReadRequest,
        api_key: Option<&str>,
    ) -> Result<ReadResponse, RdrsError> {
        self.stats.record_read();
        let started = Instant::now();
        let result = self.read_one(request, api_key);
        self.stats.record_read_latency(started.elapsed());
        if let Ok(response) = &result {
            self.stats.record_response(response.status);
        }
        self.observe(result)
    }

    /// Read a batch of rows.
    ///
    /// Validation, authorization and encoding failures fail the whole batch
    /// before the engine is called. After the call each response is decoded
    /// independently and carries its own status.
    pub fn pk_batch_read(
        &self,
        requests: &[ReadRequest],
        api_key: Option<&str>,
    ) -> Result<BatchResult, RdrsError> {
        self.stats.record_batch(requests.len());
        let started = Instant::now();
        let result = self.read_batch(requests, api_key);
        self.stats.record_batch_latency(started.elapsed());
        if result.is_ok() {
            self.stats.record_response(http::OK);
        }
        self.observe(result)
    }

    /// Serve a public batch body.
    pub fn batch_op(
        &self,
        batch: &BatchOpRequest,
        api_key: Option<&str>,
    ) -> Result<BatchOpResponse, RdrsError> {
        let requests = match batch.to_requests(&self.config.limits) {
            Ok(requests) => requests,
            Err(err) => return self.observe(Err(err)),
        };
        let result = self.pk_batch_read(&requests, api_key)?;
        Ok(BatchOpResponse::from(&result))
    }

    fn observe<T>(&self, result: Result<T, RdrsError>) -> Result<T, RdrsError> {
        if let Err(err) = &result {
            let kind = err.kind();
            self.stats.record_failure(kind);
            self.stats.record_response(err.http_status());
            match kind {
                ErrorKind::Native | ErrorKind::Resource => {
                    warn!(kind = %kind, error = %err.verbose(), "pk read failed");
                }
                _ => {
                    if tracing::enabled!(tracing::Level::DEBUG) {
                        debug!(kind = %kind, error = %err, "pk read rejected");
                    }
                }
            }
        }
        result
    }

    fn authorize(&self, api_key: Option<&str>, databases: &[&str]) -> Result<(), RdrsError> {
        if !self.config.use_api_keys {
            return Ok(());
        }
        let cache = self.auth.as_ref().ok_or_else(|| {
            RdrsError::Configuration("API keys are required but no key cache is attached".into())
        })?;
        let api_key =
            api_key.ok_or_else(|| RdrsError::Unauthorized("No API key supplied".to_string()))?;
        cache.validate(api_key, databases)
    }

    fn read_one(
        &self,
        request: &ReadRequest,
        api_key: Option<&str>,
    ) -> Result<ReadResponse, RdrsError> {
        validate_read_request(request, &self.config.limits)?;
        self.authorize(api_key, &[request.database.as_str()])?;

        let mut req_buf = self.pool.checkout()?;
        let mut resp_buf = self.pool.checkout()?;
        encode_pk_read(request, &mut req_buf)?;

        let started = Instant::now();
        let status = self.engine.pk_read(&mut req_buf, &mut resp_buf);
        self.stats.record_engine_call(started.elapsed());

        match status {
            Ok(()) => Ok(decode_pk_read(&resp_buf)?),
            // An unknown database or table is also a 404, raised before the
            // engine writes a response.
            Err(status) if status.is_not_found() && is_pk_response(&resp_buf) => {
                self.stats.record_not_found();
                let mut response = decode_pk_read(&resp_buf)?;
                response.status = http::NOT_FOUND;
                Ok(response)
            }
            Err(status) => Err(RdrsError::Native(status)),
        }
    }

    fn read_batch(
        &self,
        requests: &[ReadRequest],
        api_key: Option<&str>,
    ) -> Result<BatchResult, RdrsError> {
        let limits = &self.config.limits;
        validate_batch_size(requests.len(), limits)?;
        for request in requests {
            validate_read_request(request, limits)?;
        }

        let mut databases: Vec<&str> = requests.iter().map(|r| r.database.as_str()).collect();
        databases.sort_unstable();
        databases.dedup();
        self.authorize(api_key, &databases)?;

        let mut req_bufs: Vec<PooledBuffer> = Vec::with_capacity(requests.len());
        let mut resp_bufs: Vec<PooledBuffer> = Vec::with_capacity(requests.len());
        for request in requests {
            let mut buf = self.pool.checkout()?;
            encode_pk_read(request, &mut buf)?;
            req_bufs.push(buf);
            resp_bufs.push(self.pool.checkout()?);
        }

        let started = Instant::now();
        let status = self.engine.pk_batch_read(&mut req_bufs, &mut resp_bufs);
        self.stats.record_engine_call(started.elapsed());
        status.map_err(RdrsError::Native)?;

        let responses = resp_bufs
            .iter()
            .enumerate()
            .map(|(index, buf)| match decode_pk_read(buf) {
                Ok(response) => response,
                Err(err) => {
                    self.stats.record_failure(ErrorKind::Corruption);
                    warn!(index, error = %err, "batch operation response is corrupt");
                    ReadResponse::with_status(http::INTERNAL_SERVER_ERROR)
                }
            })
            .collect();
        Ok(BatchResult { responses })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .field("auth", &self.auth.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::{BufferPoolConfig, NativeBuffer};
    use crate::codec::PkReadResponseWriter;
    use crate::engine::RonDbConfig;
    use crate::status::NativeStatus;
    use parking_lot::Mutex;

    /// Engine answering every read with a fixed status and no columns.
    struct ScriptedEngine {
        status: i32,
        batch_status: Option<NativeStatus>,
        corrupt_index: Option<usize>,
        /// Fail before any response is written, as for an unknown table.
        unwritten: bool,
        calls: Mutex<usize>,
    }

    impl ScriptedEngine {
        fn new(status: i32) -> Self {
            Self {
                status,
                batch_status: None,
                corrupt_index: None,
                unwritten: false,
                calls: Mutex::new(0),
            }
        }

        fn fill(&self, resp: &mut NativeBuffer) {
            if self.unwritten {
                return;
            }
            let mut w = PkReadResponseWriter::new(resp.as_bytes_mut()).unwrap();
            w.set_status(self.status).unwrap();
            w.set_column_count(0).unwrap();
            w.close().unwrap();
        }
    }

    impl NativeEngine for ScriptedEngine {
        fn connect(&self, _config: &RonDbConfig) -> Result<(), NativeStatus> {
            Ok(())
        }

        fn disconnect(&self) -> Result<(), NativeStatus> {
            Ok(())
        }

        fn reconnect(&self) -> Result<(), NativeStatus> {
            Ok(())
        }

        fn pk_read(
            &self,
            _request: &mut NativeBuffer,
            response: &mut NativeBuffer,
        ) -> Result<(), NativeStatus> {
            *self.calls.lock() += 1;
            self.fill(response);
            if self.status == http::OK {
                Ok(())
            } else {
                Err(NativeStatus::new(self.status, "scripted").with_location("engine.cpp", 10))
            }
        }

        fn pk_batch_read(
            &self,
            _requests: &mut [PooledBuffer],
            responses: &mut [PooledBuffer],
        ) -> Result<(), NativeStatus> {
            *self.calls.lock() += 1;
            if let Some(status) = &self.batch_status {
                return Err(status.clone());
            }
            for (i, resp) in responses.iter_mut().enumerate() {
                if self.corrupt_index == Some(i) {
                    resp.as_bytes_mut()[..4].copy_from_slice(&9u32.to_ne_bytes());
                } else {
                    self.fill(resp);
                }
            }
            Ok(())
        }

        fn stats(&self) -> Result<EngineStats, NativeStatus> {
            Ok(EngineStats::default())
        }
    }

    fn pipeline(engine: ScriptedEngine) -> (Pipeline, Arc<ScriptedEngine>) {
        let engine = Arc::new(engine);
        let pool = BufferPool::with_config(BufferPoolConfig::new(1024, 4)).unwrap();
        let pipeline = Pipeline::new(pool, engine.clone(), PipelineConfig::default());
        (pipeline, engine)
    }

    fn request() -> ReadRequest {
        ReadRequest::new("db", "t").with_filter("id", "1")
    }

    #[test]
    fn test_not_found_is_a_response() {
        let (pipeline, _) = pipeline(ScriptedEngine::new(404));
        let resp = pipeline.pk_read(&request(), None).unwrap();
        assert_eq!(resp.status, 404);
        assert!(!resp.is_found());
        assert_eq!(pipeline.stats().not_found, 1);
        assert_eq!(pipeline.pool_stats().checked_out(), 0);
    }

    #[test]
    fn test_unknown_table_404_is_native_error() {
        let mut engine = ScriptedEngine::new(404);
        engine.unwritten = true;
        let (pipeline, _) = pipeline(engine);

        let err = pipeline.pk_read(&request(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Native);
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.to_string(), "scripted");
        let stats = pipeline.stats();
        assert_eq!(stats.not_found, 0);
        assert_eq!(stats.corruption_failures, 0);
        assert_eq!(stats.native_failures, 1);
        assert_eq!(pipeline.pool_stats().checked_out(), 0);
    }

    #[test]
    fn test_metrics_count_response_statuses() {
        let (pipeline, _) = pipeline(ScriptedEngine::new(404));
        pipeline.pk_read(&request(), None).unwrap();
        pipeline.pk_read(&ReadRequest::new("db", "t"), None).unwrap_err();
        pipeline.pk_batch_read(&[request()], None).unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.responses_with(404), 1);
        assert_eq!(stats.responses_with(400), 1);
        assert_eq!(stats.responses_with(200), 1);

        let out = pipeline.render_metrics(&PrometheusRenderer::new());
        assert!(out.contains("rdrs_pk_read_requests_total 2\n"));
        assert!(out.contains("rdrs_pk_batch_read_requests_total 1\n"));
        assert!(out.contains("rdrs_response_status_total{code=\"404\"} 1\n"));
        assert!(out.contains("rdrs_buffers_checked_out 0\n"));
        assert!(out.contains("rdrs_engine_connection_state 2\n"));
        assert!(!out.contains("rdrs_api_key_cache"));
    }

    #[test]
    fn test_native_error_keeps_location() {
        let (pipeline, _) = pipeline(ScriptedEngine::new(500));
        let err = pipeline.pk_read(&request(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Native);
        assert_eq!(err.http_status(), 500);
        assert!(err.verbose().contains("engine.cpp"));
        assert_eq!(pipeline.stats().native_failures, 1);
        assert_eq!(pipeline.pool_stats().checked_out(), 0);
    }

    #[test]
    fn test_validation_fails_before_engine() {
        let (pipeline, engine) = pipeline(ScriptedEngine::new(200));
        let bad = ReadRequest::new("db", "t");
        assert!(pipeline.pk_read(&bad, None).is_err());
        assert_eq!(*engine.calls.lock(), 0);
        assert_eq!(pipeline.stats().validation_failures, 1);
    }

    #[test]
    fn test_api_keys_without_cache() {
        let (pipeline, _) = pipeline(ScriptedEngine::new(200));
        let pipeline = Pipeline {
            config: PipelineConfig::default().with_api_keys(true),
            ..pipeline
        };
        let err = pipeline.pk_read(&request(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_batch_status_fails_whole_batch() {
        let mut engine = ScriptedEngine::new(200);
        engine.batch_status = Some(NativeStatus::new(503, "reconnecting"));
        let (pipeline, _) = pipeline(engine);

        let err = pipeline
            .pk_batch_read(&[request(), request()], None)
            .unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert_eq!(pipeline.pool_stats().checked_out(), 0);
    }

    #[test]
    fn test_corrupt_sub_response_is_isolated() {
        let mut engine = ScriptedEngine::new(200);
        engine.corrupt_index = Some(1);
        let (pipeline, _) = pipeline(engine);

        let batch = pipeline
            .pk_batch_read(&[request(), request(), request()], None)
            .unwrap();
        let codes: Vec<i32> = batch.iter().map(|r| r.status).collect();
        assert_eq!(codes, vec![200, 500, 200]);
        assert!(batch.get(1).unwrap().columns.is_empty());
        assert_eq!(pipeline.stats().corruption_failures, 1);
        assert_eq!(pipeline.pool_stats().checked_out(), 0);
    }

    #[test]
    fn test_oversized_request_is_resource_error() {
        let engine = Arc::new(ScriptedEngine::new(200));
        let pool = BufferPool::with_config(BufferPoolConfig::new(64, 2)).unwrap();
        let pipeline = Pipeline::new(pool, engine.clone(), PipelineConfig::default());

        let req = ReadRequest::new("db", "t").with_filter("id", "x".repeat(100));
        let err = pipeline.pk_read(&req, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert_eq!(*engine.calls.lock(), 0);
        assert_eq!(pipeline.pool_stats().checked_out(), 0);
    }
}
