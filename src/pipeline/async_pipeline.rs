//! Async facade over [`Pipeline`].

use std::sync::Arc;

use crate::api::{BatchOpRequest, BatchOpResponse};
use crate::operation::{ReadRequest, ReadResponse};
use crate::pipeline::{BatchResult, Pipeline};
use crate::status::RdrsError;

/// Runs pipeline calls on the blocking thread pool of the current tokio
/// runtime.
///
/// Dropping a returned future abandons the result only: the engine call
/// runs to completion and its buffers go back to the pool.
#[derive(Clone, Debug)]
pub struct AsyncPipeline {
    inner: Arc<Pipeline>,
}

impl AsyncPipeline {
    /// Wrap a pipeline
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            inner: Arc::new(pipeline),
        }
    }

    /// Wrap a shared pipeline
    pub fn from_shared(pipeline: Arc<Pipeline>) -> Self {
        Self { inner: pipeline }
    }

    /// Get the wrapped pipeline
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.inner
    }

    async fn run<T, F>(&self, f: F) -> Result<T, RdrsError>
    where
        T: Send + 'static,
        F: FnOnce(&Pipeline) -> Result<T, RdrsError> + Send + 'static,
    {
        let pipeline = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&pipeline))
            .await
            .map_err(|e| RdrsError::Configuration(format!("pipeline task failed: {e}")))?
    }

    /// See [`Pipeline::pk_read`]
    pub async fn pk_read(
        &self,
        request: ReadRequest,
        api_key: Option<String>,
    ) -> Result<ReadResponse, RdrsError> {
        self.run(move |p| p.pk_read(&request, api_key.as_deref()))
            .await
    }

    /// See [`Pipeline::pk_batch_read`]
    pub async fn pk_batch_read(
        &self,
        requests: Vec<ReadRequest>,
        api_key: Option<String>,
    ) -> Result<BatchResult, RdrsError> {
        self.run(move |p| p.pk_batch_read(&requests, api_key.as_deref()))
            .await
    }

    /// See [`Pipeline::batch_op`]
    pub async fn batch_op(
        &self,
        batch: BatchOpRequest,
        api_key: Option<String>,
    ) -> Result<BatchOpResponse, RdrsError> {
        self.run(move |p| p.batch_op(&batch, api_key.as_deref()))
            .await
    }
}
