//! rdrs - primary-key read serving layer for an NDB data node cluster
//!
//! Lookups (single and batched) are packed into an offset-addressed binary
//! format, handed to the native engine in pooled buffers and unpacked back
//! into structured results:
//! - **Buffer pool**: fixed-capacity, word-aligned native buffers returned on drop
//! - **Wire codec**: request encoder and response decoder with bounds checks
//! - **Pipeline**: validation, authorization and single/batch dispatch
//! - **API key cache**: TTL cache of the databases each credential may read
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rdrs::prelude::*;
//!
//! let pool = BufferPool::with_config(BufferPoolConfig::default())?;
//! let pipeline = Pipeline::new(pool, engine, PipelineConfig::default());
//!
//! let request = ReadRequest::new("db004", "int_table")
//!     .with_filter("id0", "0")
//!     .with_filter("id1", "0");
//! let response = pipeline.pk_read(&request, Some(api_key))?;
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod auth;
pub mod buffer_pool;
pub mod codec;
pub mod config;
pub mod engine;
pub mod operation;
pub mod pipeline;
pub mod stats;
pub mod status;
pub mod utility;
pub mod validation;

// Re-exports for convenience
pub use buffer_pool::{BufferPool, BufferPoolConfig, BufferPoolStats, NativeBuffer, PooledBuffer};
pub use operation::{ColumnValue, PkFilter, ReadColumn, ReadRequest, ReadResponse};
pub use pipeline::{AsyncPipeline, BatchResult, Pipeline, PipelineConfig};
pub use status::{ErrorKind, GrpcCode, NativeStatus, RdrsError};

/// Wire format constants shared with the native engine
pub mod constants {
    /// Size of one header word / offset in bytes
    pub const ADDRESS_SIZE: u32 = 4;

    /// Op type of a PK read request
    pub const PK_REQ_ID: u32 = 1;
    /// Op type of a PK read response
    pub const PK_RESP_ID: u32 = 2;
    /// Op type of a batch request
    pub const BATCH_REQ_ID: u32 = 3;
    /// Op type of a batch response
    pub const BATCH_RESP_ID: u32 = 4;

    /// Request header: op type
    pub const PK_REQ_OP_TYPE_IDX: u32 = 0;
    /// Request header: buffer capacity
    pub const PK_REQ_CAPACITY_IDX: u32 = 1;
    /// Request header: used length
    pub const PK_REQ_LENGTH_IDX: u32 = 2;
    /// Request header: database name offset
    pub const PK_REQ_DB_IDX: u32 = 3;
    /// Request header: table name offset
    pub const PK_REQ_TABLE_IDX: u32 = 4;
    /// Request header: primary-key block offset
    pub const PK_REQ_PK_COLS_IDX: u32 = 5;
    /// Request header: read column block offset
    pub const PK_REQ_READ_COLS_IDX: u32 = 6;
    /// Request header: operation id offset
    pub const PK_REQ_OP_ID_IDX: u32 = 7;
    /// First byte after the request header
    pub const PK_REQ_HEADER_END: u32 = 32;

    /// Response header: op type
    pub const PK_RESP_OP_TYPE_IDX: u32 = 0;
    /// Response header: operation status
    pub const PK_RESP_OP_STATUS_IDX: u32 = 1;
    /// Response header: buffer capacity
    pub const PK_RESP_CAPACITY_IDX: u32 = 2;
    /// Response header: used length
    pub const PK_RESP_LENGTH_IDX: u32 = 3;
    /// Response header: database name offset
    pub const PK_RESP_DB_IDX: u32 = 4;
    /// Response header: table name offset
    pub const PK_RESP_TABLE_IDX: u32 = 5;
    /// Response header: column table offset
    pub const PK_RESP_COLS_IDX: u32 = 6;
    /// Response header: operation id offset
    pub const PK_RESP_OP_ID_IDX: u32 = 7;
    /// First byte after the response header
    pub const PK_RESP_HEADER_END: u32 = 32;

    /// Smallest buffer that can hold either header
    pub const HEADER_END: u32 = 32;

    /// Maximum identifier length in bytes
    pub const MAX_IDENTIFIER_LEN: usize = 64;
}

/// Utility for size literals
pub mod size {
    /// 1 KiB in bytes
    pub const KIB: u32 = 1024;
    /// 1 MiB in bytes
    pub const MIB: u32 = 1024 * KIB;
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::auth::{ApiKeyCache, ApiKeyCacheConfig, CredentialStore, StoredApiKey};
    pub use crate::buffer_pool::{BufferPool, BufferPoolConfig, PooledBuffer};
    pub use crate::codec::{decode_pk_read, encode_pk_read, DataType};
    pub use crate::engine::NativeEngine;
    pub use crate::operation::{ReadColumn, ReadRequest, ReadResponse};
    pub use crate::pipeline::{AsyncPipeline, BatchResult, Pipeline, PipelineConfig};
    pub use crate::stats::PrometheusRenderer;
    pub use crate::status::{ErrorKind, NativeStatus, RdrsError};
}
