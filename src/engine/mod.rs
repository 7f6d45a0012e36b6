//! Native engine boundary.
//!
//! The engine consumes request buffers produced by [`crate::codec`] and
//! fills response buffers in place. Everything behind this trait is outside
//! the serving layer; [`MemoryEngine`] speaks the same buffer contract
//! without a cluster, and `ffi::RonDbEngine` (feature `native`) binds the
//! native data-access library.

#[cfg(feature = "native")]
pub mod ffi;
mod memory;

use std::sync::OnceLock;
use std::time::Duration;

pub use memory::{ColumnDef, MemoryEngine};

use crate::buffer_pool::{NativeBuffer, PooledBuffer};
use crate::status::NativeStatus;

/// Connection settings passed through to the engine.
///
/// Retry behaviour is applied inside the engine; the serving layer only sees
/// the final status of each call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RonDbConfig {
    /// Management server address of the data cluster.
    pub connect_string: String,
    /// Connection attempts before giving up.
    pub connection_retries: u32,
    /// Delay between connection attempts.
    pub connection_retry_delay: Duration,
    /// Retries of an operation that failed with a transient error.
    pub op_retry_count: u32,
    /// First backoff delay of an operation retry.
    pub op_retry_initial_delay: Duration,
    /// Random jitter added to each operation backoff.
    pub op_retry_jitter: Duration,
}

impl Default for RonDbConfig {
    fn default() -> Self {
        Self {
            connect_string: "localhost:1186".to_string(),
            connection_retries: 5,
            connection_retry_delay: Duration::from_millis(5_000),
            op_retry_count: 3,
            op_retry_initial_delay: Duration::from_millis(500),
            op_retry_jitter: Duration::from_millis(100),
        }
    }
}

/// Connection state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// Reads are served
    Connected = 0,
    /// A connect or reconnect is in progress
    Connecting = 1,
    /// No connection
    #[default]
    Disconnected = 2,
}

impl ConnectionState {
    /// Decode a raw state value; unknown values read as disconnected.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Engine connection statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Transaction objects created
    pub objects_created: u32,
    /// Transaction objects deleted
    pub objects_deleted: u32,
    /// Transaction objects alive
    pub objects_count: u32,
    /// Transaction objects idle in the engine's pool
    pub objects_available: u32,
    /// Connection state
    pub connection_state: ConnectionState,
    /// Whether the connection was shut down
    pub is_shutdown: bool,
    /// Whether a reconnect is running
    pub is_reconnection_in_progress: bool,
}

/// Calls into the native engine.
///
/// Each call blocks until the engine is done. A read issued while the
/// engine reconnects fails with a retriable status (see
/// [`NativeStatus::is_retriable`]); buffers stay valid either way.
pub trait NativeEngine: Send + Sync {
    /// Connect to the cluster.
    fn connect(&self, config: &RonDbConfig) -> Result<(), NativeStatus>;

    /// Close the connection.
    fn disconnect(&self) -> Result<(), NativeStatus>;

    /// Close and reopen the connection.
    fn reconnect(&self) -> Result<(), NativeStatus>;

    /// Serve one encoded PK read.
    ///
    /// The response buffer is filled even when the row is missing, in which
    /// case the returned status is `404`.
    fn pk_read(
        &self,
        request: &mut NativeBuffer,
        response: &mut NativeBuffer,
    ) -> Result<(), NativeStatus>;

    /// Serve a batch of encoded PK reads, index-aligned.
    ///
    /// Per-operation outcomes are written into each response buffer; the
    /// returned status covers the batch as a whole.
    fn pk_batch_read(
        &self,
        requests: &mut [PooledBuffer],
        responses: &mut [PooledBuffer],
    ) -> Result<(), NativeStatus>;

    /// Connection statistics.
    fn stats(&self) -> Result<EngineStats, NativeStatus>;
}

/// Run a process-wide library initialisation once and report its outcome
/// to every caller, including callers after a failed first attempt.
#[cfg_attr(not(feature = "native"), allow(dead_code))]
pub(crate) fn init_once(
    cell: &OnceLock<Result<(), NativeStatus>>,
    init: impl FnOnce() -> Result<(), NativeStatus>,
) -> Result<(), NativeStatus> {
    cell.get_or_init(init).clone()
}
