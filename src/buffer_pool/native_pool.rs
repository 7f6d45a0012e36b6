//! Native buffer pool implementation

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::constants::{ADDRESS_SIZE, HEADER_END};

/// Errors returned by the buffer pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// `initialize` called twice without a `shutdown` in between.
    #[error("native buffers are already initialized")]
    AlreadyInitialized,
    /// Pool used before `initialize` or after `shutdown`.
    #[error("native buffers are not initialized")]
    NotInitialized,
    /// Rejected pool sizing.
    #[error("invalid buffer pool configuration: {0}")]
    InvalidConfig(String),
}

/// Sizing of the native buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Capacity of every buffer in bytes.
    pub buffer_size: u32,
    /// Number of buffers allocated by `initialize`.
    pub pre_allocated: u32,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            buffer_size: 320 * 1024,
            pre_allocated: 1024,
        }
    }
}

impl BufferPoolConfig {
    /// Create a configuration
    pub fn new(buffer_size: u32, pre_allocated: u32) -> Self {
        Self {
            buffer_size,
            pre_allocated,
        }
    }

    /// Reject sizes the codec cannot address.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.buffer_size % ADDRESS_SIZE != 0 {
            return Err(PoolError::InvalidConfig(format!(
                "buffer size must be multiple of {ADDRESS_SIZE}, got {}",
                self.buffer_size
            )));
        }
        if self.buffer_size < HEADER_END {
            return Err(PoolError::InvalidConfig(format!(
                "buffer size must hold the {HEADER_END} byte header, got {}",
                self.buffer_size
            )));
        }
        Ok(())
    }
}

/// Fixed-capacity, word-backed byte region exchanged with the native engine.
///
/// The storage is a slice of `u32` so every buffer starts on a word boundary;
/// callers see it as bytes.
pub struct NativeBuffer {
    words: Box<[u32]>,
}

impl NativeBuffer {
    /// Allocate a zeroed buffer. `capacity` is rounded down to whole words.
    pub fn zeroed(capacity: u32) -> Self {
        let words = (capacity / ADDRESS_SIZE) as usize;
        Self {
            words: vec![0u32; words].into_boxed_slice(),
        }
    }

    /// Capacity in bytes
    #[inline]
    pub fn capacity(&self) -> u32 {
        (self.words.len() as u32) * ADDRESS_SIZE
    }

    /// Byte view of the buffer
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// Mutable byte view of the buffer
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    /// Base address, for handing the buffer across the native boundary
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.as_bytes_mut().as_mut_ptr()
    }

    fn reset(&mut self) {
        if let Some(first) = self.words.first_mut() {
            *first = 0;
        }
    }
}

impl std::fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Point-in-time pool statistics, taken under the pool lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers allocated since `initialize`
    pub allocations: u64,
    /// Buffers released since `initialize`
    pub deallocations: u64,
    /// Buffers owned by the pool, free or checked out
    pub total_buffers: u64,
    /// Buffers sitting on the free list
    pub free_buffers: u64,
}

impl BufferPoolStats {
    /// Buffers currently held by callers
    pub fn checked_out(&self) -> u64 {
        self.total_buffers - self.free_buffers
    }
}

#[derive(Default)]
struct PoolState {
    free: Vec<NativeBuffer>,
    initialized: bool,
    generation: u64,
    allocations: u64,
    deallocations: u64,
    total_buffers: u64,
}

struct BufferPoolInner {
    state: Mutex<PoolState>,
    config: BufferPoolConfig,
}

impl BufferPoolInner {
    fn return_buffer(&self, mut buffer: NativeBuffer, generation: u64) {
        let mut state = self.state.lock();
        if !state.initialized || state.generation != generation {
            // Checked out before a shutdown; it belongs to no live pool.
            return;
        }
        buffer.reset();
        state.free.push(buffer);
    }
}

/// A buffer checked out from the pool.
/// Returns to the pool on drop.
pub struct PooledBuffer {
    buffer: Option<NativeBuffer>,
    pool: Option<Weak<BufferPoolInner>>,
    generation: u64,
}

impl PooledBuffer {
    /// Create a standalone buffer not backed by a pool
    pub fn standalone(capacity: u32) -> Self {
        Self {
            buffer: Some(NativeBuffer::zeroed(capacity)),
            pool: None,
            generation: 0,
        }
    }
}

impl Deref for PooledBuffer {
    type Target = NativeBuffer;

    fn deref(&self) -> &NativeBuffer {
        match self.buffer.as_ref() {
            Some(buffer) => buffer,
            None => unreachable!("buffer is only taken on drop"),
        }
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut NativeBuffer {
        match self.buffer.as_mut() {
            Some(buffer) => buffer,
            None => unreachable!("buffer is only taken on drop"),
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(weak) = self.pool.take() {
            if let Some(pool) = weak.upgrade() {
                if let Some(buffer) = self.buffer.take() {
                    pool.return_buffer(buffer, self.generation);
                }
            }
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("capacity", &self.buffer.as_ref().map(|b| b.capacity()))
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

/// Pool of fixed-size native buffers.
///
/// The pool is constructed uninitialized; `initialize` pre-allocates the
/// configured number of buffers and `shutdown` releases them. Checkout never
/// blocks on an empty free list: a new buffer of the same size is allocated
/// and becomes part of the pool when it is returned.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

impl BufferPool {
    /// Create an uninitialized pool
    pub fn new(config: BufferPoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(BufferPoolInner {
                state: Mutex::new(PoolState::default()),
                config,
            }),
        })
    }

    /// Create and initialize a pool in one step
    pub fn with_config(config: BufferPoolConfig) -> Result<Self, PoolError> {
        let pool = Self::new(config)?;
        pool.initialize()?;
        Ok(pool)
    }

    /// Pre-allocate the configured buffers.
    pub fn initialize(&self) -> Result<(), PoolError> {
        let mut state = self.inner.state.lock();
        if state.initialized {
            return Err(PoolError::AlreadyInitialized);
        }

        let count = self.inner.config.pre_allocated as usize;
        let size = self.inner.config.buffer_size;
        state.free = (0..count).map(|_| NativeBuffer::zeroed(size)).collect();
        state.allocations = count as u64;
        state.deallocations = 0;
        state.total_buffers = count as u64;
        state.initialized = true;
        Ok(())
    }

    /// Release every pooled buffer and return the final statistics.
    ///
    /// Buffers still checked out stay valid memory for their holders and are
    /// dropped instead of pooled when they come back.
    pub fn shutdown(&self) -> Result<BufferPoolStats, PoolError> {
        let mut state = self.inner.state.lock();
        if !state.initialized {
            return Err(PoolError::NotInitialized);
        }

        let released = state.free.len() as u64;
        let mut stats = Self::snapshot(&state);
        stats.deallocations += released;
        stats.total_buffers -= released;
        stats.free_buffers = 0;

        let generation = state.generation + 1;
        *state = PoolState {
            generation,
            ..PoolState::default()
        };
        Ok(stats)
    }

    /// Whether `initialize` has run
    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().initialized
    }

    /// Take a buffer from the free list, or allocate a new one if empty
    pub fn checkout(&self) -> Result<PooledBuffer, PoolError> {
        let (buffer, generation) = {
            let mut state = self.inner.state.lock();
            if !state.initialized {
                return Err(PoolError::NotInitialized);
            }
            let buffer = match state.free.pop() {
                Some(buf) => buf,
                None => {
                    state.allocations += 1;
                    state.total_buffers += 1;
                    if tracing::enabled!(tracing::Level::DEBUG) {
                        debug!(
                            total = state.total_buffers,
                            "native buffer free list empty, allocating"
                        );
                    }
                    NativeBuffer::zeroed(self.inner.config.buffer_size)
                }
            };
            (buffer, state.generation)
        };

        Ok(PooledBuffer {
            buffer: Some(buffer),
            pool: Some(Arc::downgrade(&self.inner)),
            generation,
        })
    }

    /// Consistent statistics snapshot
    pub fn stats(&self) -> BufferPoolStats {
        Self::snapshot(&self.inner.state.lock())
    }

    /// Get the configured buffer size
    pub fn buffer_size(&self) -> u32 {
        self.inner.config.buffer_size
    }

    /// Get the pool configuration
    pub fn config(&self) -> BufferPoolConfig {
        self.inner.config
    }

    fn snapshot(state: &PoolState) -> BufferPoolStats {
        BufferPoolStats {
            allocations: state.allocations,
            deallocations: state.deallocations,
            total_buffers: state.total_buffers,
            free_buffers: state.free.len() as u64,
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
