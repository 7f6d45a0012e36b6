//! Word-aligned native buffer pool.
//!
//! Request and response buffers handed to the native engine come from this
//! pool. A [`PooledBuffer`] goes back to the free list when it is dropped, so
//! every exit path of the code holding it returns the buffer exactly once.

mod native_pool;

pub use native_pool::{
    BufferPool, BufferPoolConfig, BufferPoolStats, NativeBuffer, PoolError, PooledBuffer,
};
