//! Reusable byte buffers for read streams.
//!
//! Every open read stream holds one read-ahead buffer for its whole lifetime.
//! Opening many short-lived streams would otherwise allocate a fresh multi-MB
//! buffer per open, so released buffers are parked here and handed to the
//! next stream that asks for the same size.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                    BufferPool                      │
//! │  ┌─────────────────────────────────────────────┐  │
//! │  │  idle: HashMap<usize, Vec<Vec<u8>>>         │  │
//! │  │  idle_count / in_use_count                  │  │
//! │  └─────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────┘
//!
//! PooledBuffer:
//!   - data: Vec<u8> (exclusively owned while checked out)
//!   - pool: Arc<Mutex<BufferPoolInner>> (return path on drop)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let pool = BufferPool::new(BufferPoolConfig::default());
//! let mut buffer = pool.acquire(4 * 1024 * 1024);
//! let n = handle.read(&mut buffer, offset)?;
//! // Buffer goes back to the pool on drop
//! ```

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;

use cfs_ufs_common::DEFAULT_MAX_IDLE_BUFFERS;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the buffer pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Maximum number of released buffers kept for reuse, across all sizes.
    /// Zero disables reuse.
    pub max_idle_buffers: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_buffers: DEFAULT_MAX_IDLE_BUFFERS,
        }
    }
}

impl BufferPoolConfig {
    /// Create a configuration with a custom idle ceiling.
    ///
    /// # Arguments
    /// * `max_idle_buffers` - Maximum number of parked buffers
    pub fn with_max_idle(max_idle_buffers: usize) -> Self {
        Self { max_idle_buffers }
    }
}

// ============================================================================
// Pooled Buffer
// ============================================================================

/// RAII handle to a buffer checked out of the pool.
///
/// Dereferences to a byte slice of exactly the requested size. The buffer is
/// returned to its pool when dropped.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<Mutex<BufferPoolInner>>,
}

impl PooledBuffer {
    /// Size of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer has zero length.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data: Vec<u8> = std::mem::take(&mut self.data);
        lock(&self.pool).release(data);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

// ============================================================================
// Buffer Pool Inner
// ============================================================================

/// Internal state of the buffer pool.
struct BufferPoolInner {
    /// Configuration for this pool.
    config: BufferPoolConfig,
    /// Parked buffers keyed by length.
    idle: HashMap<usize, Vec<Vec<u8>>>,
    /// Total number of parked buffers.
    idle_count: usize,
    /// Buffers currently checked out.
    in_use_count: usize,
}

impl BufferPoolInner {
    fn new(config: BufferPoolConfig) -> Self {
        Self {
            config,
            idle: HashMap::new(),
            idle_count: 0,
            in_use_count: 0,
        }
    }

    /// Take a parked buffer of exactly `size` bytes, if any.
    fn take(&mut self, size: usize) -> Option<Vec<u8>> {
        let data: Vec<u8> = self.idle.get_mut(&size)?.pop()?;
        self.idle_count -= 1;
        Some(data)
    }

    /// Park a released buffer, or drop it when the pool is full.
    ///
    /// # Arguments
    /// * `data` - The buffer being returned
    fn release(&mut self, data: Vec<u8>) {
        self.in_use_count = self.in_use_count.saturating_sub(1);
        if data.is_empty() || self.idle_count >= self.config.max_idle_buffers {
            return;
        }
        self.idle.entry(data.len()).or_default().push(data);
        self.idle_count += 1;
    }

    fn stats(&self) -> BufferPoolStats {
        let idle_bytes: u64 = self
            .idle
            .iter()
            .map(|(size, buffers)| (*size as u64) * buffers.len() as u64)
            .sum();
        BufferPoolStats {
            idle_buffers: self.idle_count,
            in_use_buffers: self.in_use_count,
            idle_bytes,
            max_idle_buffers: self.config.max_idle_buffers,
        }
    }
}

fn lock(inner: &Mutex<BufferPoolInner>) -> MutexGuard<'_, BufferPoolInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Buffer Pool Stats
// ============================================================================

/// Statistics about the buffer pool state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers parked for reuse.
    pub idle_buffers: usize,
    /// Buffers currently held by streams.
    pub in_use_buffers: usize,
    /// Total bytes held by parked buffers.
    pub idle_bytes: u64,
    /// Configured idle ceiling.
    pub max_idle_buffers: usize,
}

// ============================================================================
// Buffer Pool (Public API)
// ============================================================================

/// Thread-safe pool of reusable byte buffers.
pub struct BufferPool {
    inner: Arc<Mutex<BufferPoolInner>>,
    allocation_count: AtomicU64,
    hit_count: AtomicU64,
}

impl BufferPool {
    /// Create a new buffer pool.
    ///
    /// # Arguments
    /// * `config` - Pool configuration
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferPoolInner::new(config))),
            allocation_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
        }
    }

    /// Check out a buffer of exactly `size` bytes.
    ///
    /// Reuses a parked buffer of the same size when one exists, otherwise
    /// allocates. Reused buffers are not cleared.
    ///
    /// # Arguments
    /// * `size` - Buffer length in bytes
    pub fn acquire(&self, size: usize) -> PooledBuffer {
        let reused: Option<Vec<u8>> = {
            let mut inner: MutexGuard<'_, BufferPoolInner> = lock(&self.inner);
            inner.in_use_count += 1;
            inner.take(size)
        };
        let data: Vec<u8> = match reused {
            Some(data) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                data
            }
            None => {
                self.allocation_count.fetch_add(1, Ordering::Relaxed);
                vec![0u8; size]
            }
        };
        PooledBuffer {
            data,
            pool: self.inner.clone(),
        }
    }

    /// Get pool statistics.
    pub fn stats(&self) -> BufferPoolStats {
        lock(&self.inner).stats()
    }

    /// Get the total number of fresh allocations since pool creation.
    pub fn allocation_count(&self) -> u64 {
        self.allocation_count.load(Ordering::Relaxed)
    }

    /// Get the total number of reused buffers since pool creation.
    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    /// Calculate the reuse rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let hits: u64 = self.hit_count.load(Ordering::Relaxed);
        let allocs: u64 = self.allocation_count.load(Ordering::Relaxed);
        let total: u64 = hits + allocs;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    /// Drop every parked buffer.
    pub fn clear(&self) {
        let mut inner: MutexGuard<'_, BufferPoolInner> = lock(&self.inner);
        inner.idle.clear();
        inner.idle_count = 0;
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BufferPoolConfig::default())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("stats", &self.stats())
            .field("allocation_count", &self.allocation_count())
            .field("hit_count", &self.hit_count())
            .finish()
    }
}
