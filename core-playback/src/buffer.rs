//! # Sample Buffers
//!
//! Memory handed to the host for each sample, and the pool that recycles it.
//!
//! ## Ownership
//!
//! ```text
//!              acquire()                      last drop
//! BufferPool ────────────► PooledBuffer ─► ... ─────────► back to pool
//!                              │
//!                 decoder (direct path) / scaler / host
//! ```
//!
//! A [`PooledBuffer`] is owned by exactly one holder at a time. Wrapping it
//! in a [`SampleBuffer`] makes it shareable; the region returns to its pool
//! when the last reference drops, or is freed if the pool is gone.

use crate::error::{PlaybackError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_free: usize,
    allocated: AtomicU64,
    recycled: AtomicU64,
    outstanding: AtomicUsize,
}

/// Pool of equally sized byte regions.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool of `buffer_size`-byte regions, pre-allocating `initial`.
    pub fn new(buffer_size: usize, initial: usize) -> Result<Self> {
        let mut free = Vec::with_capacity(initial);
        for _ in 0..initial {
            free.push(allocate_region(buffer_size)?);
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                buffer_size,
                max_free: initial.max(4),
                allocated: AtomicU64::new(initial as u64),
                recycled: AtomicU64::new(0),
                outstanding: AtomicUsize::new(0),
            }),
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Take a region from the pool, allocating when none is free.
    ///
    /// Recycled regions keep their previous contents.
    pub fn acquire(&self) -> Result<PooledBuffer> {
        let recycled = self.inner.free.lock().pop();
        let data = match recycled {
            Some(data) => {
                self.inner.recycled.fetch_add(1, Ordering::Relaxed);
                data
            }
            None => {
                let data = allocate_region(self.inner.buffer_size)?;
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                data
            }
        };
        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);

        Ok(PooledBuffer {
            data,
            pool: Arc::downgrade(&self.inner),
        })
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.inner.free.lock().len(),
            outstanding: self.inner.outstanding.load(Ordering::Relaxed),
            total_allocated: self.inner.allocated.load(Ordering::Relaxed),
            total_recycled: self.inner.recycled.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.inner.buffer_size)
            .field("stats", &self.stats())
            .finish()
    }
}

fn allocate_region(size: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|e| PlaybackError::OutOfMemory(format!("{} byte buffer: {}", size, e)))?;
    data.resize(size, 0);
    Ok(data)
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub available: usize,
    pub outstanding: usize,
    pub total_allocated: u64,
    pub total_recycled: u64,
}

/// A region checked out of a [`BufferPool`].
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Weak<PoolInner>,
}

impl PooledBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

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

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        pool.outstanding.fetch_sub(1, Ordering::Relaxed);

        if self.data.len() != pool.buffer_size {
            return;
        }
        let mut free = pool.free.lock();
        if free.len() < pool.max_free {
            free.push(std::mem::take(&mut self.data));
        }
    }
}

/// Immutable sample payload handed to the host.
#[derive(Clone)]
pub enum SampleBuffer {
    /// Heap bytes (resampled audio).
    Shared(Bytes),
    /// A pooled region (direct-decoded or scaled video).
    Pooled(Arc<PooledBuffer>),
}

impl SampleBuffer {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            SampleBuffer::Shared(bytes) => bytes,
            SampleBuffer::Pooled(buffer) => buffer,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, SampleBuffer::Pooled(_))
    }
}

impl From<Vec<u8>> for SampleBuffer {
    fn from(data: Vec<u8>) -> Self {
        SampleBuffer::Shared(Bytes::from(data))
    }
}

impl From<PooledBuffer> for SampleBuffer {
    fn from(buffer: PooledBuffer) -> Self {
        SampleBuffer::Pooled(Arc::new(buffer))
    }
}

impl AsRef<[u8]> for SampleBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleBuffer::Shared(bytes) => write!(f, "SampleBuffer::Shared({} bytes)", bytes.len()),
            SampleBuffer::Pooled(buffer) => {
                write!(f, "SampleBuffer::Pooled({} bytes)", buffer.len())
            }
        }
    }
}
