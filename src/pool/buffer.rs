//! Size-classed, lock-free array pool.
//!
//! Buffers are bucketed by power-of-two length. Each bucket is a bounded
//! lock-free queue, so rent and return from any number of threads never take
//! a lock.

use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{BufferId, PoolId};

/// Smallest size class, in elements.
pub const MIN_BUCKET_LENGTH: usize = 16;

/// Default length of the largest size class (1M elements).
pub const DEFAULT_MAX_ARRAY_LENGTH: usize = 1024 * 1024;

/// Default number of idle buffers retained per size class.
pub const DEFAULT_MAX_ARRAYS_PER_BUCKET: usize = 64;

/// Upper bound accepted for the largest size class (1G elements).
const MAX_SUPPORTED_LENGTH: usize = 1 << 30;

/// Larger classes probed on a miss before allocating.
const PROBE_CLASSES: usize = 2;

/// Relaxed ordering for statistics counters.
const RELAXED: Ordering = Ordering::Relaxed;

/// Element types a pool can hold.
///
/// `Default` supplies the value written by allocation and [`Buffer::clear`].
pub trait Element: Clone + Default + Send + Sync + 'static {}

impl<T: Clone + Default + Send + Sync + 'static> Element for T {}

/// A fixed-length array rented from an [`ArrayPool`].
///
/// The length is the size class the request was rounded up to, so it may be
/// larger than what was asked for. A buffer is not `Clone`: giving it back to
/// the pool consumes it, which rules out double returns.
pub struct Buffer<T> {
    data: Box<[T]>,
    id: BufferId,
    owner: PoolId,
    /// Size class index, or `None` for oversized one-off allocations.
    class: Option<usize>,
}

impl<T: Element> Buffer<T> {
    /// Stable identity of the backing storage.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Pool that allocated this buffer.
    #[inline]
    pub fn owner(&self) -> PoolId {
        self.owner
    }

    /// Whether the buffer will be recycled when returned.
    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.class.is_some()
    }

    /// Reset every element to `T::default()`.
    #[inline]
    pub fn clear(&mut self) {
        self.data.fill(T::default());
    }

    /// Read every element, returning the last one.
    #[inline]
    pub fn scan(&self) -> Option<&T> {
        let mut last = None;
        for item in self.data.iter() {
            last = Some(std::hint::black_box(item));
        }
        last
    }
}

impl<T> Deref for Buffer<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<T> DerefMut for Buffer<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl<T> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Thread-safe pool of reusable fixed-length arrays.
pub struct ArrayPool<T> {
    id: PoolId,
    /// One queue of idle buffers per size class.
    buckets: Box<[ArrayQueue<Buffer<T>>]>,
    /// Length of the largest size class.
    max_array_length: usize,
    next_buffer_id: AtomicU64,
    /// Statistics: rents served from a bucket.
    hits: AtomicUsize,
    /// Statistics: rents that allocated.
    misses: AtomicUsize,
    /// Statistics: buffers given back.
    returns: AtomicUsize,
    /// Statistics: returned buffers discarded (bucket full or oversized).
    drops: AtomicUsize,
    /// Buffers rented and not yet returned.
    outstanding: AtomicUsize,
}

impl<T: Element> ArrayPool<T> {
    /// Create a private pool with the default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_ARRAY_LENGTH, DEFAULT_MAX_ARRAYS_PER_BUCKET)
    }

    /// Create a private pool.
    ///
    /// `max_array_length` is rounded up to a power of two and becomes the
    /// largest size class. Requests above it are served unpooled.
    pub fn with_limits(max_array_length: usize, max_arrays_per_bucket: usize) -> Self {
        let max_array_length = max_array_length
            .clamp(MIN_BUCKET_LENGTH, MAX_SUPPORTED_LENGTH)
            .next_power_of_two();
        let bucket_count = class_index(max_array_length) + 1;
        let per_bucket = max_arrays_per_bucket.max(1);

        Self {
            id: PoolId::next(),
            buckets: (0..bucket_count)
                .map(|_| ArrayQueue::new(per_bucket))
                .collect(),
            max_array_length,
            next_buffer_id: AtomicU64::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            returns: AtomicUsize::new(0),
            drops: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Identifier stamped on every buffer this pool allocates.
    #[inline]
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Length of the largest pooled size class.
    #[inline]
    pub fn max_array_length(&self) -> usize {
        self.max_array_length
    }

    /// Rent a buffer holding at least `min_length` elements.
    ///
    /// Tries the matching size class, then up to two larger classes, and
    /// allocates only when all of them are empty. Contents are whatever the
    /// previous renter left behind.
    pub fn rent(&self, min_length: usize) -> Buffer<T> {
        self.outstanding.fetch_add(1, RELAXED);

        if min_length > self.max_array_length {
            self.misses.fetch_add(1, RELAXED);
            return self.allocate(min_length, None);
        }

        let class = class_index(min_length);
        let last = (class + PROBE_CLASSES).min(self.buckets.len() - 1);
        for bucket in &self.buckets[class..=last] {
            if let Some(buf) = bucket.pop() {
                self.hits.fetch_add(1, RELAXED);
                return buf;
            }
        }

        self.misses.fetch_add(1, RELAXED);
        debug!(pool = %self.id, class, "allocating buffer of {} elements", class_length(class));
        self.allocate(class_length(class), Some(class))
    }

    /// Give a rented buffer back for reuse.
    ///
    /// Fails with [`Error::ForeignBuffer`] if another pool issued it. When
    /// the size class already retains its limit of idle buffers the buffer is
    /// dropped instead.
    pub fn return_buffer(&self, buffer: Buffer<T>) -> Result<()> {
        if buffer.owner != self.id {
            return Err(Error::ForeignBuffer {
                pool: self.id,
                owner: buffer.owner,
            });
        }

        self.outstanding.fetch_sub(1, RELAXED);
        self.returns.fetch_add(1, RELAXED);

        match buffer.class {
            Some(class) => {
                if let Err(buf) = self.buckets[class].push(buffer) {
                    self.drops.fetch_add(1, RELAXED);
                    debug!(pool = %self.id, class, "bucket full, dropping buffer {}", buf.id);
                }
            }
            None => {
                self.drops.fetch_add(1, RELAXED);
            }
        }
        Ok(())
    }

    fn allocate(&self, len: usize, class: Option<usize>) -> Buffer<T> {
        let id = self.next_buffer_id.fetch_add(1, RELAXED);
        Buffer {
            data: vec![T::default(); len].into_boxed_slice(),
            id: BufferId::new(id),
            owner: self.id,
            class,
        }
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.len(),
            outstanding: self.outstanding(),
            hits: self.hits.load(RELAXED),
            misses: self.misses.load(RELAXED),
            returns: self.returns.load(RELAXED),
            drops: self.drops.load(RELAXED),
        }
    }

    /// Buffers rented and not yet returned.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(RELAXED)
    }

    /// Idle buffers across all size classes.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(ArrayQueue::len).sum()
    }

    /// Check if no idle buffer is retained.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(ArrayQueue::is_empty)
    }
}

impl<T: Element> Default for ArrayPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the smallest size class holding `len` elements.
#[inline]
fn class_index(len: usize) -> usize {
    let len = len.max(MIN_BUCKET_LENGTH).next_power_of_two();
    (len.trailing_zeros() - MIN_BUCKET_LENGTH.trailing_zeros()) as usize
}

#[inline]
fn class_length(index: usize) -> usize {
    MIN_BUCKET_LENGTH << index
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Idle buffers retained.
    pub available: usize,
    /// Buffers currently rented.
    pub outstanding: usize,
    /// Rents served from a bucket.
    pub hits: usize,
    /// Rents that allocated.
    pub misses: usize,
    /// Buffers returned.
    pub returns: usize,
    /// Returned buffers discarded.
    pub drops: usize,
}

impl PoolStats {
    /// Total rent calls served.
    pub fn rents(&self) -> usize {
        self.hits + self.misses
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.rents();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
