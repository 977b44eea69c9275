//! Memory accounting of the aggregation workspace
//!
//! Every batch buffer reserves its bytes from a process-wide [`MemoryPool`] before the
//! allocation happens, the [`MemoryReservation`] gives them back when the buffer is
//! dropped. The pool is greedy: the first come gets the memory. The memory governor
//! that watches the process runs on its own thread, it can only ask the operators to
//! reduce memory via [`ReduceMemorySignal`]

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};
use std::sync::atomic::{AtomicBool, AtomicUsize};

use crossbeam_utils::CachePadded;
use granary_vector::aligned_vec::AllocError;
use snafu::Snafu;

use crate::error::{Classify, ErrorClass};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MemoryError {
    #[snafu(display(
        "Failed to reserve `{requested}` bytes from the memory pool, `{used}` of `{limit}` bytes are in use"
    ))]
    Exhausted {
        requested: usize,
        used: usize,
        limit: usize,
    },
    #[snafu(display("Failed to allocate the batch buffer"))]
    Alloc { source: AllocError },
}

/// Result type of the memory module
pub type Result<T> = std::result::Result<T, MemoryError>;

impl Classify for MemoryError {
    #[inline]
    fn class(&self) -> ErrorClass {
        ErrorClass::Retryable
    }
}

/// Greedy memory pool shared by all of the accumulator sets in the process
pub struct MemoryPool {
    /// `None` means unbounded
    limit: Option<usize>,
    used: CachePadded<AtomicUsize>,
}

impl MemoryPool {
    /// Create a pool that can hand out at most `limit` bytes
    #[inline]
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: Some(limit),
            used: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Create a pool without limit, reservations are only tracked
    #[inline]
    pub fn unbounded() -> Arc<Self> {
        Arc::new(Self {
            limit: None,
            used: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Limit of the pool
    #[inline]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Bytes currently reserved
    #[inline]
    pub fn reserved(&self) -> usize {
        self.used.load(Relaxed)
    }

    /// Bytes that can still be reserved
    #[inline]
    pub fn available(&self) -> usize {
        self.limit
            .map_or(usize::MAX, |limit| limit.saturating_sub(self.reserved()))
    }

    /// Try to reserve `bytes` from the pool
    pub fn try_reserve(self: &Arc<Self>, bytes: usize) -> Result<MemoryReservation> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.used
            .fetch_update(AcqRel, Acquire, |used| {
                used.checked_add(bytes).filter(|&new_used| new_used <= limit)
            })
            .map_err(|used| MemoryError::Exhausted {
                requested: bytes,
                used,
                limit,
            })?;

        Ok(MemoryReservation {
            pool: Arc::clone(self),
            size: bytes,
        })
    }

    #[inline]
    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, AcqRel);
    }
}

impl Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("limit", &self.limit)
            .field("reserved", &self.reserved())
            .finish()
    }
}

/// Bytes reserved from the [`MemoryPool`], they are released when the reservation is
/// dropped
pub struct MemoryReservation {
    pool: Arc<MemoryPool>,
    size: usize,
}

impl MemoryReservation {
    /// Number of bytes reserved
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MemoryReservation {
    #[inline]
    fn drop(&mut self) {
        self.pool.release(self.size);
    }
}

impl Debug for MemoryReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryReservation")
            .field("size", &self.size)
            .finish()
    }
}

/// Flag raised by the memory governor when it wants the operators to release memory.
/// Cloning it shares the flag
#[derive(Debug, Clone, Default)]
pub struct ReduceMemorySignal(Arc<AtomicBool>);

impl ReduceMemorySignal {
    /// Create a new signal that is not raised
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the operators to reduce memory
    #[inline]
    pub fn raise(&self) {
        self.0.store(true, Relaxed);
    }

    /// Returns true if the signal is raised
    #[inline]
    pub fn is_raised(&self) -> bool {
        self.0.load(Relaxed)
    }

    /// Consume the signal. Returns true if it was raised
    #[inline]
    pub fn take(&self) -> bool {
        self.0.swap(false, Relaxed)
    }
}
