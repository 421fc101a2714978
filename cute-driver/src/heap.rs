//! Heap payload storage and allocation accounting.
//!
//! A [`HeapBuffer`] is the memory a `HEAP_OK` envelope points at. Cloning
//! it clones the reference, never the bytes, so writes through one clone are
//! visible through every envelope built from it.
//!
//! Buffers a task allocates for its results go through a [`HeapLedger`],
//! which counts live allocations. The task owns the returned
//! [`TrackedBuffer`]; dropping it (which happens when the task is destroyed)
//! records the release. A ledger that reads zero live allocations after a
//! lifecycle has neither leaked nor double-released.

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;

use crate::tracing::prelude::*;

/// Shared byte buffer with reference semantics.
#[derive(Clone, Default)]
pub struct HeapBuffer {
    inner: Arc<RwLock<Vec<u8>>>,
}

impl HeapBuffer {
    /// Wrap bytes allocated by the caller. Not tracked by any ledger.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.inner.write()
    }

    /// Copy the current contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.read().clone()
    }

    /// True when both values refer to the same allocation.
    pub fn ptr_eq(&self, other: &HeapBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Identity comparison: two buffers are equal when they are the same memory.
impl PartialEq for HeapBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for HeapBuffer {}

impl fmt::Debug for HeapBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapBuffer").field("len", &self.len()).finish()
    }
}

/// Point-in-time view of a ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// Allocations not yet released
    pub live: usize,
    /// Bytes held by live allocations
    pub live_bytes: usize,
    /// Allocations ever made
    pub allocated: usize,
    /// Allocations ever released
    pub released: usize,
}

/// Allocation accounting for task-owned heap payloads.
///
/// Cheap to clone; clones share the same counters.
#[derive(Clone, Default)]
pub struct HeapLedger {
    counts: Arc<Mutex<LedgerSnapshot>>,
}

impl HeapLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a tracked buffer holding `data`.
    pub fn allocate(&self, data: Vec<u8>) -> TrackedBuffer {
        let bytes = data.len();
        {
            let mut counts = self.counts.lock();
            counts.live += 1;
            counts.live_bytes += bytes;
            counts.allocated += 1;
        }
        trace!(len = bytes, "Heap payload allocated");
        TrackedBuffer {
            buffer: HeapBuffer::new(data),
            bytes,
            ledger: self.clone(),
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        *self.counts.lock()
    }

    pub fn live(&self) -> usize {
        self.counts.lock().live
    }

    fn release(&self, bytes: usize) {
        let mut counts = self.counts.lock();
        counts.live = counts.live.saturating_sub(1);
        counts.live_bytes = counts.live_bytes.saturating_sub(bytes);
        counts.released += 1;
    }
}

impl fmt::Debug for HeapLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HeapLedger").field(&self.snapshot()).finish()
    }
}

/// A ledger allocation owned by exactly one task.
///
/// Not `Clone`: the release is recorded once, when this value is dropped.
/// Envelopes may still hold the inner [`HeapBuffer`] reference afterwards;
/// the memory stays valid for them, but the task no longer owns it.
pub struct TrackedBuffer {
    buffer: HeapBuffer,
    bytes: usize,
    ledger: HeapLedger,
}

impl TrackedBuffer {
    pub fn buffer(&self) -> &HeapBuffer {
        &self.buffer
    }
}

impl Drop for TrackedBuffer {
    fn drop(&mut self) {
        self.ledger.release(self.bytes);
        trace!(len = self.bytes, "Heap payload released");
    }
}

impl fmt::Debug for TrackedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedBuffer").field("len", &self.bytes).finish()
    }
}
