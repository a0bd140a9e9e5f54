//! A thread-safe pool of reusable page buffers (§5's "page buffers come from
//! a thread-safe pool"), backed by an LRU over fixed-size `Vec<u8>`s.
//!
//! Grounded on the capacity-bounded, metrics-counted texture of the
//! teacher's page-cache core: a bounded pool with hit/miss counters, guarded
//! by a single lock rather than per-entry locking since buffers are cheap to
//! move in and out.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

#[derive(Debug, Default, Clone, Copy)]
pub struct BufferPoolMetrics {
    pub rents: u64,
    pub reuses: u64,
    pub returns: u64,
}

struct Inner {
    free: LruCache<u64, Vec<u8>>,
    next_slot: u64,
    metrics: BufferPoolMetrics,
}

/// Rents page-sized buffers out to callers and reclaims them on return.
///
/// The async B+Tree cursor rents one buffer per page fetch and MUST return
/// it before crossing an `await` point — holding a rented buffer across a
/// suspension point violates the pool's single-owner invariant.
pub struct BufferPool {
    page_size: usize,
    inner: Mutex<Inner>,
}

/// A rented buffer. Dropping it without calling `release` leaks the slot
/// from the pool's bookkeeping (the `Vec` itself is still freed normally);
/// callers should always go through `BufferPool::release`.
pub struct RentedBuffer {
    pub bytes: Vec<u8>,
    slot: u64,
}

impl BufferPool {
    #[must_use]
    pub fn new(page_size: usize, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            page_size,
            inner: Mutex::new(Inner { free: LruCache::new(capacity), next_slot: 0, metrics: BufferPoolMetrics::default() }),
        }
    }

    /// Rents a zeroed page-sized buffer, reusing a pooled allocation if one
    /// is free.
    pub fn rent(&self) -> RentedBuffer {
        let mut inner = self.inner.lock();
        inner.metrics.rents += 1;
        if let Some((&slot, _)) = inner.free.iter().next() {
            let mut bytes = inner.free.pop(&slot).unwrap();
            bytes.clear();
            bytes.resize(self.page_size, 0);
            inner.metrics.reuses += 1;
            return RentedBuffer { bytes, slot };
        }
        let slot = inner.next_slot;
        inner.next_slot += 1;
        RentedBuffer { bytes: vec![0u8; self.page_size], slot }
    }

    /// Returns a buffer to the pool. Must be called before the renting
    /// future yields; see the module docs.
    pub fn release(&self, buf: RentedBuffer) {
        let mut inner = self.inner.lock();
        inner.metrics.returns += 1;
        inner.free.put(buf.slot, buf.bytes);
    }

    #[must_use]
    pub fn metrics(&self) -> BufferPoolMetrics {
        self.inner.lock().metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_then_release_reuses_allocation() {
        let pool = BufferPool::new(16384, 4);
        let a = pool.rent();
        assert_eq!(a.bytes.len(), 16384);
        pool.release(a);
        let b = pool.rent();
        assert_eq!(pool.metrics().reuses, 1);
        pool.release(b);
    }
}
