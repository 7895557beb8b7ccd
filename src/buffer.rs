//! Fixed-capacity buffer pool.
//!
//! Every work element's buffer is checked out of this pool by the TUN reader
//! and returned by the sequential sender (success or failure) or by whoever
//! drops the element along the way (spec §3, "Buffer conservation").

use std::sync::Arc;

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;

use crate::constants::MAX_MESSAGE_SIZE;

/// Thread-safe free-list of fixed-size buffers.
///
/// Buffers are pre-sized to `MAX_MESSAGE_SIZE` and always carry enough
/// leading space for the transport header, so sealing can happen in place
/// (spec §3: "It always contains enough leading space for the transport
/// header so sealing can be in-place").
pub struct BufferPool {
    free: ArrayQueue<BytesMut>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = free.push(Self::fresh_buffer());
        }
        Arc::new(Self { free })
    }

    fn fresh_buffer() -> BytesMut {
        let mut buf = BytesMut::with_capacity(MAX_MESSAGE_SIZE);
        buf.resize(MAX_MESSAGE_SIZE, 0);
        buf
    }

    /// Check out a buffer, allocating a fresh one if the pool is momentarily
    /// empty rather than blocking the TUN reader — the pool bounds steady
    /// state memory, not the worst case under a burst.
    pub fn checkout(&self) -> BytesMut {
        self.free.pop().unwrap_or_else(Self::fresh_buffer)
    }

    /// Return a buffer for reuse. Buffers beyond capacity (from an overflow
    /// allocation) are simply dropped.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        buf.resize(MAX_MESSAGE_SIZE, 0);
        let _ = self.free.push(buf);
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_and_release_round_trips() {
        let pool = BufferPool::new(4);
        assert_eq!(pool.available(), 4);

        let buf = pool.checkout();
        assert_eq!(buf.len(), MAX_MESSAGE_SIZE);
        assert_eq!(pool.available(), 3);

        pool.release(buf);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn checkout_beyond_capacity_allocates_fresh() {
        let pool = BufferPool::new(1);
        let a = pool.checkout();
        let b = pool.checkout();
        assert_eq!(a.len(), MAX_MESSAGE_SIZE);
        assert_eq!(b.len(), MAX_MESSAGE_SIZE);
    }
}
