//! Bounded multi-producer/multi-consumer queues with drop-oldest
//! backpressure (spec §4.1).
//!
//! Both queue kinds are built over `crossbeam_channel::bounded`, which is
//! already a fixed-capacity MPMC FIFO. The drop-oldest policy is layered on
//! top by evicting one element with `try_recv` whenever `try_send` reports
//! the channel full, then retrying. Progress is guaranteed because the
//! channel is drained by exactly one element per eviction.
//!
//! `push` returns the evicted element, if any, rather than reclaiming its
//! buffer itself: what "reclaim" means differs per edge. An element evicted
//! from the nonce queue was never published anywhere else, so its buffer
//! can be released immediately. An element evicted from the outbound queue
//! may still be in flight through the encryption queue, so the caller must
//! wait for its completion lock before the buffer is safe to reuse (spec
//! §8, "Buffer conservation").

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

use crate::work::{release_lock, WorkElement};

/// Plain bounded queue used for the nonce and outbound queues. On overflow
/// the oldest element is marked dropped and handed back to the caller.
pub struct BoundedQueue {
    tx: Sender<Arc<WorkElement>>,
    rx: Receiver<Arc<WorkElement>>,
}

impl BoundedQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// Enqueue `item`, evicting the oldest queued element (marking it
    /// dropped) if the queue is full. Returns the evicted element, if any,
    /// for the caller to reclaim.
    #[must_use]
    pub fn push(&self, item: Arc<WorkElement>) -> Option<Arc<WorkElement>> {
        let mut item = item;
        let mut evicted = None;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(rejected)) => {
                    item = rejected;
                    if let Ok(oldest) = self.rx.try_recv() {
                        oldest.mark_dropped();
                        evicted = Some(oldest);
                    }
                    // If try_recv raced with another consumer and found
                    // nothing, the queue just gained room on its own; retry.
                }
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    pub fn try_pop(&self) -> Option<Arc<WorkElement>> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Async pop used by the consuming stage's loop.
    pub async fn pop(&self) -> Option<Arc<WorkElement>> {
        // crossbeam_channel is not async-aware; a spin-yield keeps this
        // cooperative within the tokio runtime without pulling in a second
        // channel implementation for the consumer side.
        loop {
            match self.rx.try_recv() {
                Ok(item) => return Some(item),
                Err(TryRecvError::Empty) => tokio::task::yield_now().await,
                Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Drain all queued elements without passing them downstream. Returning
    /// their buffers to the pool is the caller's responsibility (spec §4.1,
    /// "Flush" — draining must still reclaim buffers since they haven't been
    /// re-typed as ciphertext yet).
    pub fn drain(&self) -> Vec<Arc<WorkElement>> {
        let mut drained = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            drained.push(item);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Device-wide encryption queue. Same drop-oldest policy as `BoundedQueue`,
/// but additionally releases the evicted element's completion lock, since
/// stage 2 acquired (held) the lock before enqueueing and stage 3 would
/// otherwise be the only releaser (spec §4.1). The element itself is still
/// live in the peer's outbound queue, so its buffer is reclaimed from
/// there, not here.
pub struct EncryptionQueue {
    inner: BoundedQueue,
}

impl EncryptionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedQueue::new(capacity),
        }
    }

    pub fn push(&self, item: Arc<WorkElement>) {
        if let Some(evicted) = self.inner.push(item) {
            release_lock(&evicted.lock);
        }
    }

    pub async fn pop(&self) -> Option<Arc<WorkElement>> {
        self.inner.pop().await
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerBuilder;
    use bytes::BytesMut;
    use std::net::SocketAddr;

    fn dummy_peer() -> Arc<crate::peer::Peer> {
        PeerBuilder::new("test".into(), "127.0.0.1:51820".parse::<SocketAddr>().unwrap()).build()
    }

    fn dummy_element(peer: &Arc<crate::peer::Peer>) -> Arc<WorkElement> {
        WorkElement::new(BytesMut::zeroed(64), 32, peer.clone())
    }

    #[test]
    fn drop_oldest_on_full_plain_queue() {
        let peer = dummy_peer();
        let q = BoundedQueue::new(2);
        assert!(q.push(dummy_element(&peer)).is_none());
        let second = dummy_element(&peer);
        let second_dropped = second.clone();
        assert!(q.push(second).is_none());
        let third = dummy_element(&peer);
        let evicted = q.push(third);

        // Capacity 2: pushing a 3rd element evicts the 1st (oldest).
        assert_eq!(q.len(), 2);
        assert!(evicted.is_some());
        assert!(evicted.unwrap().is_dropped());
        assert!(!second_dropped.is_dropped());
    }

    #[test]
    fn encryption_queue_releases_lock_on_eviction() {
        let peer = dummy_peer();
        let q = EncryptionQueue::new(1);
        let first = dummy_element(&peer);
        let first_lock = first.lock.clone();
        q.push(first);
        q.push(dummy_element(&peer));

        // The evicted element's lock must now be acquirable without blocking.
        assert!(first_lock.try_acquire().is_ok());
    }
}
