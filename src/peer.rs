//! `Peer`: per-peer queues, signals, and reconfigurable state (spec §3).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::constants::DEFAULT_QUEUE_CAPACITY;
use crate::keys::KeyPair;
use crate::queue::BoundedQueue;

/// Single-slot notifications for `handshakeBegin`/`handshakeReset`/
/// `newKeyPair`/`flushNonceQueue` (spec §6: dropping repeated signals is
/// acceptable, which is exactly `Notify`'s `notify_one`/`notified` contract).
pub type Signal = tokio::sync::Notify;

/// One remote endpoint of the tunnel: its nonce/outbound queues, signals,
/// and the mutable state the nonce assigner and sequential sender read.
pub struct Peer {
    pub name: String,
    /// Feeds stage 2 (spec §3).
    pub nonce_queue: BoundedQueue,
    /// Feeds stage 4 (spec §3).
    pub outbound_queue: BoundedQueue,

    pub handshake_begin: Signal,
    pub handshake_reset: Signal,
    pub new_key_pair: Signal,
    pub flush_nonce_queue: Signal,
    pub stop: CancellationToken,

    endpoint: RwLock<SocketAddr>,
    current_key_pair: RwLock<Option<Arc<KeyPair>>>,

    /// Counts packets dropped for this peer across either queue, surfaced
    /// for diagnostics; not part of the pipeline's control flow.
    pub dropped_total: AtomicU64,
}

impl Peer {
    pub fn endpoint(&self) -> SocketAddr {
        *self.endpoint.read()
    }

    pub fn set_endpoint(&self, addr: SocketAddr) {
        *self.endpoint.write() = addr;
    }

    pub fn current_key_pair(&self) -> Option<Arc<KeyPair>> {
        self.current_key_pair.read().clone()
    }

    /// Install a freshly negotiated key pair and wake anything waiting on
    /// `newKeyPair` (spec §4.3 step 1).
    pub fn install_key_pair(&self, key_pair: Arc<KeyPair>) {
        *self.current_key_pair.write() = Some(key_pair);
        self.new_key_pair.notify_one();
    }

    pub fn record_drop(&self) {
        self.dropped_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct PeerBuilder {
    name: String,
    endpoint: SocketAddr,
    nonce_capacity: usize,
    outbound_capacity: usize,
}

impl PeerBuilder {
    pub fn new(name: String, endpoint: SocketAddr) -> Self {
        Self {
            name,
            endpoint,
            nonce_capacity: DEFAULT_QUEUE_CAPACITY,
            outbound_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn queue_capacity(mut self, nonce: usize, outbound: usize) -> Self {
        self.nonce_capacity = nonce;
        self.outbound_capacity = outbound;
        self
    }

    pub fn build(self) -> Arc<Peer> {
        Arc::new(Peer {
            name: self.name,
            nonce_queue: BoundedQueue::new(self.nonce_capacity),
            outbound_queue: BoundedQueue::new(self.outbound_capacity),
            handshake_begin: Signal::new(),
            handshake_reset: Signal::new(),
            new_key_pair: Signal::new(),
            flush_nonce_queue: Signal::new(),
            stop: CancellationToken::new(),
            endpoint: RwLock::new(self.endpoint),
            current_key_pair: RwLock::new(None),
            dropped_total: AtomicU64::new(0),
        })
    }
}
