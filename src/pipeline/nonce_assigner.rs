//! Stage 2: Nonce Assigner (spec §4.3). One per peer.

use std::sync::Arc;

use crate::device::Device;
use crate::keys::KeyPair;
use crate::peer::Peer;
use crate::work::WorkElement;

/// Wait until the peer's current key pair is usable, or until the peer or
/// device is stopped (spec §4.3 step 1). `flushNonceQueue` drains the
/// peer's nonce queue and keeps waiting rather than returning a key.
async fn await_usable_key(device: &Device, peer: &Peer) -> Option<Arc<KeyPair>> {
    loop {
        if let Some(key_pair) = peer.current_key_pair() {
            if key_pair.is_usable() {
                return Some(key_pair);
            }
        }

        peer.handshake_begin.notify_one();

        tokio::select! {
            biased;
            _ = device.stop.cancelled() => return None,
            _ = peer.stop.cancelled() => return None,
            _ = peer.flush_nonce_queue.notified() => {
                // A flush abandons not just the queued elements but also
                // whichever element this call is currently blocked on
                // waiting for a key (spec §4.3 step 1, §9) — the caller
                // reclaims that one's buffer on a `None` return.
                for abandoned in peer.nonce_queue.drain() {
                    device.buffers.release(abandoned.take_buffer());
                }
                return None;
            }
            _ = peer.new_key_pair.notified() => {}
        }
    }
}

pub async fn run(device: Arc<Device>, peer: Arc<Peer>) {
    loop {
        let element = tokio::select! {
            biased;
            _ = device.stop.cancelled() => return,
            _ = peer.stop.cancelled() => return,
            popped = peer.nonce_queue.pop() => match popped {
                Some(element) => element,
                None => return,
            },
        };

        assign_and_publish(&device, &peer, element).await;
    }
}

async fn assign_and_publish(device: &Device, peer: &Peer, element: Arc<WorkElement>) {
    let Some(key_pair) = await_usable_key(device, peer).await else {
        device.buffers.release(element.take_buffer());
        return;
    };

    let Some(nonce) = key_pair.assign_nonce() else {
        // Key exhausted its nonce budget between the usability check and
        // the assignment; abandon this element. The next loop iteration
        // will re-check usability (and likely raise handshakeBegin again)
        // before the following element is assigned.
        device.buffers.release(element.take_buffer());
        return;
    };

    element.assign(nonce, key_pair);

    // The encryption-queue enqueue must precede the outbound enqueue so
    // stage 3 cannot observe the element only after stage 4 has already
    // started waiting on its lock (spec §4.3 step 3).
    device.encryption_queue.push(element.clone());

    if let Some(evicted) = peer.outbound_queue.push(element) {
        reclaim_once_sealed(device, evicted);
    }
}

/// An element evicted from the outbound queue may still be mid-flight
/// through the encryption queue. Its buffer can only be reclaimed once
/// stage 3 (or the encryption queue's own eviction path) has released its
/// completion lock, so wait for that off to the side rather than blocking
/// this peer's assigner loop.
fn reclaim_once_sealed(device: &Device, element: Arc<WorkElement>) {
    let buffers = device.buffers.clone();
    tokio::spawn(async move {
        let _ = element.lock.acquire().await;
        buffers.release(element.take_buffer());
    });
}
