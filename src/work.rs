//! The work element: a single packet's in-pipeline state (spec §3).
//!
//! An element is handed from the TUN reader to the nonce assigner, then
//! fans out to *both* the encryption queue and the peer's outbound queue
//! (spec §4.3 step 3) — the encryption worker and the sequential sender
//! observe the same element, not copies of it. That means every element is
//! `Arc`-shared from the moment it leaves the nonce assigner, and the parts
//! later stages mutate (the buffer, its valid packet length, the assigned
//! nonce/key) live behind a lock rather than as plain fields.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::constants::MESSAGE_TRANSPORT_HEADER_SIZE;
use crate::keys::KeyPair;
use crate::peer::Peer;

/// The completion handle described in spec §9: created locked (0 permits) by
/// stage 2, released by stage 3 (or a drop path) with `add_permits(1)`,
/// awaited by stage 4 with `acquire()`. Using a semaphore instead of a bare
/// mutex makes "hold until done, then let exactly one waiter through" an
/// async-friendly operation instead of a blocking one.
pub type CompletionLock = Semaphore;

pub fn new_completion_lock() -> Arc<CompletionLock> {
    Arc::new(Semaphore::new(0))
}

/// Release the lock, allowing the sequential sender to proceed. Callers are
/// expected to call this exactly once per element, which the
/// single-producer-per-edge discipline of the pipeline guarantees.
pub fn release_lock(lock: &CompletionLock) {
    lock.add_permits(1);
}

/// The parts of an element that are written once by the nonce assigner and
/// then (for `buffer`/`packet_len`) again once by the encryption worker.
/// Guarded by one lock since the writers never contend — the assigner holds
/// exclusive access before publishing, the encryption worker's write is
/// serialized against the sender's read by the completion lock — but the
/// type system still requires interior mutability to reach through `Arc`.
struct WorkElementState {
    /// Pooled buffer; payload starts at `MESSAGE_TRANSPORT_HEADER_SIZE` until
    /// stage 3 seals it, after which `packet_len` covers header+ciphertext+tag.
    buffer: BytesMut,
    /// Valid length of `buffer`, i.e. the size of the current *packet* view
    /// (spec §3: "a view into buffer; initially the payload region ...
    /// later the ciphertext region").
    packet_len: usize,
    nonce: u64,
    key_pair: Option<Arc<KeyPair>>,
}

/// One packet's state as it moves from stage 1 through stage 4.
pub struct WorkElement {
    /// Length of the original IP payload before the header was written and
    /// before padding, so the encryption worker knows how much to pad.
    pub payload_len: usize,
    pub peer: Arc<Peer>,
    pub dropped: Arc<AtomicBool>,
    pub lock: Arc<CompletionLock>,
    state: Mutex<WorkElementState>,
}

impl WorkElement {
    /// Create a fresh element for a just-read IP packet. `buffer` must
    /// already carry the payload starting at `MESSAGE_TRANSPORT_HEADER_SIZE`.
    pub fn new(buffer: BytesMut, payload_len: usize, peer: Arc<Peer>) -> Arc<Self> {
        Arc::new(Self {
            payload_len,
            peer,
            dropped: Arc::new(AtomicBool::new(false)),
            lock: new_completion_lock(),
            state: Mutex::new(WorkElementState {
                packet_len: MESSAGE_TRANSPORT_HEADER_SIZE + payload_len,
                buffer,
                nonce: 0,
                key_pair: None,
            }),
        })
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    /// Stage 2: record the assigned nonce and key pair (spec §4.3 step 2).
    pub fn assign(&self, nonce: u64, key_pair: Arc<KeyPair>) {
        let mut state = self.state.lock();
        state.nonce = nonce;
        state.key_pair = Some(key_pair);
    }

    pub fn nonce(&self) -> u64 {
        self.state.lock().nonce
    }

    pub fn key_pair(&self) -> Option<Arc<KeyPair>> {
        self.state.lock().key_pair.clone()
    }

    /// Stage 3: pad the payload, seal it in place under `sealer`, and
    /// update the packet view to cover header+ciphertext+tag (spec §4.4
    /// steps 2-4). `mtu` is the interface MTU; the padded plaintext is
    /// capped at `mtu` minus the header and AEAD tag, so the sealed wire
    /// packet never exceeds the interface MTU (spec §6).
    pub fn seal(&self, sealer: &dyn crate::keys::Sealer, mtu: usize) -> Result<(), crate::keys::SealError> {
        use crate::constants::{AEAD_TAG_SIZE, PADDING_MULTIPLE};

        let mut state = self.state.lock();
        let nonce = state.nonce;
        let header_len = MESSAGE_TRANSPORT_HEADER_SIZE;
        let content_cap = mtu.saturating_sub(header_len + AEAD_TAG_SIZE);

        let padded_len = pad_len(self.payload_len, PADDING_MULTIPLE, content_cap);
        // Zero-fill the padding region; the payload itself was already
        // written by the TUN reader.
        for byte in &mut state.buffer[header_len + self.payload_len..header_len + padded_len] {
            *byte = 0;
        }

        let sealed_len = sealer.seal_in_place(nonce, &mut state.buffer, header_len, padded_len)?;
        debug_assert_eq!(sealed_len, header_len + padded_len + crate::constants::AEAD_TAG_SIZE);
        state.packet_len = sealed_len;
        Ok(())
    }

    /// Write the 16-byte transport header (spec §4.4 step 2) before sealing.
    pub fn write_header(&self, message_type: u32, remote_index: u32, nonce: u64) {
        let mut state = self.state.lock();
        let header = &mut state.buffer[..MESSAGE_TRANSPORT_HEADER_SIZE];
        header[0..4].copy_from_slice(&message_type.to_le_bytes());
        header[4..8].copy_from_slice(&remote_index.to_le_bytes());
        header[8..16].copy_from_slice(&nonce.to_le_bytes());
    }

    /// Stage 4: take ownership of the buffer for transmission or pool
    /// release, leaving an empty placeholder behind. Only ever called once
    /// per element, after its lock has been acquired.
    pub fn take_buffer(&self) -> BytesMut {
        let mut state = self.state.lock();
        std::mem::replace(&mut state.buffer, BytesMut::new())
    }

    pub fn packet_len(&self) -> usize {
        self.state.lock().packet_len
    }
}

/// Round `payload_len` up to a multiple of `multiple`, capped at `cap` (the
/// maximum plaintext content the sealed packet is allowed to carry, already
/// reduced by the caller for header/tag overhead).
fn pad_len(payload_len: usize, multiple: usize, cap: usize) -> usize {
    let padded = payload_len.div_ceil(multiple) * multiple;
    padded.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_len_rounds_up_to_multiple() {
        assert_eq!(pad_len(1, 16, 1420), 16);
        assert_eq!(pad_len(16, 16, 1420), 16);
        assert_eq!(pad_len(17, 16, 1420), 32);
    }

    #[test]
    fn pad_len_never_exceeds_cap() {
        // The default interface MTU (1420) minus header (16) and tag (16).
        const CONTENT_CAP: usize = 1420 - 16 - 16;
        assert_eq!(pad_len(2000, 16, CONTENT_CAP), CONTENT_CAP);
        assert_eq!(pad_len(CONTENT_CAP, 16, CONTENT_CAP), CONTENT_CAP);
    }
}
