//! Session key material.
//!
//! `KeyPair` is produced by the handshake/rekey subsystem, which is external
//! to this crate (spec §1, Non-goals: "the core does not ... negotiate
//! keys"). The pipeline only needs the shape described in spec §3: an
//! atomic send-nonce counter, the peer's receiver index, a creation
//! timestamp, and something that can seal a packet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::constants::REJECT_AFTER_TIME;

/// Seals (and, for the inbound direction, would open) transport packets
/// under one direction's session key. The core never derives this key
/// itself — it only calls through the trait (spec §1, Non-goals).
pub trait Sealer: Send + Sync {
    /// Seal `buf[header_len..header_len + content_len]` in place, appending
    /// the authentication tag immediately after. `buf` must have room for
    /// `header_len + content_len + 16` bytes. `nonce` is the 64-bit counter
    /// assigned by the nonce assigner; the 12-byte AEAD nonce is
    /// `0x00000000 ‖ LE64(nonce)` (spec §4.4). Returns the total sealed
    /// length (header + ciphertext + tag).
    fn seal_in_place(
        &self,
        nonce: u64,
        buf: &mut [u8],
        header_len: usize,
        content_len: usize,
    ) -> Result<usize, SealError>;
}

#[derive(Debug, thiserror::Error)]
#[error("AEAD seal failed")]
pub struct SealError;

/// ChaCha20-Poly1305 sealer, keyed for one direction (spec §6: "The AEAD is
/// ChaCha20-Poly1305 with a 12-byte nonce ... and the peer's send key").
pub struct ChaChaSealer {
    cipher: ChaCha20Poly1305,
}

impl ChaChaSealer {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    fn aead_nonce(counter: u64) -> Nonce {
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&counter.to_le_bytes());
        *Nonce::from_slice(&bytes)
    }
}

impl Sealer for ChaChaSealer {
    fn seal_in_place(
        &self,
        nonce: u64,
        buf: &mut [u8],
        header_len: usize,
        content_len: usize,
    ) -> Result<usize, SealError> {
        // `AeadInPlace::encrypt_in_place` wants a resizable buffer (it
        // appends the tag); we work over a `Vec` scratch copy of just the
        // plaintext region and write the result back, since `buf` here is a
        // fixed-capacity slice owned by the pooled buffer and may have
        // unrelated trailing bytes past `content_len`.
        let aead_nonce = Self::aead_nonce(nonce);
        let mut scratch = buf[header_len..header_len + content_len].to_vec();
        self.cipher
            .encrypt_in_place(&aead_nonce, b"", &mut scratch)
            .map_err(|_| SealError)?;
        buf[header_len..header_len + scratch.len()].copy_from_slice(&scratch);
        Ok(header_len + scratch.len())
    }
}

/// A directional session key pair, as produced by the (external) handshake
/// subsystem (spec §3).
pub struct KeyPair {
    /// Fetch-and-incremented by the nonce assigner (spec §4.3 step 2).
    pub send_nonce: AtomicU64,
    /// Receiver-side key index echoed in every transport header.
    pub remote_index: u32,
    /// When this key pair was established.
    pub created: Instant,
    /// AEAD sealer keyed for the send direction.
    pub send: Arc<dyn Sealer>,
}

impl KeyPair {
    pub fn new(remote_index: u32, send: Arc<dyn Sealer>) -> Arc<Self> {
        Arc::new(Self {
            send_nonce: AtomicU64::new(0),
            remote_index,
            created: Instant::now(),
            send,
        })
    }

    /// A key is usable iff it hasn't exhausted its nonce budget and hasn't
    /// aged past `RejectAfterTime` (spec §4.3 step 1).
    pub fn is_usable(&self) -> bool {
        use crate::constants::REJECT_AFTER_MESSAGES;
        self.send_nonce.load(Ordering::Relaxed) < REJECT_AFTER_MESSAGES
            && self.created.elapsed() < REJECT_AFTER_TIME
    }

    /// Atomically assign the next send nonce. Returns `None` if the key
    /// became unusable between the caller's `is_usable` check and this call
    /// (the caller must re-check `is_usable` and abandon instead of sealing
    /// under an over-budget nonce — spec §8, "Nonce cap").
    pub fn assign_nonce(&self) -> Option<u64> {
        let nonce = self.send_nonce.fetch_add(1, Ordering::SeqCst);
        if nonce < crate::constants::REJECT_AFTER_MESSAGES {
            Some(nonce)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_appends_tag_and_round_trips_length() {
        let sealer = ChaChaSealer::new([7u8; 32]);
        let mut buf = vec![0u8; 16 + 32 + 16];
        buf[16..48].copy_from_slice(&[0xAB; 32]);
        let sealed_len = sealer.seal_in_place(0, &mut buf, 16, 32).unwrap();
        assert_eq!(sealed_len, 16 + 32 + 16);
    }

    #[test]
    fn fresh_key_pair_is_usable() {
        let kp = KeyPair::new(42, Arc::new(ChaChaSealer::new([1u8; 32])));
        assert!(kp.is_usable());
        assert_eq!(kp.assign_nonce(), Some(0));
        assert_eq!(kp.assign_nonce(), Some(1));
    }
}
