//! TUN device handle (spec §4.2, §6).
//!
//! Grounded on the teacher's Linux backend in `tun_device.rs`: a blocking
//! `tun::Device` driven from `spawn_blocking`, since the `tun` crate's
//! synchronous read/write don't compose with a cooperative task loop
//! directly. macOS (privileged helper IPC) and Windows (Wintun) backends
//! are dropped; this crate targets Linux only.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;

use crate::constants::{DEFAULT_TUN_MTU, MESSAGE_TRANSPORT_HEADER_SIZE};

/// Copy `data` into `buffer` starting at the header offset, never writing
/// past the buffer's capacity. Returns `data.len()`, the *true* read
/// length, even when that exceeds what was actually copied — the caller
/// (the TUN reader) is the one responsible for rejecting oversize reads
/// (spec §4.2: "reject ... reads larger than MaxContentSize"), so this
/// must report the real size rather than silently truncate it away.
fn write_payload(buffer: &mut BytesMut, data: &[u8]) -> usize {
    let capacity = buffer.len().saturating_sub(MESSAGE_TRANSPORT_HEADER_SIZE);
    let copy_len = data.len().min(capacity);
    buffer[MESSAGE_TRANSPORT_HEADER_SIZE..MESSAGE_TRANSPORT_HEADER_SIZE + copy_len]
        .copy_from_slice(&data[..copy_len]);
    data.len()
}

/// Stage 1 reads through this handle; stage 4 (or a future inbound path)
/// would write back through it. Only the read side is exercised by this
/// crate's outbound pipeline.
#[async_trait]
pub trait TunHandle: Send + Sync {
    /// Block until the next IP packet is available, returning a buffer with
    /// the packet written starting at `MESSAGE_TRANSPORT_HEADER_SIZE` so
    /// downstream stages never need to copy it to make header room (spec
    /// §4.2: "reserve the header region").
    async fn read_packet(&self, pool: &crate::buffer::BufferPool) -> io::Result<(BytesMut, usize)>;

    async fn write_packet(&self, packet: &[u8]) -> io::Result<()>;
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
pub struct PlatformTun {
    // Split once at construction: `tun::AsyncDevice`'s read/write halves
    // need `&mut self` to poll, so each side is owned by its own task-safe
    // mutex rather than re-borrowed mutably through a shared `Arc`.
    read_half: tokio::sync::Mutex<tokio::io::ReadHalf<tun::AsyncDevice>>,
    write_half: tokio::sync::Mutex<tokio::io::WriteHalf<tun::AsyncDevice>>,
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
impl PlatformTun {
    pub fn create(name: &str, mtu: Option<i32>) -> crate::error::Result<Self> {
        let mut config = tun::Configuration::default();
        config.name(name).mtu(mtu.unwrap_or(DEFAULT_TUN_MTU as i32)).up();

        let device = tun::create_as_async(&config)
            .map_err(|e| crate::error::CoreError::TunCreate(e.to_string()))?;
        let (read_half, write_half) = tokio::io::split(device);
        Ok(Self {
            read_half: tokio::sync::Mutex::new(read_half),
            write_half: tokio::sync::Mutex::new(write_half),
        })
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
#[async_trait]
impl TunHandle for PlatformTun {
    async fn read_packet(&self, pool: &crate::buffer::BufferPool) -> io::Result<(BytesMut, usize)> {
        use tokio::io::AsyncReadExt;

        let mut buffer = pool.checkout();
        let mut scratch = vec![0u8; DEFAULT_TUN_MTU as usize + 64];
        let n = self.read_half.lock().await.read(&mut scratch).await?;
        let payload_len = write_payload(&mut buffer, &scratch[..n]);
        Ok((buffer, payload_len))
    }

    async fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.write_half.lock().await.write_all(packet).await
    }
}

/// An in-memory TUN double for tests: packets are pushed onto a channel and
/// popped by `read_packet`, with writes recorded for assertions.
#[cfg(any(test, feature = "test-util"))]
pub mod test_double {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct LoopbackTun {
        inbound: Mutex<VecDeque<Vec<u8>>>,
        pub written: Mutex<Vec<Vec<u8>>>,
    }

    impl LoopbackTun {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn enqueue(&self, packet: Vec<u8>) {
            self.inbound.lock().push_back(packet);
        }
    }

    #[async_trait]
    impl TunHandle for LoopbackTun {
        async fn read_packet(&self, pool: &crate::buffer::BufferPool) -> io::Result<(BytesMut, usize)> {
            loop {
                if let Some(packet) = self.inbound.lock().pop_front() {
                    let mut buffer = pool.checkout();
                    let payload_len = write_payload(&mut buffer, &packet);
                    return Ok((buffer, payload_len));
                }
                tokio::task::yield_now().await;
            }
        }

        async fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
            self.written.lock().push(packet.to_vec());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_payload_reports_true_length_without_overflowing_buffer() {
        let mut buffer = BytesMut::zeroed(MESSAGE_TRANSPORT_HEADER_SIZE + 8);
        let oversize = vec![0xABu8; 1000];

        let reported = write_payload(&mut buffer, &oversize);

        assert_eq!(reported, 1000, "caller must see the true read length to reject it");
        assert_eq!(buffer.len(), MESSAGE_TRANSPORT_HEADER_SIZE + 8, "buffer must not be resized or overrun");
    }

    #[test]
    fn write_payload_copies_content_that_fits() {
        let mut buffer = BytesMut::zeroed(MESSAGE_TRANSPORT_HEADER_SIZE + 8);
        let payload = vec![0x42u8; 4];

        let reported = write_payload(&mut buffer, &payload);

        assert_eq!(reported, 4);
        assert_eq!(&buffer[MESSAGE_TRANSPORT_HEADER_SIZE..MESSAGE_TRANSPORT_HEADER_SIZE + 4], &[0x42; 4]);
    }
}
