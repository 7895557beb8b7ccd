//! Wire-format and policy constants shared across the pipeline.
//!
//! Values match the real WireGuard protocol (see spec §6); nothing here is
//! an implementation detail specific to this crate.

use std::time::Duration;

/// Size of the transport header prepended to every outbound packet:
/// message type (4) + receiver index (4) + nonce counter (8).
pub const MESSAGE_TRANSPORT_HEADER_SIZE: usize = 16;

/// Little-endian message-type value for a transport data packet.
pub const MESSAGE_TRANSPORT_TYPE: u32 = 4;

/// Plaintext is zero-padded up to a multiple of this many bytes.
pub const PADDING_MULTIPLE: usize = 16;

/// AEAD authentication tag length (Poly1305).
pub const AEAD_TAG_SIZE: usize = 16;

/// Largest IP datagram the TUN reader will accept.
pub const MAX_CONTENT_SIZE: usize = 4096;

/// Largest on-the-wire transport message: header + padded content + tag.
pub const MAX_MESSAGE_SIZE: usize =
    MAX_CONTENT_SIZE + MESSAGE_TRANSPORT_HEADER_SIZE + AEAD_TAG_SIZE;

/// Size of a transport packet carrying a zero-length (keepalive) payload.
pub const MESSAGE_KEEPALIVE_SIZE: usize = MESSAGE_TRANSPORT_HEADER_SIZE + AEAD_TAG_SIZE;

/// A key pair is exhausted once its send counter reaches this value.
pub const REJECT_AFTER_MESSAGES: u64 = u64::MAX - (1 << 13) - 1;

/// A key pair is too old to use for sealing once it has lived this long.
pub const REJECT_AFTER_TIME: Duration = Duration::from_secs(180);

/// Default MTU for the virtual interface (WireGuard's recommended value).
pub const DEFAULT_TUN_MTU: usize = 1420;

/// Default capacity for the per-peer nonce and outbound queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Delay the sequential sender sleeps after a transmit failure before
/// retrying with the next queued element.
pub const SEND_FAILURE_BACKOFF: Duration = Duration::from_secs(2);
