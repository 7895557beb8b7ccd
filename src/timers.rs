//! Collaborators the sequential sender signals into, and the TUN reader's
//! status channel (spec §6). All are external subsystems; this crate only
//! defines the interfaces the pipeline calls through.

use async_trait::async_trait;

/// The peer timer subsystem (spec §4.5, §6). Out of scope to implement;
/// the pipeline only ever signals into it.
pub trait PeerTimers: Send + Sync {
    /// Any authenticated packet (data or keepalive) traversed the tunnel.
    fn on_any_authenticated_packet_traversal(&self, peer: &crate::peer::Peer);
    /// A non-keepalive data packet was sent.
    fn on_data_sent(&self, peer: &crate::peer::Peer);
    /// Evaluate whether the current send key is fresh enough; may request a
    /// new handshake.
    fn on_keepalive_key_check(&self, peer: &crate::peer::Peer);
}

/// No-op timers, used where a real timer subsystem isn't wired up (tests,
/// or a device built without peer-timer integration).
#[derive(Default)]
pub struct NullPeerTimers;

impl PeerTimers for NullPeerTimers {
    fn on_any_authenticated_packet_traversal(&self, _peer: &crate::peer::Peer) {}
    fn on_data_sent(&self, _peer: &crate::peer::Peer) {}
    fn on_keepalive_key_check(&self, _peer: &crate::peer::Peer) {}
}

/// Called by the sequential sender on a send failure, giving the device a
/// chance to rebind or switch network paths (spec §4.5, §6).
#[async_trait]
pub trait ChangeNetwork: Send + Sync {
    async fn change_network(&self, peer: &crate::peer::Peer);
}

/// Fatal TUN-read failures publish a status code out of band (spec §4.2,
/// §6: `sendStatus(code)`). Status 101 is the one code this spec defines.
pub const STATUS_TUN_READ_FATAL: u32 = 101;

pub trait StatusSink: Send + Sync {
    fn send_status(&self, code: u32);
}

#[derive(Default)]
pub struct LoggingStatusSink;

impl StatusSink for LoggingStatusSink {
    fn send_status(&self, code: u32) {
        log::error!("device published fatal status {code}");
    }
}

/// Counting test doubles for `PeerTimers`/`ChangeNetwork`, used by
/// integration tests to assert the sequential sender signaled what it was
/// supposed to without standing up a real timer subsystem.
#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct CountingPeerTimers {
        pub traversals: AtomicUsize,
        pub data_sent: AtomicUsize,
        pub key_checks: AtomicUsize,
    }

    impl PeerTimers for CountingPeerTimers {
        fn on_any_authenticated_packet_traversal(&self, _peer: &crate::peer::Peer) {
            self.traversals.fetch_add(1, Ordering::Relaxed);
        }
        fn on_data_sent(&self, _peer: &crate::peer::Peer) {
            self.data_sent.fetch_add(1, Ordering::Relaxed);
        }
        fn on_keepalive_key_check(&self, _peer: &crate::peer::Peer) {
            self.key_checks.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[derive(Default)]
    pub struct CountingChangeNetwork {
        pub invocations: AtomicUsize,
    }

    #[async_trait]
    impl ChangeNetwork for CountingChangeNetwork {
        async fn change_network(&self, _peer: &crate::peer::Peer) {
            self.invocations.fetch_add(1, Ordering::Relaxed);
        }
    }
}
