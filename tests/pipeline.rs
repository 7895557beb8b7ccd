//! End-to-end tests for the five-stage outbound pipeline (spec §8).

#![cfg(feature = "test-util")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use wg_outbound_core::device::Device;
use wg_outbound_core::keys::{ChaChaSealer, KeyPair};
use wg_outbound_core::peer::PeerBuilder;
use wg_outbound_core::timers::test_support::{CountingChangeNetwork, CountingPeerTimers};
use wg_outbound_core::tun::test_double::LoopbackTun;
use wg_outbound_core::work::WorkElement;

const TEST_MTU: usize = 1420;

const IPV4_HEADER_LEN: usize = 20;

/// Build a raw IPv4 datagram of `IPV4_HEADER_LEN + extra_len` bytes — the
/// *whole* datagram is what the TUN reader sees as its payload, not just
/// `extra_len`.
fn ipv4_packet(dest: [u8; 4], payload_byte: u8, extra_len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; IPV4_HEADER_LEN + extra_len];
    packet[0] = 0x45; // version 4, header length 20 bytes
    packet[16..20].copy_from_slice(&dest);
    for b in &mut packet[20..] {
        *b = payload_byte;
    }
    packet
}

/// The sealed wire size for a `payload_len`-byte plaintext under the
/// pipeline's padding/MTU rules (header + tag, padded content capped at
/// `mtu` minus header and tag — mirrors `WorkElement::seal`).
fn expected_wire_len(payload_len: usize, mtu: usize) -> usize {
    const HEADER: usize = 16;
    const TAG: usize = 16;
    const MULTIPLE: usize = 16;
    let cap = mtu - HEADER - TAG;
    let padded = (payload_len.div_ceil(MULTIPLE) * MULTIPLE).min(cap);
    HEADER + padded + TAG
}

async fn spawn_device(
    peer_addr: SocketAddr,
    allowed: [u8; 4],
) -> (Arc<Device>, Arc<LoopbackTun>, Arc<CountingPeerTimers>, Arc<CountingChangeNetwork>) {
    let tun = LoopbackTun::new();
    let timers = Arc::new(CountingPeerTimers::default());
    let change_network = Arc::new(CountingChangeNetwork::default());

    let device = Device::bind(
        "127.0.0.1:0".parse().unwrap(),
        tun.clone(),
        change_network.clone(),
        timers.clone(),
    )
    .await
    .unwrap();

    let peer = PeerBuilder::new("peer0".into(), peer_addr).build();
    device
        .routing
        .insert_ipv4(format!("{}.{}.{}.{}/32", allowed[0], allowed[1], allowed[2], allowed[3]).parse().unwrap(), peer.clone());
    let key_pair = KeyPair::new(7, Arc::new(ChaChaSealer::new([9u8; 32])));
    peer.install_key_pair(key_pair);
    device.add_peer(peer);

    (device, tun, timers, change_network)
}

#[tokio::test]
async fn happy_path_single_peer_delivers_sealed_packet() {
    let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let receiver_addr = receiver.local_addr().unwrap();

    let (device, tun, timers, _change_network) = spawn_device(receiver_addr, [10, 0, 0, 2]).await;
    device.spawn();

    tun.enqueue(ipv4_packet([10, 0, 0, 2], 0xAB, 32));

    let mut buf = vec![0u8; 2048];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
        .await
        .expect("packet should arrive")
        .unwrap();

    // `ipv4_packet` emits a whole 20-byte-header + 32-byte datagram, i.e. a
    // 52-byte payload, padded up to a 64-byte multiple of 16.
    assert_eq!(n, expected_wire_len(IPV4_HEADER_LEN + 32, TEST_MTU));
    assert_eq!(u32::from_le_bytes(buf[0..4].try_into().unwrap()), 4);
    assert_eq!(u32::from_le_bytes(buf[4..8].try_into().unwrap()), 7);
    assert_eq!(u64::from_le_bytes(buf[8..16].try_into().unwrap()), 0);

    // Give the sender's post-send timer calls a moment to land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(timers.traversals.load(std::sync::atomic::Ordering::Relaxed), 1);
    assert_eq!(timers.data_sent.load(std::sync::atomic::Ordering::Relaxed), 1);

    device.shutdown().await;
}

#[tokio::test]
async fn parallel_encryption_preserves_per_peer_order() {
    let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let receiver_addr = receiver.local_addr().unwrap();

    let (device, tun, _timers, _change_network) = spawn_device(receiver_addr, [10, 0, 0, 3]).await;
    device.spawn();

    const COUNT: u8 = 20;
    for i in 0..COUNT {
        tun.enqueue(ipv4_packet([10, 0, 0, 3], i, 16));
    }

    let mut buf = vec![0u8; 2048];
    for expected_nonce in 0..COUNT as u64 {
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .expect("packet should arrive")
            .unwrap();
        assert!(n >= 16);
        let nonce = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        assert_eq!(nonce, expected_nonce, "stage 4 must restore nonce order per peer");
    }

    device.shutdown().await;
}

#[tokio::test]
async fn backpressure_drop_conserves_buffers() {
    // Route to a peer whose key is never installed, so the nonce assigner
    // stalls forever waiting for a usable key and the nonce queue fills up.
    let tun = LoopbackTun::new();
    let timers = Arc::new(CountingPeerTimers::default());
    let change_network = Arc::new(CountingChangeNetwork::default());

    let device = Device::bind(
        "127.0.0.1:0".parse().unwrap(),
        tun.clone(),
        change_network,
        timers,
    )
    .await
    .unwrap();

    let peer = PeerBuilder::new("stalled".into(), "127.0.0.1:1".parse().unwrap())
        .queue_capacity(4, 4)
        .build();
    device
        .routing
        .insert_ipv4("10.0.0.4/32".parse().unwrap(), peer.clone());
    device.add_peer(peer.clone());

    let available_before = device.buffers.available();
    device.spawn();

    for i in 0..20u8 {
        tun.enqueue(ipv4_packet([10, 0, 0, 4], i, 8));
    }

    // Let the reader drain the TUN double and the nonce queue settle at its
    // capacity via drop-oldest eviction.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(peer.nonce_queue.len() <= 4, "nonce queue must stay bounded");
    // 20 packets fed into a 4-capacity queue: at most 4 buffers are still
    // checked out (queued), the other at-least-16 must have been evicted and
    // returned rather than leaked (spec §8, "Buffer conservation").
    assert!(
        device.buffers.available() >= available_before.saturating_sub(4),
        "evicted buffers must return to the pool instead of leaking"
    );

    device.shutdown().await;
}

#[tokio::test]
async fn keepalive_sized_packet_skips_data_sent_timer() {
    let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let receiver_addr = receiver.local_addr().unwrap();

    let (device, _tun, timers, _change_network) = spawn_device(receiver_addr, [10, 0, 0, 5]).await;
    device.spawn();

    // A true keepalive (`packet_len == MESSAGE_KEEPALIVE_SIZE`) needs a
    // zero-length *payload*, which the TUN reader can never produce — every
    // valid IPv4/IPv6 datagram is at least 20/40 bytes. Inject the element
    // directly onto the peer's nonce queue instead of routing it through the
    // TUN double.
    let peer = device.peer("peer0").expect("peer registered by spawn_device");
    let buffer = device.buffers.checkout();
    let element = WorkElement::new(buffer, 0, peer.clone());
    if let Some(evicted) = peer.nonce_queue.push(element) {
        device.buffers.release(evicted.take_buffer());
    }

    let mut buf = vec![0u8; 2048];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
        .await
        .expect("packet should arrive")
        .unwrap();

    assert_eq!(n, expected_wire_len(0, TEST_MTU), "must be exactly keepalive-sized on the wire");
    assert_eq!(n, 32, "MESSAGE_KEEPALIVE_SIZE per constants.rs");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(timers.traversals.load(std::sync::atomic::Ordering::Relaxed), 1);
    assert_eq!(
        timers.data_sent.load(std::sync::atomic::Ordering::Relaxed),
        0,
        "a keepalive-sized packet must not trigger the data-sent timer"
    );

    device.shutdown().await;
}
