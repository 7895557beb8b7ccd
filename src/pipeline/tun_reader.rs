//! Stage 1: TUN Reader (spec §4.2). One per device.

use std::sync::Arc;

use crate::device::Device;
use crate::timers::{StatusSink, STATUS_TUN_READ_FATAL};
use crate::work::WorkElement;

const IPV4_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

/// Parse enough of an IP packet to find its destination address. Returns
/// `None` for anything that isn't a well-formed IPv4/IPv6 header (spec
/// §4.2's version/length table); the caller logs and discards.
fn destination_of(packet: &[u8]) -> Option<std::net::IpAddr> {
    if packet.is_empty() {
        return None;
    }
    let version = packet[0] >> 4;
    match version {
        4 if packet.len() >= IPV4_HEADER_LEN => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&packet[16..20]);
            Some(std::net::IpAddr::from(octets))
        }
        6 if packet.len() >= IPV6_HEADER_LEN => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&packet[24..40]);
            Some(std::net::IpAddr::from(octets))
        }
        _ => None,
    }
}

pub async fn run(device: Arc<Device>) {
    run_with_status_sink(device, None).await
}

pub async fn run_with_status_sink(device: Arc<Device>, status: Option<Arc<dyn StatusSink>>) {
    loop {
        tokio::select! {
            biased;
            _ = device.stop.cancelled() => return,
            result = device.tun.read_packet(&device.buffers) => {
                match result {
                    Ok((buffer, payload_len)) => {
                        handle_packet(&device, buffer, payload_len);
                    }
                    Err(err) => {
                        log::error!("fatal TUN read error: {err}");
                        if let Some(sink) = &status {
                            sink.send_status(STATUS_TUN_READ_FATAL);
                        }
                        return;
                    }
                }
            }
        }
    }
}

fn handle_packet(device: &Arc<Device>, buffer: bytes::BytesMut, payload_len: usize) {
    use crate::constants::MAX_CONTENT_SIZE;

    if payload_len == 0 || payload_len > MAX_CONTENT_SIZE {
        log::debug!("discarding zero-length or oversize read ({payload_len} bytes)");
        device.buffers.release(buffer);
        return;
    }

    let header_len = crate::constants::MESSAGE_TRANSPORT_HEADER_SIZE;
    let packet_region = &buffer[header_len..header_len + payload_len];

    let Some(dest) = destination_of(packet_region) else {
        log::debug!("discarding packet with unrecognized IP version/length");
        device.buffers.release(buffer);
        return;
    };

    let peer = match dest {
        std::net::IpAddr::V4(v4) => device.routing.lookup_ipv4(v4.octets()),
        std::net::IpAddr::V6(v6) => device.routing.lookup_ipv6(v6.octets()),
    };

    let Some(peer) = peer else {
        log::debug!("discarding packet for unroutable destination {dest}");
        device.buffers.release(buffer);
        return;
    };

    peer.handshake_reset.notify_one();
    let element = WorkElement::new(buffer, payload_len, peer.clone());
    // An element evicted here was never published past the nonce queue, so
    // its buffer can be reclaimed immediately (spec §8, buffer conservation).
    if let Some(evicted) = peer.nonce_queue.push(element) {
        device.buffers.release(evicted.take_buffer());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_destination() {
        let mut packet = vec![0u8; IPV4_HEADER_LEN];
        packet[0] = 0x45;
        packet[16..20].copy_from_slice(&[10, 0, 0, 5]);
        assert_eq!(
            destination_of(&packet),
            Some(std::net::IpAddr::from([10, 0, 0, 5]))
        );
    }

    #[test]
    fn rejects_truncated_header() {
        let packet = vec![0x45u8; 10];
        assert_eq!(destination_of(&packet), None);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut packet = vec![0u8; IPV4_HEADER_LEN];
        packet[0] = 0x75;
        assert_eq!(destination_of(&packet), None);
    }
}
