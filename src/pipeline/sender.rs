//! Stage 4: Sequential Sender (spec §4.5). One per peer. Restores the order
//! stage 3's N workers scrambled, since the peer's outbound queue is FIFO
//! and this loop consumes it serially (spec §5, "Ordering guarantees").

use std::sync::Arc;

use crate::constants::{MESSAGE_KEEPALIVE_SIZE, SEND_FAILURE_BACKOFF};
use crate::device::Device;
use crate::peer::Peer;

pub async fn run(device: Arc<Device>, peer: Arc<Peer>) {
    loop {
        let element = tokio::select! {
            biased;
            _ = device.stop.cancelled() => return,
            _ = peer.stop.cancelled() => return,
            popped = peer.outbound_queue.pop() => match popped {
                Some(element) => element,
                None => return,
            },
        };

        // Blocks until stage 3 has sealed or dropped the element.
        if element.lock.acquire().await.is_err() {
            return;
        }

        if element.is_dropped() {
            device.buffers.release(element.take_buffer());
            continue;
        }

        let packet_len = element.packet_len();
        let buffer = element.take_buffer();
        let endpoint = peer.endpoint();

        let socket = device.socket.read().await.clone();
        match socket.send_to(&buffer[..packet_len], endpoint).await {
            Ok(_) => {
                device.timers.on_any_authenticated_packet_traversal(&peer);
                if packet_len != MESSAGE_KEEPALIVE_SIZE {
                    device.timers.on_data_sent(&peer);
                }
                device.timers.on_keepalive_key_check(&peer);
                device.buffers.release(buffer);
            }
            Err(err) => {
                log::warn!("send to {endpoint} failed: {err}");
                device.buffers.release(buffer);
                tokio::time::sleep(SEND_FAILURE_BACKOFF).await;
                device.change_network.change_network(&peer).await;
            }
        }
    }
}
