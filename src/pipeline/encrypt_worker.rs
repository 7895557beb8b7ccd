//! Stage 3: Encryption Worker (spec §4.4). N per device, sharing the
//! device-wide encryption queue. Order among workers is irrelevant; stage 4
//! restores it.

use std::sync::Arc;

use crate::constants::{DEFAULT_TUN_MTU, MESSAGE_TRANSPORT_TYPE};
use crate::device::Device;
use crate::work::{release_lock, WorkElement};

pub async fn run(device: Arc<Device>) {
    loop {
        let element = tokio::select! {
            biased;
            _ = device.stop.cancelled() => return,
            popped = device.encryption_queue.pop() => match popped {
                Some(element) => element,
                None => return,
            },
        };

        seal_or_drop(&element);
    }
}

fn seal_or_drop(element: &Arc<WorkElement>) {
    if element.is_dropped() {
        release_lock(&element.lock);
        return;
    }

    let Some(key_pair) = element.key_pair() else {
        // The nonce assigner always sets a key pair before publishing; this
        // would indicate a pipeline invariant violation rather than a
        // recoverable per-packet error, so treat it as a drop.
        log::error!("encryption worker received an element with no key pair");
        element.mark_dropped();
        release_lock(&element.lock);
        return;
    };

    element.write_header(MESSAGE_TRANSPORT_TYPE, key_pair.remote_index, element.nonce());

    if let Err(err) = element.seal(key_pair.send.as_ref(), DEFAULT_TUN_MTU) {
        log::warn!("AEAD seal failed, dropping packet: {err}");
        element.mark_dropped();
    }

    release_lock(&element.lock);
}
