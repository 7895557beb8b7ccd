//! `Device`: the device-wide state shared across all of a tunnel's peers
//! (spec §3) and the lifecycle that spawns the pipeline's tasks (spec §5).

use std::sync::Arc;

use dashmap::DashMap;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::RwLock as AsyncRwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::BufferPool;
use crate::constants::DEFAULT_QUEUE_CAPACITY;
use crate::peer::Peer;
use crate::queue::EncryptionQueue;
use crate::routing::InMemoryRoutingTable;
use crate::timers::{ChangeNetwork, PeerTimers};
use crate::tun::TunHandle;

/// Device-wide state: one TUN handle, one (reconfigurable) UDP socket, the
/// routing table, the shared encryption queue, and the buffer pool (spec
/// §3: "Device owns the TUN handle, the UDP socket ..., the routing table,
/// the device-wide encryption queue, the buffer pool, and a stop signal").
pub struct Device {
    pub tun: Arc<dyn TunHandle>,
    /// Async `RwLock` because reconfiguration (rebind) awaits a new bind
    /// before installing it; the sender takes the read guard, clones the
    /// `Arc`, and drops the guard before the send syscall (SPEC_FULL §4.6).
    pub socket: AsyncRwLock<Arc<UdpSocket>>,
    pub routing: Arc<InMemoryRoutingTable>,
    pub encryption_queue: Arc<EncryptionQueue>,
    pub buffers: Arc<BufferPool>,
    pub change_network: Arc<dyn ChangeNetwork>,
    pub timers: Arc<dyn PeerTimers>,
    pub stop: CancellationToken,

    peers: DashMap<String, Arc<Peer>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Bind a non-blocking UDP socket with `SO_REUSEADDR` set, so a rebind after
/// a network change doesn't race the OS releasing the old socket's port.
fn bind_reusable(bind_addr: std::net::SocketAddr) -> crate::error::Result<UdpSocket> {
    let domain = if bind_addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, None).map_err(|source| crate::error::CoreError::SocketBind {
        addr: bind_addr,
        source,
    })?;
    socket
        .set_reuse_address(true)
        .map_err(|source| crate::error::CoreError::SocketBind { addr: bind_addr, source })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| crate::error::CoreError::SocketBind { addr: bind_addr, source })?;
    socket
        .bind(&bind_addr.into())
        .map_err(|source| crate::error::CoreError::SocketBind { addr: bind_addr, source })?;
    UdpSocket::from_std(socket.into())
        .map_err(|source| crate::error::CoreError::SocketBind { addr: bind_addr, source })
}

impl Device {
    pub async fn bind(
        bind_addr: std::net::SocketAddr,
        tun: Arc<dyn TunHandle>,
        change_network: Arc<dyn ChangeNetwork>,
        timers: Arc<dyn PeerTimers>,
    ) -> crate::error::Result<Arc<Self>> {
        let socket = bind_reusable(bind_addr)?;

        Ok(Arc::new(Self {
            tun,
            socket: AsyncRwLock::new(Arc::new(socket)),
            routing: InMemoryRoutingTable::new(),
            encryption_queue: Arc::new(EncryptionQueue::new(DEFAULT_QUEUE_CAPACITY)),
            buffers: BufferPool::new(DEFAULT_QUEUE_CAPACITY * 4),
            change_network,
            timers,
            stop: CancellationToken::new(),
            peers: DashMap::new(),
            tasks: std::sync::Mutex::new(Vec::new()),
        }))
    }

    pub fn add_peer(&self, peer: Arc<Peer>) {
        self.peers.insert(peer.name.clone(), peer);
    }

    pub fn peer(&self, name: &str) -> Option<Arc<Peer>> {
        self.peers.get(name).map(|p| p.clone())
    }

    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Rebind the shared socket, e.g. after the network path changed.
    pub async fn rebind(&self, bind_addr: std::net::SocketAddr) -> crate::error::Result<()> {
        let socket = bind_reusable(bind_addr)?;
        *self.socket.write().await = Arc::new(socket);
        Ok(())
    }

    /// Spawn the TUN reader, N encryption workers, and per-peer nonce
    /// assigner/sequential sender tasks for every peer currently registered
    /// (spec §5: one reader per device, one assigner and one sender per
    /// peer, N encryption workers per device).
    pub fn spawn(self: &Arc<Self>) {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let mut tasks = self.tasks.lock().unwrap();

        {
            let device = self.clone();
            tasks.push(tokio::spawn(async move {
                crate::pipeline::tun_reader::run(device).await;
            }));
        }

        for _ in 0..worker_count {
            let device = self.clone();
            tasks.push(tokio::spawn(async move {
                crate::pipeline::encrypt_worker::run(device).await;
            }));
        }

        for peer in self.peers() {
            let device = self.clone();
            let peer_for_assigner = peer.clone();
            tasks.push(tokio::spawn(async move {
                crate::pipeline::nonce_assigner::run(device, peer_for_assigner).await;
            }));

            let device = self.clone();
            tasks.push(tokio::spawn(async move {
                crate::pipeline::sender::run(device, peer).await;
            }));
        }
    }

    /// Signal every task to stop and join them, logging (rather than
    /// propagating) any panic the way a supervisor would (spec §6:
    /// "capture and log; supervisor may restart the stage").
    pub async fn shutdown(self: &Arc<Self>) {
        self.stop.cancel();
        for peer in self.peers() {
            peer.stop.cancel();
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for handle in handles {
            if let Err(join_err) = handle.await {
                if join_err.is_panic() {
                    log::error!("pipeline task panicked during shutdown: {join_err}");
                }
            }
        }
    }
}
