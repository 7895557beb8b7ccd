//! WireGuard-INI-style configuration parsing (spec §1.1/§2.1, out of scope
//! for key *negotiation* but in scope for loading the static peer/interface
//! facts the pipeline needs to start up).
//!
//! Grounded directly on the teacher's hand-rolled `parse_wg_config`: a plain
//! line-oriented `[Section]`/`Key = Value` reader. No `toml`/`serde`
//! dependency is introduced — the wire format is WireGuard's own INI dialect,
//! not a general-purpose serialization format.

use std::net::{IpAddr, SocketAddr};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ipnet::IpNet;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub name: String,
    pub public_key: [u8; 32],
    pub endpoint: Option<SocketAddr>,
    pub allowed_ips: Vec<IpNet>,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub private_key: Option<[u8; 32]>,
    pub listen_port: Option<u16>,
    pub address: Option<IpNet>,
    pub peers: Vec<PeerConfig>,
}

/// Parse a WireGuard-style config file into `DeviceConfig`. Peers are named
/// sequentially (`peer0`, `peer1`, ...) since the format itself has no name
/// field; callers that need stable names should rename after parsing.
pub fn parse_device_config(text: &str) -> Result<DeviceConfig> {
    let mut config = DeviceConfig::default();
    let mut current_peer: Option<PeerConfig> = None;
    let mut peer_index = 0usize;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.eq_ignore_ascii_case("[interface]") {
            continue;
        }

        if line.eq_ignore_ascii_case("[peer]") {
            if let Some(peer) = current_peer.take() {
                config.peers.push(peer);
            }
            current_peer = Some(PeerConfig {
                name: format!("peer{peer_index}"),
                public_key: [0u8; 32],
                endpoint: None,
                allowed_ips: Vec::new(),
            });
            peer_index += 1;
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(CoreError::Config(format!("malformed line: {raw_line}")));
        };
        let key = key.trim();
        let value = value.trim();

        match (&mut current_peer, key) {
            (None, "PrivateKey") => {
                config.private_key = Some(decode_key(value, "PrivateKey")?);
            }
            (None, "ListenPort") => {
                config.listen_port = Some(
                    value
                        .parse()
                        .map_err(|_| CoreError::Config(format!("invalid ListenPort: {value}")))?,
                );
            }
            (None, "Address") => {
                config.address = Some(
                    value
                        .parse()
                        .map_err(|_| CoreError::Config(format!("invalid Address: {value}")))?,
                );
            }
            (Some(peer), "PublicKey") => {
                peer.public_key = decode_key(value, "PublicKey")?;
            }
            (Some(peer), "Endpoint") => {
                peer.endpoint = Some(
                    resolve_endpoint(value)
                        .map_err(|_| CoreError::Config(format!("invalid Endpoint: {value}")))?,
                );
            }
            (Some(peer), "AllowedIPs") => {
                for entry in value.split(',') {
                    let net: IpNet = entry
                        .trim()
                        .parse()
                        .map_err(|_| CoreError::Config(format!("invalid AllowedIPs entry: {entry}")))?;
                    peer.allowed_ips.push(net);
                }
            }
            (_, "PersistentKeepalive" | "PresharedKey" | "DNS" | "MTU") => {
                // Recognized but not consumed by this crate's pipeline.
            }
            (_, other) => {
                return Err(CoreError::Config(format!("unrecognized key: {other}")));
            }
        }
    }

    if let Some(peer) = current_peer.take() {
        config.peers.push(peer);
    }

    Ok(config)
}

fn decode_key(value: &str, field: &str) -> Result<[u8; 32]> {
    let bytes = BASE64
        .decode(value)
        .map_err(|_| CoreError::Config(format!("invalid base64 for {field}")))?;
    bytes
        .try_into()
        .map_err(|_| CoreError::Config(format!("{field} must decode to 32 bytes")))
}

fn resolve_endpoint(value: &str) -> std::result::Result<SocketAddr, std::io::Error> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    use std::net::ToSocketAddrs;
    value
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"))
}

/// Populate a device's routing table and register a `Peer` for each
/// configured peer. Key material and handshake setup are left to the
/// external handshake subsystem (Non-goal: this crate never negotiates
/// keys); only routing and endpoint state are wired up here.
pub fn apply_to_device(config: &DeviceConfig, device: &crate::device::Device) {
    for peer_cfg in &config.peers {
        let endpoint = peer_cfg
            .endpoint
            .unwrap_or_else(|| SocketAddr::new(IpAddr::from([0, 0, 0, 0]), 0));
        let peer = crate::peer::PeerBuilder::new(peer_cfg.name.clone(), endpoint).build();

        for net in &peer_cfg.allowed_ips {
            match net {
                IpNet::V4(v4) => device.routing.insert_ipv4(*v4, peer.clone()),
                IpNet::V6(v6) => device.routing.insert_ipv6(*v6, peer.clone()),
            }
        }

        device.add_peer(peer);
    }
}
