//! Routing table collaborator (spec §6: `routingTable.LookupIPv4/LookupIPv6`).
//!
//! Populating the table (parsing AllowedIPs, handling overlaps, etc.) is the
//! routing subsystem's job and is out of scope here (spec §1); the core only
//! needs the lookup interface and a concrete implementation simple enough to
//! exercise it in tests.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use dashmap::DashMap;
use ipnet::{Ipv4Net, Ipv6Net};

use crate::peer::Peer;

pub trait RoutingTable: Send + Sync {
    fn lookup_ipv4(&self, octets: [u8; 4]) -> Option<Arc<Peer>>;
    fn lookup_ipv6(&self, octets: [u8; 16]) -> Option<Arc<Peer>>;
}

/// Longest-prefix-match table over a peer's configured allowed IPs.
///
/// Stored as a flat `Vec` per address family rather than a trie: allowed-IP
/// lists are small (tens of entries per device at most) and this keeps the
/// implementation legible, matching the scale the teacher's own peer maps
/// operate at.
pub struct InMemoryRoutingTable {
    v4_routes: DashMap<u32, Vec<(Ipv4Net, Arc<Peer>)>>,
    v6_routes: DashMap<u32, Vec<(Ipv6Net, Arc<Peer>)>>,
}

impl InMemoryRoutingTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            v4_routes: DashMap::new(),
            v6_routes: DashMap::new(),
        })
    }

    pub fn insert_ipv4(&self, net: Ipv4Net, peer: Arc<Peer>) {
        self.v4_routes.entry(0).or_default().push((net, peer));
    }

    pub fn insert_ipv6(&self, net: Ipv6Net, peer: Arc<Peer>) {
        self.v6_routes.entry(0).or_default().push((net, peer));
    }
}

impl RoutingTable for InMemoryRoutingTable {
    fn lookup_ipv4(&self, octets: [u8; 4]) -> Option<Arc<Peer>> {
        let addr = Ipv4Addr::from(octets);
        let routes = self.v4_routes.get(&0)?;
        routes
            .iter()
            .filter(|(net, _)| net.contains(&addr))
            .max_by_key(|(net, _)| net.prefix_len())
            .map(|(_, peer)| peer.clone())
    }

    fn lookup_ipv6(&self, octets: [u8; 16]) -> Option<Arc<Peer>> {
        let addr = Ipv6Addr::from(octets);
        let routes = self.v6_routes.get(&0)?;
        routes
            .iter()
            .filter(|(net, _)| net.contains(&addr))
            .max_by_key(|(net, _)| net.prefix_len())
            .map(|(_, peer)| peer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerBuilder;
    use std::net::SocketAddr;

    #[test]
    fn longest_prefix_wins() {
        let table = InMemoryRoutingTable::new();
        let broad = PeerBuilder::new("broad".into(), "10.0.0.1:1".parse::<SocketAddr>().unwrap()).build();
        let narrow = PeerBuilder::new("narrow".into(), "10.0.0.2:1".parse::<SocketAddr>().unwrap()).build();

        table.insert_ipv4("10.0.0.0/8".parse().unwrap(), broad.clone());
        table.insert_ipv4("10.0.0.0/24".parse().unwrap(), narrow.clone());

        let found = table.lookup_ipv4([10, 0, 0, 5]).unwrap();
        assert_eq!(found.name, "narrow");

        let found_broad = table.lookup_ipv4([10, 1, 0, 5]).unwrap();
        assert_eq!(found_broad.name, "broad");
    }

    #[test]
    fn unroutable_destination_is_none() {
        let table = InMemoryRoutingTable::new();
        assert!(table.lookup_ipv4([192, 168, 1, 1]).is_none());
    }
}
