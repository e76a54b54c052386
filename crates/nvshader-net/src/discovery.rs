//! UDP multicast peer discovery.
//!
//! A node binds the discovery port with address reuse, joins the
//! multicast group and exchanges the messages defined in
//! [`crate::protocol`]. All socket I/O is non-blocking; [`P2pNode::run`]
//! polls at ~100 ms cadence and re-announces every minute. A malformed
//! datagram never terminates the node.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use nvshader_core::{CacheEntry, GpuProfile, NvError, Result};

use crate::protocol::{
    CacheOffer, Message, ANNOUNCE_INTERVAL, DISCOVERY_PORT, MULTICAST_GROUP, TRANSFER_PORT,
};

/// Poll cadence for [`P2pNode::run`].
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Largest datagram the receive path accepts.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Hostname advertised in announcements; defaults to the system
    /// hostname or `"nvshader"`.
    pub hostname: Option<String>,
    pub discovery_port: u16,
    pub transfer_port: u16,
    pub announce_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            discovery_port: DISCOVERY_PORT,
            transfer_port: TRANSFER_PORT,
            announce_interval: ANNOUNCE_INTERVAL,
        }
    }
}

impl NodeConfig {
    /// Builder: advertised hostname.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Builder: discovery port (tests bind ephemeral ports).
    #[must_use]
    pub fn with_discovery_port(mut self, port: u16) -> Self {
        self.discovery_port = port;
        self
    }
}

/// What we know about a peer that has announced itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub addr: IpAddr,
    /// Peer's TCP transfer port.
    pub port: u16,
    pub hostname: String,
    pub arch: String,
    pub driver: String,
    pub offers: Vec<CacheOffer>,
}

/// An event surfaced to the caller from one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A peer announced itself (new or refreshed).
    PeerSeen(PeerInfo),
    /// A peer offered a cache in response to our query.
    OfferReceived {
        from: IpAddr,
        game_id: String,
        game_name: String,
        size: u64,
        port: u16,
    },
}

/// A discovery node: owns the multicast socket, the local cache list and
/// the peer table.
pub struct P2pNode {
    config: NodeConfig,
    gpu: GpuProfile,
    hostname: String,
    socket: UdpSocket,
    caches: Vec<CacheOffer>,
    peers: HashMap<IpAddr, PeerInfo>,
    running: Arc<AtomicBool>,
    last_announce: Option<Instant>,
}

impl P2pNode {
    /// Bind the discovery socket and join the multicast group.
    pub fn new(config: NodeConfig, gpu: GpuProfile) -> Result<Self> {
        let socket = bind_multicast(config.discovery_port)?;
        let hostname = config
            .hostname
            .clone()
            .or_else(system_hostname)
            .unwrap_or_else(|| "nvshader".to_string());

        tracing::info!(
            port = config.discovery_port,
            hostname = %hostname,
            arch = %gpu.architecture,
            "discovery node up"
        );

        Ok(Self {
            config,
            gpu,
            hostname,
            socket,
            caches: Vec::new(),
            peers: HashMap::new(),
            running: Arc::new(AtomicBool::new(true)),
            last_announce: None,
        })
    }

    /// Replace the served cache list from scanned entries. Only entries
    /// bound to a game are served.
    pub fn set_caches_from_entries(&mut self, entries: &[CacheEntry]) {
        self.caches = entries
            .iter()
            .filter_map(|entry| {
                Some(CacheOffer {
                    game_id: entry.game_id.clone()?,
                    game_name: entry.game_name.clone()?,
                    kind: entry.kind.short_name().to_string(),
                    size: entry.size_bytes,
                })
            })
            .collect();
    }

    /// Add one served cache.
    pub fn add_cache(&mut self, offer: CacheOffer) {
        self.caches.push(offer);
    }

    /// The caches this node serves.
    #[must_use]
    pub fn caches(&self) -> &[CacheOffer] {
        &self.caches
    }

    /// Peers seen so far, keyed by address.
    #[must_use]
    pub fn peers(&self) -> &HashMap<IpAddr, PeerInfo> {
        &self.peers
    }

    /// Handle to stop [`P2pNode::run`] from outside.
    #[must_use]
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Multicast our announcement.
    pub fn announce(&mut self) -> Result<()> {
        let message = Message::Announce {
            hostname: self.hostname.clone(),
            port: self.config.transfer_port,
            arch: self.gpu.architecture.clone(),
            driver: self.gpu.driver_version.clone(),
            caches: self.caches.clone(),
        };
        self.send_multicast(&message)?;
        self.last_announce = Some(Instant::now());
        Ok(())
    }

    /// Multicast a query for `game_id` caches matching our architecture.
    pub fn query(&self, game_id: &str) -> Result<()> {
        let message = Message::Query {
            game_id: game_id.to_string(),
            arch: self.gpu.architecture.clone(),
        };
        self.send_multicast(&message)
    }

    /// Drain pending datagrams, updating the peer table and answering
    /// queries. Returns the events of interest to the caller.
    pub fn poll(&mut self) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::debug!(error = %err, "discovery recv error");
                    break;
                }
            };
            let Some(message) = Message::decode(&buf[..len]) else {
                // Malformed datagrams are dropped without note.
                continue;
            };
            if let Some(event) = self.handle_message(message, from) {
                events.push(event);
            }
        }
        events
    }

    /// Poll and re-announce at ~100 ms cadence until
    /// [`NodeHandle::stop`] is called.
    pub fn run(&mut self) {
        self.running.store(true, Ordering::Relaxed);
        while self.running.load(Ordering::Relaxed) {
            let due = self
                .last_announce
                .map_or(true, |t| t.elapsed() >= self.config.announce_interval);
            if due {
                if let Err(err) = self.announce() {
                    tracing::warn!(error = %err, "announce failed");
                    self.last_announce = Some(Instant::now());
                }
            }
            self.poll();
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Stop a running loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn handle_message(&mut self, message: Message, from: SocketAddr) -> Option<DiscoveryEvent> {
        match message {
            Message::Announce {
                hostname,
                port,
                arch,
                driver,
                caches,
            } => {
                if hostname == self.hostname {
                    return None; // our own multicast loopback
                }
                let peer = PeerInfo {
                    addr: from.ip(),
                    port,
                    hostname,
                    arch,
                    driver,
                    offers: caches,
                };
                tracing::debug!(peer = %peer.hostname, addr = %peer.addr, "peer announce");
                self.peers.insert(from.ip(), peer.clone());
                Some(DiscoveryEvent::PeerSeen(peer))
            }
            Message::Query { game_id, arch } => {
                if let Some(offer) = offer_for(&self.caches, &self.gpu.architecture, &game_id, &arch)
                {
                    let response = Message::Offer {
                        game_id: offer.game_id.clone(),
                        game_name: offer.game_name.clone(),
                        size: offer.size,
                        port: self.config.transfer_port,
                    };
                    if let Err(err) = self.send_multicast(&response) {
                        tracing::warn!(error = %err, "offer send failed");
                    }
                }
                None
            }
            Message::Offer {
                game_id,
                game_name,
                size,
                port,
            } => Some(DiscoveryEvent::OfferReceived {
                from: from.ip(),
                game_id,
                game_name,
                size,
                port,
            }),
            // Reserved types are accepted and ignored.
            Message::Request { .. } | Message::Ack { .. } => None,
        }
    }

    fn send_multicast(&self, message: &Message) -> Result<()> {
        let bytes = message.encode()?;
        let group = SocketAddrV4::new(MULTICAST_GROUP, self.config.discovery_port);
        self.socket
            .send_to(&bytes, group)
            .map_err(NvError::SendFailed)?;
        Ok(())
    }
}

/// Handle for stopping a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    running: Arc<AtomicBool>,
}

impl NodeHandle {
    /// Ask the node loop to exit after its current poll.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// The offer policy: serve a query iff we hold a cache for the game and
/// the querier's architecture equals ours.
#[must_use]
pub fn offer_for<'c>(
    caches: &'c [CacheOffer],
    own_arch: &str,
    game_id: &str,
    query_arch: &str,
) -> Option<&'c CacheOffer> {
    if own_arch != query_arch {
        return None;
    }
    caches.iter().find(|c| c.game_id == game_id)
}

fn bind_multicast(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(NvError::SocketCreateFailed)?;
    socket
        .set_reuse_address(true)
        .map_err(NvError::SocketCreateFailed)?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket
        .bind(&bind_addr.into())
        .map_err(NvError::BindFailed)?;
    // Join on the default interface. Hosts without a multicast route
    // (containers, airgapped boxes) can still send and unicast-receive.
    if let Err(err) = socket.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED) {
        tracing::warn!(error = %err, "multicast join failed");
    }
    socket
        .set_nonblocking(true)
        .map_err(NvError::SocketCreateFailed)?;
    Ok(socket.into())
}

fn system_hostname() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offers() -> Vec<CacheOffer> {
        vec![
            CacheOffer {
                game_id: "steam:1086940".into(),
                game_name: "Baldur's Gate 3".into(),
                kind: "fossilize".into(),
                size: 1024,
            },
            CacheOffer {
                game_id: "steam:570".into(),
                game_name: "Dota 2".into(),
                kind: "dxvk".into(),
                size: 2048,
            },
        ]
    }

    #[test]
    fn test_offer_requires_matching_game_and_arch() {
        let caches = offers();

        // Matching game and architecture: offered.
        let hit = offer_for(&caches, "Ada Lovelace", "steam:1086940", "Ada Lovelace");
        assert_eq!(hit.unwrap().game_name, "Baldur's Gate 3");

        // Architecture mismatch: silently refused.
        assert!(offer_for(&caches, "Ada Lovelace", "steam:1086940", "Ampere").is_none());

        // Unknown game: refused.
        assert!(offer_for(&caches, "Ada Lovelace", "steam:999", "Ada Lovelace").is_none());
    }

    #[test]
    fn test_node_answers_query_per_policy() {
        let gpu = GpuProfile::from_ids(nvshader_core::NVIDIA_VENDOR_ID, 0x2684); // Ada
        let mut node = P2pNode::new(
            NodeConfig::default()
                .with_hostname("test-node")
                .with_discovery_port(0),
            gpu,
        )
        .unwrap();
        node.add_cache(offers().remove(0));

        let from: SocketAddr = "127.0.0.1:5555".parse().unwrap();

        // Query with matching architecture produces no caller event but
        // is answered on the wire; mismatched architecture is ignored.
        let event = node.handle_message(
            Message::Query {
                game_id: "steam:1086940".into(),
                arch: "Ampere".into(),
            },
            from,
        );
        assert!(event.is_none());
    }

    #[test]
    fn test_announce_updates_peer_table() {
        let gpu = GpuProfile::from_ids(nvshader_core::NVIDIA_VENDOR_ID, 0x2684);
        let mut node = P2pNode::new(
            NodeConfig::default()
                .with_hostname("self")
                .with_discovery_port(0),
            gpu,
        )
        .unwrap();

        let from: SocketAddr = "192.168.1.50:34789".parse().unwrap();
        let event = node.handle_message(
            Message::Announce {
                hostname: "other".into(),
                port: TRANSFER_PORT,
                arch: "Ampere".into(),
                driver: "550.120".into(),
                caches: offers(),
            },
            from,
        );
        assert!(matches!(event, Some(DiscoveryEvent::PeerSeen(_))));
        let peer = node.peers().get(&from.ip()).unwrap();
        assert_eq!(peer.hostname, "other");
        assert_eq!(peer.offers.len(), 2);

        // Our own announce loops back and is ignored.
        let own = node.handle_message(
            Message::Announce {
                hostname: "self".into(),
                port: TRANSFER_PORT,
                arch: "Ada Lovelace".into(),
                driver: String::new(),
                caches: Vec::new(),
            },
            from,
        );
        assert!(own.is_none());
    }

    #[test]
    fn test_set_caches_from_entries_requires_game_binding() {
        use nvshader_core::{CacheEntry, CacheKind};

        let gpu = GpuProfile::from_ids(nvshader_core::NVIDIA_VENDOR_ID, 0x2204);
        let mut node =
            P2pNode::new(NodeConfig::default().with_discovery_port(0), gpu).unwrap();

        let mut bound = CacheEntry::file("/a.foz", CacheKind::Fossilize, 10, 1);
        bound.game_id = Some("steam:570".into());
        bound.game_name = Some("Dota 2".into());
        let unbound = CacheEntry::file("/b.foz", CacheKind::Fossilize, 20, 2);

        node.set_caches_from_entries(&[bound, unbound]);
        assert_eq!(node.caches().len(), 1);
        assert_eq!(node.caches()[0].game_id, "steam:570");
        assert_eq!(node.caches()[0].kind, "fossilize");
    }
}
