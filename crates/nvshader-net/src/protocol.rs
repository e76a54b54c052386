//! The LAN discovery wire protocol.
//!
//! Every datagram carries an 8-byte prefix: the seven ASCII bytes
//! `NVCACHE` followed by one message-type octet, then a JSON payload.
//! The JSON also carries a `type` tag so payloads are self-describing;
//! a datagram whose octet and tag disagree is treated as malformed.
//! Malformed datagrams are silently discarded by receivers.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use nvshader_core::{NvError, Result};

/// Datagram prefix magic.
pub const WIRE_MAGIC: &[u8; 7] = b"NVCACHE";

/// Multicast group for discovery.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 99);

/// UDP port the discovery protocol binds.
pub const DISCOVERY_PORT: u16 = 34789;

/// Default TCP port for cache transfers.
pub const TRANSFER_PORT: u16 = 34790;

/// How often a node re-announces itself.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(60);

/// Wire message-type octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Announce = 0x01,
    Query = 0x02,
    Offer = 0x03,
    /// Reserved; defined on the wire but not emitted.
    Request = 0x04,
    /// Reserved; defined on the wire but not emitted.
    Ack = 0x05,
}

impl MessageType {
    /// Decode a type octet.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Announce),
            0x02 => Some(Self::Query),
            0x03 => Some(Self::Offer),
            0x04 => Some(Self::Request),
            0x05 => Some(Self::Ack),
            _ => None,
        }
    }
}

/// One cache a node is willing to serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOffer {
    pub game_id: String,
    pub game_name: String,
    /// Cache kind short name (`dxvk`, `fossilize`, ...).
    pub kind: String,
    pub size: u64,
}

/// Discovery messages, tagged in JSON by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Periodic self-advertisement.
    Announce {
        hostname: String,
        /// TCP transfer port the sender accepts connections on.
        port: u16,
        arch: String,
        driver: String,
        caches: Vec<CacheOffer>,
    },
    /// Request for a specific game's cache.
    Query { game_id: String, arch: String },
    /// Response advertising a matching cache.
    Offer {
        game_id: String,
        game_name: String,
        size: u64,
        port: u16,
    },
    /// Reserved.
    Request { game_id: String },
    /// Reserved.
    Ack { game_id: String },
}

impl Message {
    /// The type octet for this message.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Announce { .. } => MessageType::Announce,
            Self::Query { .. } => MessageType::Query,
            Self::Offer { .. } => MessageType::Offer,
            Self::Request { .. } => MessageType::Request,
            Self::Ack { .. } => MessageType::Ack,
        }
    }

    /// Encode prefix + JSON payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(self)
            .map_err(|err| NvError::InvalidManifest(err.to_string()))?;
        let mut out = Vec::with_capacity(8 + payload.len());
        out.extend_from_slice(WIRE_MAGIC);
        out.push(self.message_type() as u8);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode a datagram. Returns `None` for anything malformed: short
    /// datagrams, wrong magic, unknown type octets, JSON that does not
    /// parse, or an octet that contradicts the JSON tag.
    #[must_use]
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        if datagram.len() < 8 || &datagram[..7] != WIRE_MAGIC {
            return None;
        }
        let wire_type = MessageType::from_u8(datagram[7])?;
        let message: Message = serde_json::from_slice(&datagram[8..]).ok()?;
        (message.message_type() == wire_type).then_some(message)
    }
}

/// Parse a dotted-quad IPv4 address, surfacing the protocol's
/// [`NvError::InvalidAddress`] kind for malformed input.
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr> {
    s.parse()
        .map_err(|_| NvError::InvalidAddress(s.to_string()))
}
