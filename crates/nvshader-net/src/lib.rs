//! # nvshader-net
//!
//! Cache portability and LAN exchange.
//!
//! Two on-disk formats and one wire protocol:
//!
//! - [`archive`]: plain bundle directories (`manifest.json` + `cache/`)
//!   for backup and restore on the same machine
//! - [`package`]: `.nvcache` packages, bundles stamped with the producing
//!   GPU's identity for sharing between machines
//! - [`protocol`] / [`discovery`] / [`transfer`]: UDP-multicast peer
//!   discovery and TCP cache transfer between compatible hosts
//!
//! Peers are unauthenticated by design; the protocol is meant for
//! trusted local networks.

pub mod archive;
pub mod discovery;
pub mod package;
pub mod protocol;
pub mod transfer;

pub use archive::{export_bundle, import_bundle, read_manifest, ArchiveEntry, ArchiveManifest};
pub use discovery::{DiscoveryEvent, NodeConfig, NodeHandle, P2pNode, PeerInfo};
pub use package::{
    import_package, read_package_manifest, write_package, GpuMetadata, ImportReport,
    PackageEntry, PackageManifest,
};
pub use protocol::{
    parse_ipv4, CacheOffer, Message, MessageType, ANNOUNCE_INTERVAL, DISCOVERY_PORT,
    MULTICAST_GROUP, TRANSFER_PORT, WIRE_MAGIC,
};
pub use transfer::{
    receive_cache, send_cache, ReceivedCache, TransferHeader, TransferListener, CHUNK_SIZE,
    TRANSFER_MAGIC,
};
