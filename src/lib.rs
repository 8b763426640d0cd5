//! rdht - A Kademlia DHT node
//!
//! This library implements the BitTorrent mainline DHT following the BEP
//! (BitTorrent Enhancement Proposals) specifications.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`dht`] - BEP-5 DHT with BEP-42 node ID security, BEP-44 items and
//!   BEP-51 infohash sampling
//! - [`constants`] - Protocol limits and default timings

pub mod bencode;
pub mod constants;
pub mod dht;

pub use bencode::{decode, encode, BencodeError, Value};
pub use dht::{
    DhtEngine, DhtError, DhtMessage, DhtMetrics, DhtServer, DhtSettings, Item, MutableItem, NodeEntry,
    NodeId, RoutingTable, TraversalOutcome,
};
