//! Kademlia Distributed Hash Table (BEP-5)
//!
//! The node itself is [`DhtEngine`], a sans-IO state machine: it is fed
//! datagrams and clock ticks and writes through a [`Transport`].
//! [`DhtServer`] runs one on a tokio UDP socket.
//!
//! Besides `ping`/`find_node`/`get_peers`/`announce_peer` the engine speaks
//! BEP-44 (`get`/`put` of immutable and signed mutable items) and BEP-51
//! (`sample_infohashes`), and enforces BEP-42 node ID restrictions when
//! configured to.

mod dos_blocker;
mod engine;
mod error;
mod item;
mod message;
mod node;
mod node_id;
mod node_id_security;
mod observer;
mod routing;
mod rpc;
mod server;
mod settings;
mod storage;
mod token;
mod transport;
mod traversal;

pub use dos_blocker::DosBlocker;
pub use engine::{DhtEngine, DhtMetrics, PingCallback};
pub use error::{DhtError, StoreError};
pub use item::{
    create_keypair, immutable_target, mutable_target, sign_mutable_item, signature_buffer,
    verify_mutable_item, Item, ItemSignature, MutableItem, PublicKey,
};
pub use message::{error_code, peek_transaction, DhtMessage, DhtQuery, DhtResponse, MessageBody, PutArgs, TransactionId};
pub use node::{NodeEntry, COMPACT_NODE_V4_LEN, COMPACT_NODE_V6_LEN};
pub use node_id::{cmp_distance, compare_ref, distance, distance_exp, NodeId, NODE_ID_LEN};
pub use node_id_security::{generate_id, verify_id};
pub use routing::RoutingTable;
pub use rpc::{FailureKind, Incoming, RpcEvent, RpcManager, TransactionOwner, TraversalId};
pub use server::DhtServer;
pub use settings::DhtSettings;
pub use storage::DhtStorage;
pub use token::TokenSecrets;
pub use transport::Transport;
pub use traversal::{
    DataCallback, DataKind, DoneCallback, FoundData, LookupKind, LookupStatus, TraversalOutcome,
};
