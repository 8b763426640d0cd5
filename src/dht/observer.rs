use std::net::SocketAddr;

use super::node_id::NodeId;

/// Identifies an observer within its traversal.
pub type ObserverKey = u32;

/// Progress of one candidate node in a lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverFlags {
    /// A query was sent (or sending it failed).
    pub queried: bool,
    /// Seeded from the routing table, the caller or a router.
    pub initial: bool,
    /// The node answered.
    pub alive: bool,
    /// The query timed out, errored or could not be sent.
    pub failed: bool,
    /// The short timeout fired while the query was in flight.
    pub short_timeout: bool,
    /// The node ID is a placeholder; the real one arrives with the reply.
    pub no_id: bool,
}

impl ObserverFlags {
    /// Queried, with no outcome yet.
    pub fn in_flight(&self) -> bool {
        self.queried && !self.alive && !self.failed
    }
}

/// Query state for one node in a traversal's result list.
#[derive(Debug, Clone)]
pub struct Observer {
    pub key: ObserverKey,
    pub id: NodeId,
    pub addr: SocketAddr,
    pub flags: ObserverFlags,
}

impl Observer {
    pub fn new(key: ObserverKey, id: NodeId, addr: SocketAddr) -> Self {
        Self {
            key,
            id,
            addr,
            flags: ObserverFlags::default(),
        }
    }

    /// The ID the routing table knows this node by, if any.
    pub fn known_id(&self) -> Option<NodeId> {
        if self.flags.no_id {
            None
        } else {
            Some(self.id)
        }
    }
}
