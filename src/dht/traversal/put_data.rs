use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;

use super::{Finished, Lookup, Summary, TraversalOutcome};
use crate::dht::item::Item;
use crate::dht::message::{DhtQuery, DhtResponse, PutArgs};
use crate::dht::node_id::NodeId;

/// The write sent to every token holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRequest {
    Announce { port: u16, implied_port: bool },
    Put { item: Item, cas: Option<i64> },
}

/// Sends one `announce_peer` or `put` to each node of a fixed set.
///
/// Seeded with the nodes (and their write tokens) a previous lookup found;
/// it never learns new nodes. All seeds are queried at once.
pub struct PutData {
    request: StoreRequest,
    tokens: HashMap<NodeId, Bytes>,
    /// The outcome of the lookup phase, completed with the acks.
    carry: TraversalOutcome,
    acked: usize,
}

impl PutData {
    pub fn new(request: StoreRequest, tokens: HashMap<NodeId, Bytes>, carry: TraversalOutcome) -> Self {
        Self {
            request,
            tokens,
            carry,
            acked: 0,
        }
    }

    /// The outcome to report when there was nobody to store at.
    pub fn into_outcome(self) -> TraversalOutcome {
        self.carry
    }
}

impl Lookup for PutData {
    fn name(&self) -> &'static str {
        match self.request {
            StoreRequest::Announce { .. } => "announce_peer",
            StoreRequest::Put { .. } => "put_data",
        }
    }

    fn query(&self, target: &NodeId, node: Option<&NodeId>) -> DhtQuery {
        let token = node
            .and_then(|id| self.tokens.get(id))
            .cloned()
            .unwrap_or_default();

        match &self.request {
            StoreRequest::Announce { port, implied_port } => DhtQuery::AnnouncePeer {
                info_hash: *target,
                port: *port,
                token,
                implied_port: *implied_port,
            },
            StoreRequest::Put { item, cas } => {
                let args = match item {
                    Item::Immutable(value) => PutArgs {
                        token,
                        value: value.clone(),
                        public_key: None,
                        signature: None,
                        seq: None,
                        salt: Bytes::new(),
                        cas: None,
                    },
                    Item::Mutable(item) => PutArgs {
                        token,
                        value: item.value.clone(),
                        public_key: Some(item.public_key),
                        signature: Some(item.signature),
                        seq: Some(item.seq),
                        salt: item.salt.clone(),
                        cas: *cas,
                    },
                };
                DhtQuery::Put(Box::new(args))
            }
        }
    }

    fn on_reply(&mut self, _node: &NodeId, _addr: SocketAddr, _response: &DhtResponse, _target: &NodeId) {
        self.acked += 1;
    }

    fn results_target(&self, _k: usize) -> usize {
        self.tokens.len()
    }

    fn branch_factor(&self, _configured: usize) -> usize {
        self.tokens.len()
    }

    fn adds_reply_nodes(&self) -> bool {
        false
    }

    fn finish(self: Box<Self>, summary: Summary) -> Finished {
        let this = *self;
        let mut outcome = this.carry;
        outcome.stored = this.acked;
        outcome.responses += summary.responses;
        outcome.timeouts += summary.timeouts;
        outcome.invokes += summary.invokes;
        Finished::Outcome(outcome)
    }
}
