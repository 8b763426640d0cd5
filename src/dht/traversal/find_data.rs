use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use bytes::Bytes;
use tracing::debug;

use super::put_data::{PutData, StoreRequest};
use super::{DataCallback, Finished, FoundData, Lookup, Summary};
use crate::dht::item::{Item, MutableItem};
use crate::dht::message::{DhtQuery, DhtResponse};
use crate::dht::node_id::NodeId;

/// What a [`FindData`] lookup is after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataKind {
    /// `get_peers` for an info-hash.
    Peers,
    /// `get` for an immutable item.
    ImmutableItem,
    /// `get` for a mutable item stored under this salt.
    MutableItem { salt: Bytes },
}

/// A store phase run against the nodes that handed out write tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    Announce { port: u16, implied_port: bool },
    Put { item: Item, cas: Option<i64> },
}

/// `get_peers` / `get` lookup.
///
/// Every reply may carry a write token, peers or an item. Tokens are kept
/// per node so a follow-up store can use them.
pub struct FindData {
    kind: DataKind,
    tokens: HashMap<NodeId, Bytes>,
    peers: Vec<SocketAddr>,
    seen_peers: HashSet<SocketAddr>,
    item: Option<Item>,
    on_data: Option<DataCallback>,
    follow_up: Option<FollowUp>,
}

impl FindData {
    pub fn new(kind: DataKind, on_data: Option<DataCallback>) -> Self {
        Self {
            kind,
            tokens: HashMap::new(),
            peers: Vec::new(),
            seen_peers: HashSet::new(),
            item: None,
            on_data,
            follow_up: None,
        }
    }

    pub fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = Some(follow_up);
        self
    }

    fn report(&mut self, data: FoundData) {
        if let Some(on_data) = self.on_data.as_mut() {
            on_data(&data);
        }
    }

    fn item_from_reply(&self, response: &DhtResponse) -> Option<Item> {
        let value = response.value.clone()?;
        match &self.kind {
            DataKind::Peers => None,
            DataKind::ImmutableItem => Some(Item::Immutable(value)),
            DataKind::MutableItem { salt } => Some(Item::Mutable(MutableItem {
                value,
                salt: salt.clone(),
                seq: response.seq?,
                public_key: response.public_key?,
                signature: response.signature?,
            })),
        }
    }

    fn on_item(&mut self, candidate: Item, target: &NodeId, from: SocketAddr) {
        if !candidate.matches(target) {
            debug!(%from, "ignoring item that does not match its target");
            return;
        }
        let better = match (&self.item, candidate.seq()) {
            (None, _) => true,
            (Some(current), Some(seq)) => current.seq().is_some_and(|cur| seq > cur),
            (Some(_), None) => false,
        };
        if better {
            self.item = Some(candidate.clone());
            self.report(FoundData::Item(candidate));
        }
    }
}

impl Lookup for FindData {
    fn name(&self) -> &'static str {
        match (&self.kind, &self.follow_up) {
            (_, Some(FollowUp::Announce { .. })) => "announce",
            (_, Some(FollowUp::Put { .. })) => "put",
            (DataKind::Peers, None) => "get_peers",
            (_, None) => "get",
        }
    }

    fn query(&self, target: &NodeId, _node: Option<&NodeId>) -> DhtQuery {
        match self.kind {
            DataKind::Peers => DhtQuery::GetPeers { info_hash: *target },
            DataKind::ImmutableItem => DhtQuery::Get {
                target: *target,
                seq: None,
            },
            DataKind::MutableItem { .. } => DhtQuery::Get {
                target: *target,
                seq: self.item.as_ref().and_then(Item::seq),
            },
        }
    }

    fn on_reply(&mut self, node: &NodeId, addr: SocketAddr, response: &DhtResponse, target: &NodeId) {
        if let Some(token) = &response.token {
            self.tokens.insert(*node, token.clone());
        }

        if !response.values.is_empty() {
            let fresh: Vec<SocketAddr> = response
                .values
                .iter()
                .copied()
                .filter(|peer| self.seen_peers.insert(*peer))
                .collect();
            if !fresh.is_empty() {
                self.peers.extend_from_slice(&fresh);
                self.report(FoundData::Peers(fresh));
            }
        }

        if let Some(candidate) = self.item_from_reply(response) {
            self.on_item(candidate, target, addr);
        }
    }

    fn finish(self: Box<Self>, summary: Summary) -> Finished {
        let this = *self;
        let mut outcome = summary.outcome();
        outcome.peers = this.peers;
        outcome.item = this.item;

        let Some(follow_up) = this.follow_up else {
            return Finished::Outcome(outcome);
        };

        let holders: Vec<(NodeId, SocketAddr, Bytes)> = summary
            .alive
            .iter()
            .filter_map(|(id, addr)| this.tokens.get(id).map(|token| (*id, *addr, token.clone())))
            .take(summary.k)
            .collect();

        let request = match follow_up {
            FollowUp::Announce { port, implied_port } => StoreRequest::Announce { port, implied_port },
            FollowUp::Put { item, cas } => StoreRequest::Put { item, cas },
        };
        let seeds = holders.iter().map(|(id, addr, _)| (*id, *addr)).collect();
        let tokens = holders.into_iter().map(|(id, _, token)| (id, token)).collect();

        Finished::Store {
            lookup: Box::new(PutData::new(request, tokens, outcome)),
            seeds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::bencode::Value;
    use crate::dht::item::create_keypair;

    fn summary(target: NodeId, alive: Vec<(NodeId, SocketAddr)>) -> Summary {
        Summary {
            target,
            alive,
            unqueried: Vec::new(),
            results_target: 8,
            k: 8,
            responses: 0,
            timeouts: 0,
            invokes: 0,
        }
    }

    fn addr(i: u8) -> SocketAddr {
        SocketAddr::from(([10, i, 0, 1], 6881))
    }

    #[test]
    fn test_peers_are_deduplicated() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let mut lookup = FindData::new(
            DataKind::Peers,
            Some(Box::new(move |data: &FoundData| sink.lock().push(data.clone()))),
        );
        let target = NodeId::generate();

        let mut response = DhtResponse::new(NodeId::generate());
        response.values = vec![addr(1), addr(2)];
        lookup.on_reply(&response.id, addr(9), &response, &target);
        response.values = vec![addr(2), addr(3)];
        lookup.on_reply(&response.id, addr(9), &response, &target);

        let reported = reported.lock();
        assert_eq!(reported.len(), 2);
        assert_eq!(reported[1], FoundData::Peers(vec![addr(3)]));
        assert_eq!(lookup.peers, vec![addr(1), addr(2), addr(3)]);
    }

    #[test]
    fn test_immutable_item_is_checked_against_target() {
        let value = Item::immutable(&Value::string("Hello World!")).unwrap();
        let target = value.target();
        let mut lookup = FindData::new(DataKind::ImmutableItem, None);

        let mut bogus = DhtResponse::new(NodeId::generate());
        bogus.value = Some(Bytes::from_static(b"5:other"));
        lookup.on_reply(&bogus.id, addr(1), &bogus, &target);
        assert!(lookup.item.is_none());

        let mut good = DhtResponse::new(NodeId::generate());
        good.value = Some(value.value().clone());
        lookup.on_reply(&good.id, addr(2), &good, &target);
        assert_eq!(lookup.item, Some(value));
    }

    #[test]
    fn test_mutable_item_keeps_highest_seq() {
        let (_, signing_key) = create_keypair(&[7u8; 32]);
        let v1 = MutableItem::sign(&Value::Integer(1), b"salt", 1, &signing_key).unwrap();
        let v2 = MutableItem::sign(&Value::Integer(2), b"salt", 2, &signing_key).unwrap();
        let target = v1.target();

        let mut lookup = FindData::new(
            DataKind::MutableItem {
                salt: Bytes::from_static(b"salt"),
            },
            None,
        );

        for item in [&v2, &v1] {
            let mut response = DhtResponse::new(NodeId::generate());
            response.value = Some(item.value.clone());
            response.seq = Some(item.seq);
            response.public_key = Some(item.public_key);
            response.signature = Some(item.signature);
            lookup.on_reply(&response.id, addr(1), &response, &target);
        }

        assert_eq!(lookup.item.as_ref().and_then(Item::seq), Some(2));
        assert_eq!(
            lookup.query(&target, None),
            DhtQuery::Get {
                target,
                seq: Some(2)
            }
        );
    }

    #[test]
    fn test_announce_follow_up_uses_token_holders() {
        let target = NodeId::generate();
        let mut lookup = FindData::new(DataKind::Peers, None).with_follow_up(FollowUp::Announce {
            port: 6881,
            implied_port: false,
        });

        let with_token = NodeId::generate();
        let without_token = NodeId::generate();
        let mut response = DhtResponse::new(with_token);
        response.token = Some(Bytes::from_static(b"tok"));
        lookup.on_reply(&with_token, addr(1), &response, &target);
        lookup.on_reply(&without_token, addr(2), &DhtResponse::new(without_token), &target);

        let alive = vec![(without_token, addr(2)), (with_token, addr(1))];
        match Box::new(lookup).finish(summary(target, alive)) {
            Finished::Store { seeds, .. } => assert_eq!(seeds, vec![(with_token, addr(1))]),
            _ => panic!("announce must continue with a store phase"),
        }
    }
}
