use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, trace};

use super::error::{DhtError, StoreError};
use super::item::{immutable_target, mutable_target, Item, MutableItem, PublicKey};
use super::message::{error_code, DhtMessage, DhtQuery, DhtResponse, MessageBody, PutArgs, TransactionId};
use super::node::NodeEntry;
use super::node_id::NodeId;
use super::node_id_security::{generate_id, verify_id, ExternalIpVoter};
use super::routing::RoutingTable;
use super::rpc::{FailureKind, Incoming, RpcEvent, RpcManager, TransactionOwner, TraversalId};
use super::settings::DhtSettings;
use super::storage::DhtStorage;
use super::token::TokenSecrets;
use super::transport::Transport;
use super::traversal::{
    Bootstrap, ClosestNodes, Context, DataCallback, DataKind, DoneCallback, FindData, Finished,
    FollowUp, Lookup, LookupKind, LookupStatus, SampleInfohashes, Traversal,
};
use crate::constants::{DHT_REFRESH_CHECK_INTERVAL, MAX_ITEM_SIZE, MAX_PEERS_PER_REPLY, MAX_SALT_SIZE};

/// Called with the responder's ID, or why the ping failed.
pub type PingCallback = Box<dyn FnOnce(Result<NodeId, DhtError>) + Send>;

/// Counters exposed to the session layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhtMetrics {
    pub nodes: usize,
    pub replacement_nodes: usize,
    pub buckets: usize,
    pub outstanding_queries: usize,
    pub dos_rejections: u64,
    pub active_lookups: usize,
    pub torrents: usize,
    pub peers: usize,
    pub immutable_items: usize,
    pub mutable_items: usize,
}

enum Seeding {
    /// Closest nodes from the routing table, falling back to the routers
    /// (and these extra endpoints).
    Table(Vec<SocketAddr>),
    Fixed(Vec<(NodeId, SocketAddr)>),
}

/// The DHT node: routing table, RPC layer, lookups and local storage.
///
/// Sans-IO: datagrams come in through [`incoming`](Self::incoming), go out
/// through the [`Transport`], and time only moves when the caller passes a
/// new `now`. Call [`tick`](Self::tick) every
/// [`DHT_TICK_INTERVAL`](crate::constants::DHT_TICK_INTERVAL) or so.
pub struct DhtEngine {
    settings: DhtSettings,
    our_id: NodeId,
    table: RoutingTable,
    rpc: RpcManager,
    storage: DhtStorage,
    tokens: TokenSecrets,
    traversals: HashMap<TraversalId, Traversal>,
    next_traversal: u64,
    pings: HashMap<u64, PingCallback>,
    next_ping: u64,
    routers: Vec<SocketAddr>,
    external_ip: ExternalIpVoter,
    last_refresh_check: Instant,
}

impl DhtEngine {
    pub fn new(settings: DhtSettings, our_id: NodeId, transport: Arc<dyn Transport>, now: Instant) -> Self {
        Self {
            table: RoutingTable::new(our_id, &settings),
            rpc: RpcManager::new(our_id, transport, &settings),
            storage: DhtStorage::new(&settings),
            tokens: TokenSecrets::new(settings.token_rotation_interval, now),
            settings,
            our_id,
            traversals: HashMap::new(),
            next_traversal: 1,
            pings: HashMap::new(),
            next_ping: 1,
            routers: Vec::new(),
            external_ip: ExternalIpVoter::default(),
            last_refresh_check: now,
        }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    /// Our address as agreed on by the nodes that answered us.
    pub fn external_ip(&self) -> Option<IpAddr> {
        self.external_ip.external_ip()
    }

    pub fn settings(&self) -> &DhtSettings {
        &self.settings
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn storage(&self) -> &DhtStorage {
        &self.storage
    }

    /// Feeds one datagram. Returns false if it was dropped.
    pub fn incoming(&mut self, data: &[u8], from: SocketAddr, now: Instant) -> bool {
        match self.rpc.incoming(data, from, now) {
            Incoming::Dropped => false,
            Incoming::Query(msg) => {
                self.handle_query(msg, from, now);
                true
            }
            Incoming::Event(event) => {
                self.handle_event(event, now);
                true
            }
        }
    }

    /// Timeouts, token rotation, storage expiry and bucket refresh.
    pub fn tick(&mut self, now: Instant) {
        for event in self.rpc.tick(now) {
            self.handle_event(event, now);
        }

        self.tokens.tick(now);

        if now.saturating_duration_since(self.last_refresh_check) >= DHT_REFRESH_CHECK_INTERVAL {
            self.last_refresh_check = now;
            self.storage.tick(now);
            self.refresh_stale_bucket(now);
        }
    }

    /// The I/O layer learned that `addr` cannot be reached.
    pub fn unreachable(&mut self, addr: SocketAddr, now: Instant) {
        if let Some(event) = self.rpc.unreachable(addr) {
            self.handle_event(event, now);
        }
    }

    /// Adds a well-known entry point. Routers seed lookups when the routing
    /// table is nearly empty but never enter it.
    pub fn add_router_node(&mut self, addr: SocketAddr) {
        if !self.routers.contains(&addr) {
            self.routers.push(addr);
        }
    }

    /// Pings `addr`; if it answers it enters the routing table.
    pub fn add_node(&mut self, addr: SocketAddr, now: Instant) {
        self.send_ping(addr, None, None, now);
    }

    pub fn ping(&mut self, addr: SocketAddr, now: Instant, callback: PingCallback) {
        self.send_ping(addr, None, Some(callback), now);
    }

    pub fn start_lookup(
        &mut self,
        target: NodeId,
        kind: LookupKind,
        now: Instant,
        callback: DoneCallback,
    ) -> TraversalId {
        let lookup: Box<dyn Lookup> = match kind {
            LookupKind::ClosestNodes => Box::new(ClosestNodes::new()),
            LookupKind::Refresh => Box::new(ClosestNodes::refresh()),
            LookupKind::GetPeers => Box::new(FindData::new(DataKind::Peers, None)),
            LookupKind::GetItem => Box::new(FindData::new(DataKind::ImmutableItem, None)),
            LookupKind::SampleInfohashes => Box::new(SampleInfohashes::new(None)),
        };
        self.launch(target, lookup, Seeding::Table(Vec::new()), now, Some(callback))
    }

    /// Stops a lookup. Its callback is dropped without being called.
    pub fn abort_lookup(&mut self, id: TraversalId) -> bool {
        match self.traversals.remove(&id) {
            Some(mut traversal) => {
                debug!(lookup = traversal.name(), target = %traversal.target(), "lookup aborted");
                traversal.abort();
                true
            }
            None => false,
        }
    }

    /// Fills the routing table, starting from `seeds` if it is empty.
    pub fn bootstrap(
        &mut self,
        target: NodeId,
        seeds: &[SocketAddr],
        now: Instant,
        callback: DoneCallback,
    ) -> TraversalId {
        info!(seeds = seeds.len(), nodes = self.table.node_count(), "bootstrapping DHT");
        self.launch(
            target,
            Box::new(Bootstrap),
            Seeding::Table(seeds.to_vec()),
            now,
            Some(callback),
        )
    }

    pub fn get_peers(
        &mut self,
        info_hash: NodeId,
        now: Instant,
        on_data: Option<DataCallback>,
        callback: DoneCallback,
    ) -> TraversalId {
        let lookup = FindData::new(DataKind::Peers, on_data);
        self.launch(info_hash, Box::new(lookup), Seeding::Table(Vec::new()), now, Some(callback))
    }

    /// Looks up peers for `info_hash`, then announces us to the closest nodes
    /// that gave us a token. `implied_port` asks them to use our source port.
    pub fn announce(
        &mut self,
        info_hash: NodeId,
        port: u16,
        implied_port: bool,
        now: Instant,
        callback: DoneCallback,
    ) -> TraversalId {
        let lookup = FindData::new(DataKind::Peers, None).with_follow_up(FollowUp::Announce { port, implied_port });
        self.launch(info_hash, Box::new(lookup), Seeding::Table(Vec::new()), now, Some(callback))
    }

    pub fn get_item(
        &mut self,
        target: NodeId,
        now: Instant,
        on_data: Option<DataCallback>,
        callback: DoneCallback,
    ) -> TraversalId {
        let lookup = FindData::new(DataKind::ImmutableItem, on_data);
        self.launch(target, Box::new(lookup), Seeding::Table(Vec::new()), now, Some(callback))
    }

    pub fn get_mutable_item(
        &mut self,
        public_key: &PublicKey,
        salt: Bytes,
        now: Instant,
        on_data: Option<DataCallback>,
        callback: DoneCallback,
    ) -> TraversalId {
        let target = mutable_target(public_key, &salt);
        let lookup = FindData::new(DataKind::MutableItem { salt }, on_data);
        self.launch(target, Box::new(lookup), Seeding::Table(Vec::new()), now, Some(callback))
    }

    /// Stores `item` at the nodes closest to its target. For a mutable item
    /// the outcome also carries the newest version found in the network.
    pub fn put_item(&mut self, item: Item, cas: Option<i64>, now: Instant, callback: DoneCallback) -> TraversalId {
        let target = item.target();
        let kind = match &item {
            Item::Immutable(_) => DataKind::ImmutableItem,
            Item::Mutable(m) => DataKind::MutableItem { salt: m.salt.clone() },
        };
        let lookup = FindData::new(kind, None).with_follow_up(FollowUp::Put { item, cas });
        self.launch(target, Box::new(lookup), Seeding::Table(Vec::new()), now, Some(callback))
    }

    pub fn sample_infohashes(
        &mut self,
        target: NodeId,
        now: Instant,
        on_data: Option<DataCallback>,
        callback: DoneCallback,
    ) -> TraversalId {
        let lookup = SampleInfohashes::new(on_data);
        self.launch(target, Box::new(lookup), Seeding::Table(Vec::new()), now, Some(callback))
    }

    pub fn metrics(&self) -> DhtMetrics {
        DhtMetrics {
            nodes: self.table.node_count(),
            replacement_nodes: self.table.replacement_count(),
            buckets: self.table.num_buckets(),
            outstanding_queries: self.rpc.num_outstanding(),
            dos_rejections: self.rpc.dos_rejections(),
            active_lookups: self.traversals.len(),
            torrents: self.storage.num_torrents(),
            peers: self.storage.num_peers(),
            immutable_items: self.storage.num_immutable_items(),
            mutable_items: self.storage.num_mutable_items(),
        }
    }

    pub fn lookup_status(&self, now: Instant) -> Vec<LookupStatus> {
        let mut status: Vec<LookupStatus> = self.traversals.values().map(|t| t.status(now)).collect();
        status.sort_by_key(|s| s.id);
        status
    }

    fn send_ping(&mut self, addr: SocketAddr, node_id: Option<NodeId>, callback: Option<PingCallback>, now: Instant) {
        let n = self.next_ping;
        self.next_ping += 1;

        match self.rpc.invoke(DhtQuery::Ping, addr, node_id, TransactionOwner::Ping(n), now) {
            Ok(()) => {
                if let Some(callback) = callback {
                    self.pings.insert(n, callback);
                }
            }
            Err(e) => {
                if let Some(callback) = callback {
                    callback(Err(e));
                }
            }
        }
    }

    /// Counts `voter`'s view of our address. Once enough nodes agree on one
    /// our ID does not verify against, we take a new ID for it.
    fn external_address_vote(&mut self, reported: IpAddr, voter: IpAddr) {
        let Some(ip) = self.external_ip.vote(reported, voter) else {
            return;
        };
        if verify_id(&self.our_id, ip) {
            debug!(%ip, "external address confirmed");
            return;
        }

        let new_id = generate_id(ip);
        info!(%ip, old = %self.our_id, new = %new_id, "external address changed, switching node id");
        self.set_our_id(new_id);
    }

    /// Moves the routing table over to `id`; entries that no longer fit are
    /// dropped.
    fn set_our_id(&mut self, id: NodeId) {
        let mut table = RoutingTable::new(id, &self.settings);
        self.table.for_each_node(|node| {
            table.add_node(node.clone());
        });
        self.table = table;
        self.rpc.set_our_id(id);
        self.our_id = id;
    }

    fn launch(
        &mut self,
        target: NodeId,
        lookup: Box<dyn Lookup>,
        seeding: Seeding,
        now: Instant,
        callback: Option<DoneCallback>,
    ) -> TraversalId {
        let id = TraversalId(self.next_traversal);
        self.next_traversal += 1;

        let mut traversal = Traversal::new(id, target, self.our_id, lookup, &self.settings, callback, now);
        let (seeds, routers) = match seeding {
            Seeding::Table(extra) => {
                let seeds = self
                    .table
                    .closest_nodes(&target, traversal.seed_count())
                    .into_iter()
                    .map(|n| (n.id, n.addr))
                    .collect();
                let routers = self.routers.iter().copied().chain(extra).collect::<Vec<_>>();
                (seeds, routers)
            }
            Seeding::Fixed(seeds) => (seeds, Vec::new()),
        };

        let done = {
            let mut ctx = Context {
                rpc: &mut self.rpc,
                table: &mut self.table,
                settings: &self.settings,
                now,
            };
            traversal.start(&mut ctx, seeds, &routers)
        };

        if done {
            self.complete(traversal, now);
        } else {
            self.traversals.insert(id, traversal);
        }
        id
    }

    fn with_traversal(
        &mut self,
        id: TraversalId,
        now: Instant,
        f: impl FnOnce(&mut Traversal, &mut Context<'_>) -> bool,
    ) {
        let Some(mut traversal) = self.traversals.remove(&id) else {
            return;
        };

        let done = {
            let mut ctx = Context {
                rpc: &mut self.rpc,
                table: &mut self.table,
                settings: &self.settings,
                now,
            };
            f(&mut traversal, &mut ctx)
        };

        if done {
            self.complete(traversal, now);
        } else {
            self.traversals.insert(id, traversal);
        }
    }

    fn complete(&mut self, traversal: Traversal, now: Instant) {
        let target = *traversal.target();
        let (finished, callback) = traversal.finish(self.table.bucket_size());

        match finished {
            Finished::Outcome(outcome) => {
                if let Some(callback) = callback {
                    callback(outcome);
                }
            }
            Finished::PingThen(addrs, outcome) => {
                for addr in addrs {
                    self.send_ping(addr, None, None, now);
                }
                info!(nodes = self.table.node_count(), "DHT bootstrap complete");
                if let Some(callback) = callback {
                    callback(outcome);
                }
            }
            Finished::Store { lookup, seeds } => {
                if seeds.is_empty() {
                    debug!(target = %target, "no write tokens, nothing to store");
                    if let Some(callback) = callback {
                        callback((*lookup).into_outcome());
                    }
                } else {
                    self.launch(target, lookup, Seeding::Fixed(seeds), now, callback);
                }
            }
        }
    }

    fn refresh_stale_bucket(&mut self, now: Instant) {
        if self.table.node_count() == 0 {
            return;
        }
        let Some(&idx) = self
            .table
            .stale_buckets(now, self.settings.bucket_refresh_interval)
            .first()
        else {
            return;
        };

        let target = self.table.random_id_in_bucket(idx);
        self.table.touch_bucket(idx, now);
        debug!(bucket = idx, target = %target, "refreshing stale bucket");
        self.launch(target, Box::new(ClosestNodes::refresh()), Seeding::Table(Vec::new()), now, None);
    }

    fn handle_event(&mut self, event: RpcEvent, now: Instant) {
        match event {
            RpcEvent::Reply {
                owner,
                addr,
                rtt,
                response,
                reported_ip,
            } => {
                if let Some(reported) = reported_ip {
                    self.external_address_vote(reported.ip(), addr.ip());
                }
                if !self.routers.contains(&addr) {
                    let rtt = u16::try_from(rtt.as_millis()).unwrap_or(u16::MAX - 1).min(u16::MAX - 1);
                    self.table.node_seen(response.id, addr, rtt, now);
                }
                match owner {
                    TransactionOwner::Traversal { traversal, observer } => {
                        self.with_traversal(traversal, now, |t, ctx| t.on_reply(ctx, observer, &response));
                    }
                    TransactionOwner::Ping(n) => {
                        if let Some(callback) = self.pings.remove(&n) {
                            callback(Ok(response.id));
                        }
                    }
                }
            }
            RpcEvent::Failure {
                owner,
                addr,
                node_id,
                kind,
            } => {
                trace!(%addr, ?kind, "query failed");
                if !matches!(kind, FailureKind::Error { .. }) {
                    if let Some(id) = node_id {
                        self.table.node_failed(&id, &addr);
                    }
                }
                match owner {
                    TransactionOwner::Traversal { traversal, observer } => {
                        self.with_traversal(traversal, now, |t, ctx| t.on_failure(ctx, observer));
                    }
                    TransactionOwner::Ping(n) => {
                        if let Some(callback) = self.pings.remove(&n) {
                            callback(Err(match kind {
                                FailureKind::Error { code, message } => DhtError::Remote { code, message },
                                FailureKind::Malformed | FailureKind::WrongNode => {
                                    DhtError::InvalidMessage("bad ping reply".into())
                                }
                                FailureKind::Timeout | FailureKind::Unreachable => DhtError::Timeout,
                            }));
                        }
                    }
                }
            }
            RpcEvent::ShortTimeout { owner } => {
                if let TransactionOwner::Traversal { traversal, observer } = owner {
                    self.with_traversal(traversal, now, |t, ctx| t.on_short_timeout(ctx, observer));
                }
            }
        }
    }

    fn handle_query(&mut self, msg: DhtMessage, from: SocketAddr, now: Instant) {
        let MessageBody::Query { sender_id, query } = msg.body else {
            return;
        };
        if sender_id == self.our_id {
            return;
        }
        self.table.heard_about(sender_id, from);

        trace!(%from, method = query.method(), client = ?msg.version, "DHT query");
        let tid = msg.transaction_id;
        let result = match query {
            DhtQuery::Ping => Ok(DhtResponse::new(self.our_id)),
            DhtQuery::FindNode { target } => Ok(self.nodes_response(&target, from)),
            DhtQuery::GetPeers { info_hash } => {
                let mut response = self.nodes_response(&info_hash, from);
                response.token = Some(self.tokens.generate(from.ip(), &info_hash));
                response.values = self.storage.get_peers(&info_hash, MAX_PEERS_PER_REPLY);
                Ok(response)
            }
            DhtQuery::AnnouncePeer {
                info_hash,
                port,
                token,
                implied_port,
            } => {
                if self.tokens.verify(&token, from.ip(), &info_hash) {
                    let port = if implied_port { from.port() } else { port };
                    self.storage
                        .announce_peer(info_hash, SocketAddr::new(from.ip(), port), now);
                    Ok(DhtResponse::new(self.our_id))
                } else {
                    debug!(%from, "announce_peer with invalid token");
                    Err(StoreError::InvalidToken)
                }
            }
            DhtQuery::Get { target, seq } => Ok(self.get_response(&target, seq, from)),
            DhtQuery::Put(args) => self
                .handle_put(*args, from, now)
                .map(|_| DhtResponse::new(self.our_id)),
            DhtQuery::SampleInfohashes { target } => {
                let mut response = self.nodes_response(&target, from);
                let (samples, num) = self.storage.sample_infohashes(self.settings.max_infohash_samples);
                response.samples = samples;
                response.num = Some(num as i64);
                response.interval = Some(self.settings.sample_infohashes_interval);
                Ok(response)
            }
            DhtQuery::Unknown { method } => {
                debug!(%from, method = %method, "unknown DHT method");
                self.send_error(tid, error_code::METHOD_UNKNOWN, "Method Unknown", from);
                return;
            }
        };

        match result {
            Ok(response) => {
                self.rpc
                    .send_reply(&DhtMessage::response(tid, response, from), from);
            }
            Err(e) => self.send_error(tid, e.code(), &e.to_string(), from),
        }
    }

    fn send_error(&self, tid: TransactionId, code: i64, message: &str, to: SocketAddr) {
        self.rpc.send_reply(&DhtMessage::error(tid, code, message), to);
    }

    /// A reply carrying the closest nodes we know in the requester's address
    /// family.
    fn nodes_response(&self, target: &NodeId, from: SocketAddr) -> DhtResponse {
        let nodes: Vec<NodeEntry> = self
            .table
            .closest_nodes(target, self.table.bucket_size() * 2)
            .into_iter()
            .filter(|n| n.addr.is_ipv4() == from.is_ipv4())
            .take(self.table.bucket_size())
            .collect();

        let mut response = DhtResponse::new(self.our_id);
        if from.is_ipv4() {
            response.nodes = nodes;
        } else {
            response.nodes6 = nodes;
        }
        response
    }

    fn get_response(&self, target: &NodeId, seq: Option<i64>, from: SocketAddr) -> DhtResponse {
        let mut response = self.nodes_response(target, from);
        response.token = Some(self.tokens.generate(from.ip(), target));

        if let Some(value) = self.storage.get_immutable(target) {
            response.value = Some(value.clone());
        } else if let Some(item) = self.storage.get_mutable(target) {
            response.seq = Some(item.seq);
            response.public_key = Some(item.public_key);
            if !matches!(seq, Some(seq) if seq >= item.seq) {
                response.value = Some(item.value.clone());
                response.signature = Some(item.signature);
            }
        }
        response
    }

    fn handle_put(&mut self, args: PutArgs, from: SocketAddr, now: Instant) -> Result<NodeId, StoreError> {
        if args.value.len() > MAX_ITEM_SIZE {
            return Err(StoreError::MessageTooBig);
        }
        if args.salt.len() > MAX_SALT_SIZE {
            return Err(StoreError::SaltTooBig);
        }

        match (args.public_key, args.signature, args.seq) {
            (None, None, _) => {
                let target = immutable_target(&args.value);
                if !self.tokens.verify(&args.token, from.ip(), &target) {
                    return Err(StoreError::InvalidToken);
                }
                self.storage.put_immutable(args.value, from.ip(), now)
            }
            (Some(public_key), Some(signature), Some(seq)) => {
                let target = mutable_target(&public_key, &args.salt);
                if !self.tokens.verify(&args.token, from.ip(), &target) {
                    return Err(StoreError::InvalidToken);
                }
                let item = MutableItem {
                    value: args.value,
                    salt: args.salt,
                    seq,
                    public_key,
                    signature,
                };
                self.storage.put_mutable(item, args.cas, from.ip(), now)
            }
            _ => Err(StoreError::InvalidArgument),
        }
    }
}
