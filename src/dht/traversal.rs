//! Iterative lookups.
//!
//! A [`Traversal`] walks the ID space toward a target: it keeps a result
//! list of [`Observer`]s sorted by XOR distance, keeps up to
//! `branch_factor` queries in flight, folds the nodes each reply returns
//! back into the list, and stops once the closest `k` entries have all
//! answered (or nothing is left to ask). What is asked and what is done
//! with the answers is supplied by a [`Lookup`] implementation.

mod bootstrap;
mod find_data;
mod put_data;
mod sample_infohashes;

use std::cmp::Ordering;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::item::Item;
use super::message::{DhtQuery, DhtResponse};
use super::node_id::{cmp_distance, NodeId};
use super::observer::{Observer, ObserverFlags, ObserverKey};
use super::routing::RoutingTable;
use super::rpc::{RpcManager, TransactionOwner, TraversalId};
use super::settings::DhtSettings;

pub use bootstrap::Bootstrap;
pub use find_data::{DataKind, FindData, FollowUp};
pub use put_data::PutData;
pub use sample_infohashes::SampleInfohashes;

/// Called once when a traversal completes. Never called for an aborted one.
pub type DoneCallback = Box<dyn FnOnce(TraversalOutcome) + Send>;

/// Called for every piece of data a lookup finds, as it arrives.
pub type DataCallback = Box<dyn FnMut(&FoundData) + Send>;

/// Data reported by a lookup while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoundData {
    /// Peers not reported before.
    Peers(Vec<SocketAddr>),
    /// A validated item, better than anything reported before.
    Item(Item),
    Samples {
        from: SocketAddr,
        samples: Vec<NodeId>,
        interval: Option<i64>,
        num: Option<i64>,
    },
}

/// What a finished traversal hands to its done callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalOutcome {
    pub target: NodeId,
    /// Nodes that answered, closest first.
    pub nodes: Vec<(NodeId, SocketAddr)>,
    pub peers: Vec<SocketAddr>,
    /// Highest-sequence valid item seen.
    pub item: Option<Item>,
    pub samples: Vec<NodeId>,
    pub interval: Option<i64>,
    pub num: Option<i64>,
    /// Store acknowledgements (announce and put).
    pub stored: usize,
    pub responses: usize,
    pub timeouts: usize,
    pub invokes: usize,
}

/// The lookups that [`DhtEngine::start_lookup`](super::DhtEngine::start_lookup)
/// can start without extra parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    ClosestNodes,
    Refresh,
    GetPeers,
    GetItem,
    SampleInfohashes,
}

/// Snapshot of a running traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupStatus {
    pub id: TraversalId,
    pub kind: &'static str,
    pub target: NodeId,
    pub branch_factor: usize,
    pub outstanding: usize,
    pub responses: usize,
    pub timeouts: usize,
    /// Entries not queried yet.
    pub nodes_left: usize,
    pub elapsed: Duration,
}

/// State of a traversal at completion, handed to [`Lookup::finish`].
#[derive(Debug, Clone)]
pub struct Summary {
    pub target: NodeId,
    /// Every node that answered, closest first.
    pub alive: Vec<(NodeId, SocketAddr)>,
    /// Entries that were never queried.
    pub unqueried: Vec<SocketAddr>,
    pub results_target: usize,
    /// Bucket size of the routing table.
    pub k: usize,
    pub responses: usize,
    pub timeouts: usize,
    pub invokes: usize,
}

impl Summary {
    /// The outcome every lookup starts from: the closest live nodes and the
    /// counters.
    pub fn outcome(&self) -> TraversalOutcome {
        TraversalOutcome {
            target: self.target,
            nodes: self.alive.iter().take(self.results_target).copied().collect(),
            responses: self.responses,
            timeouts: self.timeouts,
            invokes: self.invokes,
            ..Default::default()
        }
    }
}

/// What the engine does once a traversal is over.
pub enum Finished {
    /// Report to the caller.
    Outcome(TraversalOutcome),
    /// Ping these endpoints, then report.
    PingThen(Vec<SocketAddr>, TraversalOutcome),
    /// Store at the nodes that gave us write tokens, then report. The
    /// caller's callback moves to the store traversal.
    Store {
        lookup: Box<PutData>,
        seeds: Vec<(NodeId, SocketAddr)>,
    },
}

/// The per-kind half of a traversal.
pub trait Lookup: Send {
    fn name(&self) -> &'static str;

    /// The query to send to `node` (`None` for a router whose ID we do not
    /// know yet).
    fn query(&self, target: &NodeId, node: Option<&NodeId>) -> DhtQuery;

    fn on_reply(&mut self, _node: &NodeId, _addr: SocketAddr, _response: &DhtResponse, _target: &NodeId) {}

    /// Live nodes at the top of the results that make the lookup complete.
    fn results_target(&self, k: usize) -> usize {
        k
    }

    fn branch_factor(&self, configured: usize) -> usize {
        configured
    }

    /// Seeds are `branch_factor * 2 * seed_multiplier` nodes from the table.
    fn seed_multiplier(&self) -> usize {
        1
    }

    /// Whether nodes returned in replies join the results and the table.
    fn adds_reply_nodes(&self) -> bool {
        true
    }

    fn finish(self: Box<Self>, summary: Summary) -> Finished;
}

/// The plain `find_node` lookup: discovers the nodes closest to a target.
pub struct ClosestNodes {
    name: &'static str,
}

impl ClosestNodes {
    pub fn new() -> Self {
        Self { name: "closest_nodes" }
    }

    /// A lookup run only to keep a bucket fresh.
    pub fn refresh() -> Self {
        Self { name: "refresh" }
    }
}

impl Default for ClosestNodes {
    fn default() -> Self {
        Self::new()
    }
}

impl Lookup for ClosestNodes {
    fn name(&self) -> &'static str {
        self.name
    }

    fn query(&self, target: &NodeId, _node: Option<&NodeId>) -> DhtQuery {
        DhtQuery::FindNode { target: *target }
    }

    fn finish(self: Box<Self>, summary: Summary) -> Finished {
        Finished::Outcome(summary.outcome())
    }
}

/// Shared state a traversal needs while it runs.
pub(crate) struct Context<'a> {
    pub rpc: &'a mut RpcManager,
    pub table: &'a mut RoutingTable,
    pub settings: &'a DhtSettings,
    pub now: Instant,
}

/// One run of the iterative lookup.
pub struct Traversal {
    id: TraversalId,
    target: NodeId,
    our_id: NodeId,
    lookup: Box<dyn Lookup>,
    results: Vec<Observer>,
    next_key: ObserverKey,
    branch_factor: usize,
    /// Queries in flight.
    invoke_count: usize,
    invokes: usize,
    responses: usize,
    timeouts: usize,
    callback: Option<DoneCallback>,
    started: Instant,
}

impl Traversal {
    pub(crate) fn new(
        id: TraversalId,
        target: NodeId,
        our_id: NodeId,
        lookup: Box<dyn Lookup>,
        settings: &DhtSettings,
        callback: Option<DoneCallback>,
        now: Instant,
    ) -> Self {
        let branch_factor = lookup.branch_factor(settings.branch_factor).max(1);
        Self {
            id,
            target,
            our_id,
            lookup,
            results: Vec::new(),
            next_key: 0,
            branch_factor,
            invoke_count: 0,
            invokes: 0,
            responses: 0,
            timeouts: 0,
            callback,
            started: now,
        }
    }

    pub fn id(&self) -> TraversalId {
        self.id
    }

    pub fn target(&self) -> &NodeId {
        &self.target
    }

    pub fn name(&self) -> &'static str {
        self.lookup.name()
    }

    /// How many nodes to take from the routing table as seeds.
    pub fn seed_count(&self) -> usize {
        self.branch_factor * 2 * self.lookup.seed_multiplier().max(1)
    }

    /// Seeds the result list and sends the first queries. Routers are only
    /// used when fewer than `min_seed_nodes` seeds are known. Returns true
    /// if the traversal is already complete.
    pub(crate) fn start(
        &mut self,
        ctx: &mut Context<'_>,
        seeds: Vec<(NodeId, SocketAddr)>,
        routers: &[SocketAddr],
    ) -> bool {
        for (id, addr) in seeds {
            self.add_entry(Some(id), addr, true, ctx.settings);
        }
        if self.results.len() < ctx.settings.min_seed_nodes {
            for addr in routers {
                self.add_entry(None, *addr, true, ctx.settings);
            }
        }

        debug!(
            lookup = self.lookup.name(),
            target = %self.target,
            seeds = self.results.len(),
            "starting lookup"
        );

        if self.results.is_empty() {
            return true;
        }
        self.add_requests(ctx)
    }

    /// Inserts a candidate in distance order. `None` is a node whose ID is
    /// unknown; it gets a random placeholder.
    fn add_entry(&mut self, id: Option<NodeId>, addr: SocketAddr, initial: bool, settings: &DhtSettings) {
        let (id, no_id) = match id {
            Some(id) => (id, false),
            None => (NodeId::generate(), true),
        };

        if id == self.our_id || self.results.iter().any(|o| o.id == id) {
            return;
        }

        if settings.restrict_search_ips
            && !initial
            && self.results.iter().any(|o| same_subnet(o.addr.ip(), addr.ip()))
        {
            trace!(%addr, "skipping lookup entry close to an existing one");
            return;
        }

        let mut observer = Observer::new(self.next_key, id, addr);
        self.next_key = self.next_key.wrapping_add(1);
        observer.flags = ObserverFlags {
            initial,
            no_id,
            ..Default::default()
        };
        self.insert_sorted(observer);

        let max = settings.max_results.max(1);
        let mut idx = self.results.len();
        while self.results.len() > max && idx > max {
            idx -= 1;
            if !self.results[idx].flags.in_flight() {
                self.results.remove(idx);
            }
        }
    }

    fn insert_sorted(&mut self, observer: Observer) {
        let pos = self
            .results
            .partition_point(|o| cmp_distance(&o.id, &observer.id, &self.target) == Ordering::Less);
        self.results.insert(pos, observer);
    }

    fn position(&self, key: ObserverKey) -> Option<usize> {
        self.results.iter().position(|o| o.key == key)
    }

    fn invoke(&self, ctx: &mut Context<'_>, idx: usize) -> bool {
        let observer = &self.results[idx];
        let node_id = observer.known_id();
        let query = self.lookup.query(&self.target, node_id.as_ref());
        let owner = TransactionOwner::Traversal {
            traversal: self.id,
            observer: observer.key,
        };

        let sent = ctx.rpc.invoke(query, observer.addr, node_id, owner, ctx.now).is_ok();
        if sent {
            if let Some(id) = node_id {
                ctx.table.set_last_queried(&id, ctx.now);
            }
            trace!(lookup = self.lookup.name(), addr = %observer.addr, "invoked");
        }
        sent
    }

    /// Sends queries until the branch factor is used up. Returns true when
    /// the closest `results_target` entries have all answered with nothing
    /// in flight among them, or when nothing is in flight at all.
    fn add_requests(&mut self, ctx: &mut Context<'_>) -> bool {
        let mut results_target = self.lookup.results_target(ctx.table.bucket_size());
        let mut outstanding = 0;

        let mut idx = 0;
        while idx < self.results.len() && results_target > 0 {
            let saturated = if ctx.settings.aggressive_lookups {
                outstanding >= self.branch_factor
            } else {
                self.invoke_count >= self.branch_factor
            };
            if saturated {
                break;
            }

            let flags = self.results[idx].flags;
            if flags.alive {
                results_target -= 1;
            } else if flags.queried {
                if !flags.failed {
                    outstanding += 1;
                }
            } else {
                let sent = self.invoke(ctx, idx);
                let observer = &mut self.results[idx];
                observer.flags.queried = true;
                if sent {
                    self.invoke_count += 1;
                    self.invokes += 1;
                    outstanding += 1;
                } else {
                    observer.flags.failed = true;
                }
            }
            idx += 1;
        }

        (results_target == 0 && outstanding == 0) || self.invoke_count == 0
    }

    /// Handles a reply. Returns true if the traversal is now complete.
    pub(crate) fn on_reply(&mut self, ctx: &mut Context<'_>, key: ObserverKey, response: &DhtResponse) -> bool {
        let Some(mut idx) = self.position(key) else {
            return false;
        };
        let flags = self.results[idx].flags;
        if !flags.in_flight() {
            return false;
        }

        if flags.short_timeout {
            self.branch_factor = self.branch_factor.saturating_sub(1).max(1);
        }
        self.invoke_count = self.invoke_count.saturating_sub(1);

        if flags.no_id {
            if response.id == self.our_id || self.results.iter().any(|o| o.key != key && o.id == response.id) {
                self.results[idx].flags.failed = true;
                return self.add_requests(ctx);
            }
            let mut observer = self.results.remove(idx);
            observer.id = response.id;
            observer.flags.no_id = false;
            self.insert_sorted(observer);
            idx = self.position(key).unwrap_or(0);
        }

        let observer = &mut self.results[idx];
        observer.flags.alive = true;
        let (id, addr) = (observer.id, observer.addr);
        self.responses += 1;

        self.lookup.on_reply(&id, addr, response, &self.target);

        if self.lookup.adds_reply_nodes() {
            for node in response.all_nodes() {
                ctx.table.heard_about(node.id, node.addr);
                self.add_entry(Some(node.id), node.addr, false, ctx.settings);
            }
        }

        self.add_requests(ctx)
    }

    /// Handles a failed query. Returns true if the traversal is now complete.
    pub(crate) fn on_failure(&mut self, ctx: &mut Context<'_>, key: ObserverKey) -> bool {
        let Some(idx) = self.position(key) else {
            return false;
        };
        let observer = &mut self.results[idx];
        if !observer.flags.in_flight() {
            return false;
        }

        let widened = observer.flags.short_timeout;
        observer.flags.failed = true;
        self.timeouts += 1;
        self.invoke_count = self.invoke_count.saturating_sub(1);

        let done = self.add_requests(ctx);
        if widened {
            self.branch_factor = self.branch_factor.saturating_sub(1).max(1);
        }
        done
    }

    /// A query is slow: let one more run in parallel.
    pub(crate) fn on_short_timeout(&mut self, ctx: &mut Context<'_>, key: ObserverKey) -> bool {
        let Some(idx) = self.position(key) else {
            return false;
        };
        let observer = &mut self.results[idx];
        if !observer.flags.in_flight() || observer.flags.short_timeout {
            return false;
        }
        observer.flags.short_timeout = true;
        self.branch_factor += 1;
        self.add_requests(ctx)
    }

    /// Drops the results and the callback. Late replies find nothing.
    pub(crate) fn abort(&mut self) {
        self.results.clear();
        self.callback = None;
    }

    pub fn status(&self, now: Instant) -> LookupStatus {
        LookupStatus {
            id: self.id,
            kind: self.lookup.name(),
            target: self.target,
            branch_factor: self.branch_factor,
            outstanding: self.invoke_count,
            responses: self.responses,
            timeouts: self.timeouts,
            nodes_left: self.results.iter().filter(|o| !o.flags.queried).count(),
            elapsed: now.saturating_duration_since(self.started),
        }
    }

    /// Consumes the traversal, returning what to do next and the caller's
    /// callback.
    pub(crate) fn finish(self, k: usize) -> (Finished, Option<DoneCallback>) {
        let summary = Summary {
            target: self.target,
            alive: self
                .results
                .iter()
                .filter(|o| o.flags.alive)
                .map(|o| (o.id, o.addr))
                .collect(),
            unqueried: self
                .results
                .iter()
                .filter(|o| !o.flags.queried)
                .map(|o| o.addr)
                .collect(),
            results_target: self.lookup.results_target(k),
            k,
            responses: self.responses,
            timeouts: self.timeouts,
            invokes: self.invokes,
        };

        debug!(
            lookup = self.lookup.name(),
            target = %self.target,
            responses = self.responses,
            timeouts = self.timeouts,
            alive = summary.alive.len(),
            "lookup complete"
        );

        (self.lookup.finish(summary), self.callback)
    }
}

/// Same /28 for IPv4 or same /64 for IPv6.
fn same_subnet(a: IpAddr, b: IpAddr) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => {
            let (a, b) = (a.octets(), b.octets());
            a[..3] == b[..3] && a[3] & 0xf0 == b[3] & 0xf0
        }
        (IpAddr::V6(a), IpAddr::V6(b)) => a.octets()[..8] == b.octets()[..8],
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::dht::node::NodeEntry;
    use crate::dht::transport::Transport;

    struct Discard;

    impl Transport for Discard {
        fn send_to(&self, _buf: &[u8], _addr: SocketAddr) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        rpc: RpcManager,
        table: RoutingTable,
        settings: DhtSettings,
        now: Instant,
    }

    impl Fixture {
        fn new(settings: DhtSettings) -> Self {
            let our_id = NodeId([0u8; 20]);
            Self {
                rpc: RpcManager::new(our_id, Arc::new(Discard), &settings),
                table: RoutingTable::new(our_id, &settings),
                settings,
                now: Instant::now(),
            }
        }

        fn ctx(&mut self) -> Context<'_> {
            Context {
                rpc: &mut self.rpc,
                table: &mut self.table,
                settings: &self.settings,
                now: self.now,
            }
        }
    }

    fn id(first: u8) -> NodeId {
        let mut id = [0u8; 20];
        id[0] = first;
        NodeId(id)
    }

    fn addr(i: u8) -> SocketAddr {
        SocketAddr::from(([10, i, 0, 1], 6881))
    }

    fn traversal(fixture: &Fixture, target: NodeId) -> Traversal {
        Traversal::new(
            TraversalId(1),
            target,
            NodeId([0u8; 20]),
            Box::new(ClosestNodes::new()),
            &fixture.settings,
            None,
            fixture.now,
        )
    }

    fn keys_in_flight(t: &Traversal) -> Vec<ObserverKey> {
        t.results.iter().filter(|o| o.flags.in_flight()).map(|o| o.key).collect()
    }

    #[test]
    fn test_results_sorted_and_deduplicated() {
        let fixture = Fixture::new(DhtSettings::default());
        let mut t = traversal(&fixture, id(0xff));
        t.add_entry(Some(id(0x10)), addr(1), true, &fixture.settings);
        t.add_entry(Some(id(0xf0)), addr(2), true, &fixture.settings);
        t.add_entry(Some(id(0x80)), addr(3), true, &fixture.settings);
        t.add_entry(Some(id(0x80)), addr(4), true, &fixture.settings);

        let order: Vec<u8> = t.results.iter().map(|o| o.id.0[0]).collect();
        assert_eq!(order, vec![0xf0, 0x80, 0x10]);
    }

    #[test]
    fn test_search_ip_restriction() {
        let fixture = Fixture::new(DhtSettings::default());
        let mut t = traversal(&fixture, id(0xff));
        let a = SocketAddr::from(([10, 0, 0, 1], 1));
        let b = SocketAddr::from(([10, 0, 0, 14], 2));
        let c = SocketAddr::from(([10, 0, 0, 17], 3));

        t.add_entry(Some(id(1)), a, false, &fixture.settings);
        t.add_entry(Some(id(2)), b, false, &fixture.settings);
        t.add_entry(Some(id(3)), c, false, &fixture.settings);
        t.add_entry(Some(id(4)), b, true, &fixture.settings);
        assert_eq!(t.results.len(), 3);
    }

    #[test]
    fn test_branch_factor_bounds_invokes() {
        let mut fixture = Fixture::new(DhtSettings::default());
        let mut t = traversal(&fixture, id(0xff));
        let seeds = (1..=6).map(|i| (id(i), addr(i))).collect();

        let done = t.start(&mut fixture.ctx(), seeds, &[]);
        assert!(!done);
        assert_eq!(keys_in_flight(&t).len(), 3);
        assert_eq!(fixture.rpc.num_outstanding(), 3);
    }

    #[test]
    fn test_empty_seeds_finish_immediately() {
        let mut fixture = Fixture::new(DhtSettings::default());
        let mut t = traversal(&fixture, id(0xff));
        assert!(t.start(&mut fixture.ctx(), Vec::new(), &[]));
    }

    #[test]
    fn test_short_timeout_widens_once() {
        let mut fixture = Fixture::new(DhtSettings::default());
        let mut t = traversal(&fixture, id(0xff));
        let seeds = (1..=6).map(|i| (id(i), addr(i))).collect();
        t.start(&mut fixture.ctx(), seeds, &[]);

        let slow = keys_in_flight(&t)[0];
        t.on_short_timeout(&mut fixture.ctx(), slow);
        assert_eq!(t.branch_factor, 4);
        assert_eq!(keys_in_flight(&t).len(), 4);

        t.on_short_timeout(&mut fixture.ctx(), slow);
        assert_eq!(t.branch_factor, 4);

        t.on_failure(&mut fixture.ctx(), slow);
        assert_eq!(t.branch_factor, 3);
        assert_eq!(t.timeouts, 1);
    }

    #[test]
    fn test_completes_when_closest_answered() {
        let settings = DhtSettings {
            bucket_size: 2,
            ..Default::default()
        };
        let mut fixture = Fixture::new(settings);
        let mut t = traversal(&fixture, id(0xff));
        let seeds = (1..=4).map(|i| (id(0xf0 | i), addr(i))).collect();
        t.start(&mut fixture.ctx(), seeds, &[]);

        let mut done = false;
        while let Some(key) = keys_in_flight(&t).first().copied() {
            let node = t.results.iter().find(|o| o.key == key).map(|o| o.id).unwrap();
            done = t.on_reply(&mut fixture.ctx(), key, &DhtResponse::new(node));
            if done {
                break;
            }
        }
        assert!(done);

        let (finished, _) = t.finish(2);
        match finished {
            Finished::Outcome(outcome) => {
                assert_eq!(outcome.nodes.len(), 2);
                assert_eq!(outcome.nodes[0].0, id(0xf4));
                assert_eq!(outcome.nodes[1].0, id(0xf3));
            }
            _ => panic!("expected an outcome"),
        }
    }

    #[test]
    fn test_reply_nodes_join_results_and_table() {
        let mut fixture = Fixture::new(DhtSettings::default());
        let mut t = traversal(&fixture, id(0xff));
        t.start(&mut fixture.ctx(), vec![(id(0x01), addr(1))], &[]);

        let key = keys_in_flight(&t)[0];
        let mut response = DhtResponse::new(id(0x01));
        response.nodes = vec![NodeEntry::new(id(0xfe), addr(2)), NodeEntry::new(id(0x7f), addr(3))];
        t.on_reply(&mut fixture.ctx(), key, &response);

        assert_eq!(t.results[0].id, id(0xfe));
        assert!(fixture.table.find_node(&id(0xfe)).is_some());
        assert!(fixture.table.find_node(&id(0x7f)).is_some());
    }

    #[test]
    fn test_router_placeholder_replaced_by_reply_id() {
        let mut fixture = Fixture::new(DhtSettings::default());
        let mut t = traversal(&fixture, id(0xff));
        let router = addr(9);
        t.start(&mut fixture.ctx(), Vec::new(), &[router]);
        assert!(t.results[0].flags.no_id);

        let key = t.results[0].key;
        t.on_reply(&mut fixture.ctx(), key, &DhtResponse::new(id(0x42)));
        assert_eq!(t.results[0].id, id(0x42));
        assert!(t.results[0].flags.alive);
        assert!(!t.results[0].flags.no_id);
    }

    #[test]
    fn test_in_flight_entries_survive_the_cap() {
        let settings = DhtSettings {
            max_results: 3,
            ..Default::default()
        };
        let mut fixture = Fixture::new(settings);
        let mut t = traversal(&fixture, id(0xff));
        let seeds = (1..=3).map(|i| (id(i), addr(i))).collect();
        t.start(&mut fixture.ctx(), seeds, &[]);

        t.add_entry(Some(id(0xf0)), addr(20), false, &fixture.settings);
        assert_eq!(t.results.len(), 4);
        assert_eq!(keys_in_flight(&t).len(), 3);
    }

    #[test]
    fn test_abort_drops_callback() {
        let fixture = Fixture::new(DhtSettings::default());
        let mut t = Traversal::new(
            TraversalId(2),
            id(1),
            NodeId([0u8; 20]),
            Box::new(ClosestNodes::new()),
            &fixture.settings,
            Some(Box::new(|_: TraversalOutcome| panic!("aborted traversal reported"))),
            fixture.now,
        );
        t.add_entry(Some(id(3)), addr(3), true, &fixture.settings);
        t.abort();
        assert!(t.results.is_empty());
        let (_, callback) = t.finish(8);
        assert!(callback.is_none());
    }
}
