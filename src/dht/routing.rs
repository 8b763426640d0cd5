use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::node::NodeEntry;
use super::node_id::{cmp_distance, NodeId, NODE_ID_LEN};
use super::settings::DhtSettings;

#[derive(Debug, Default)]
struct Bucket {
    live: Vec<NodeEntry>,
    replacements: VecDeque<NodeEntry>,
    last_active: Option<Instant>,
}

impl Bucket {
    fn position(&self, id: &NodeId) -> Option<usize> {
        self.live.iter().position(|n| &n.id == id)
    }

    fn replacement_position(&self, id: &NodeId) -> Option<usize> {
        self.replacements.iter().position(|n| &n.id == id)
    }
}

/// Kademlia routing table with splitting buckets.
///
/// Bucket `i` holds nodes sharing exactly `i` leading bits with our ID,
/// except the last bucket, which holds everything at least that close. Only
/// the last bucket splits.
#[derive(Debug)]
pub struct RoutingTable {
    our_id: NodeId,
    bucket_size: usize,
    max_buckets: usize,
    max_fail_count: u8,
    restrict_ips: bool,
    enforce_node_id: bool,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub fn new(our_id: NodeId, settings: &DhtSettings) -> Self {
        Self {
            our_id,
            bucket_size: settings.bucket_size.max(1),
            max_buckets: settings.max_buckets.clamp(1, NODE_ID_LEN * 8),
            max_fail_count: settings.max_fail_count,
            restrict_ips: settings.restrict_routing_ips,
            enforce_node_id: settings.enforce_node_id,
            buckets: vec![Bucket::default()],
        }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index(&self, id: &NodeId) -> usize {
        self.our_id.prefix_len(id).min(self.buckets.len() - 1)
    }

    /// A node answered one of our queries, or queried us.
    pub fn node_seen(&mut self, id: NodeId, addr: SocketAddr, rtt: u16, now: Instant) -> bool {
        let added = self.add_node(NodeEntry::pinged(id, addr, rtt));
        if added {
            let idx = self.bucket_index(&id);
            self.buckets[idx].last_active = Some(now);
        }
        added
    }

    /// A node was mentioned to us by a third party.
    pub fn heard_about(&mut self, id: NodeId, addr: SocketAddr) -> bool {
        self.add_node(NodeEntry::new(id, addr))
    }

    /// Inserts or refreshes `candidate`. Returns true if it is now a live
    /// entry of the table; false if it was ignored or parked in the
    /// replacement cache.
    pub fn add_node(&mut self, mut candidate: NodeEntry) -> bool {
        if candidate.id == self.our_id {
            return false;
        }
        if self.enforce_node_id && !candidate.verified {
            trace!(addr = %candidate.addr, "ignoring node with unverified id");
            return false;
        }

        let idx = self.bucket_index(&candidate.id);

        if let Some(pos) = self.buckets[idx].position(&candidate.id) {
            let existing = &mut self.buckets[idx].live[pos];
            if existing.addr != candidate.addr {
                debug!(id = %candidate.id, old = %existing.addr, new = %candidate.addr,
                    "node id claimed from a different endpoint");
                return false;
            }
            merge_into(existing, &candidate);
            return true;
        }

        if self.restrict_ips && !self.make_room_for_ip(&candidate) {
            return false;
        }

        if let Some(pos) = self.buckets[idx].replacement_position(&candidate.id) {
            if self.buckets[idx].replacements[pos].addr != candidate.addr {
                return false;
            }
            if let Some(mut old) = self.buckets[idx].replacements.remove(pos) {
                merge_into(&mut old, &candidate);
                candidate = old;
            }
        }

        if self.buckets[idx].live.len() < self.bucket_size {
            self.buckets[idx].live.push(candidate);
            return true;
        }

        if idx == self.buckets.len() - 1 && self.buckets.len() < self.max_buckets {
            self.split_last_bucket();
            return self.add_node(candidate);
        }

        if let Some(pos) = self.eviction_candidate(idx, &candidate) {
            let bucket = &mut self.buckets[idx];
            let evicted = std::mem::replace(&mut bucket.live[pos], candidate);
            trace!(id = %evicted.id, "evicted node for a better candidate");
            if evicted.fail_count() < self.max_fail_count {
                push_replacement(bucket, evicted, self.bucket_size);
            }
            return true;
        }

        push_replacement(&mut self.buckets[idx], candidate, self.bucket_size);
        false
    }

    /// Removes an entry occupying `candidate`'s IP. Returns false when the
    /// candidate must be rejected instead.
    fn make_room_for_ip(&mut self, candidate: &NodeEntry) -> bool {
        let ip = candidate.addr.ip();
        for bucket in &mut self.buckets {
            if let Some(pos) = bucket.live.iter().position(|n| n.addr.ip() == ip) {
                if bucket.live[pos].addr == candidate.addr && candidate.is_pinged() {
                    // Same endpoint restarted with a new ID.
                    bucket.live.remove(pos);
                    return true;
                }
                return false;
            }
            if let Some(pos) = bucket.replacements.iter().position(|n| n.addr.ip() == ip) {
                if bucket.replacements[pos].addr == candidate.addr && candidate.is_pinged() {
                    bucket.replacements.remove(pos);
                    return true;
                }
                return false;
            }
        }
        true
    }

    fn eviction_candidate(&self, idx: usize, candidate: &NodeEntry) -> Option<usize> {
        let bucket = &self.buckets[idx];

        let failed = bucket
            .live
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_pinged() && n.fail_count() >= self.max_fail_count)
            .max_by_key(|(_, n)| n.fail_count())
            .map(|(i, _)| i);
        if failed.is_some() {
            return failed;
        }

        if !candidate.is_pinged() {
            return None;
        }

        bucket
            .live
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.is_pinged() || (!n.verified && candidate.verified))
            .max_by(|(_, a), (_, b)| a.cmp_quality(b))
            .map(|(i, _)| i)
    }

    fn split_last_bucket(&mut self) {
        let depth = self.buckets.len() - 1;
        let our_id = self.our_id;
        let mut new_bucket = Bucket::default();

        let old = &mut self.buckets[depth];
        new_bucket.last_active = old.last_active;

        let (stay, moved): (Vec<_>, Vec<_>) = old
            .live
            .drain(..)
            .partition(|n| our_id.prefix_len(&n.id) <= depth);
        old.live = stay;
        new_bucket.live = moved;

        let (stay, moved): (VecDeque<_>, VecDeque<_>) = old
            .replacements
            .drain(..)
            .partition(|n| our_id.prefix_len(&n.id) <= depth);
        old.replacements = stay;
        new_bucket.replacements = moved;

        self.buckets.push(new_bucket);
        for bucket in &mut self.buckets[depth..] {
            fill_from_replacements(bucket, self.bucket_size);
        }

        debug!(buckets = self.buckets.len(), "split routing table bucket");
    }

    /// A query to `id` timed out.
    pub fn node_failed(&mut self, id: &NodeId, addr: &SocketAddr) {
        let idx = self.bucket_index(id);
        let max_fail_count = self.max_fail_count;
        let bucket = &mut self.buckets[idx];

        let Some(pos) = bucket.position(id) else {
            return;
        };
        if &bucket.live[pos].addr != addr {
            return;
        }

        if bucket.replacements.is_empty() {
            let entry = &mut bucket.live[pos];
            entry.timed_out();
            if entry.fail_count() >= max_fail_count || !entry.is_pinged() {
                debug!(id = %id, "removing failed node");
                bucket.live.remove(pos);
            }
            return;
        }

        bucket.live.remove(pos);
        let replacement = bucket
            .replacements
            .iter()
            .position(NodeEntry::is_pinged)
            .unwrap_or(0);
        if let Some(node) = bucket.replacements.remove(replacement) {
            trace!(failed = %id, replacement = %node.id, "replaced failed node");
            bucket.live.push(node);
        }
    }

    pub fn find_node(&self, id: &NodeId) -> Option<&NodeEntry> {
        let bucket = &self.buckets[self.bucket_index(id)];
        bucket.position(id).map(|pos| &bucket.live[pos])
    }

    pub fn set_last_queried(&mut self, id: &NodeId, now: Instant) {
        let idx = self.bucket_index(id);
        if let Some(pos) = self.buckets[idx].position(id) {
            self.buckets[idx].live[pos].last_queried = Some(now);
        }
    }

    /// Up to `count` live entries, nearest to `target` first. Entries that
    /// have failed at least once are skipped.
    pub fn closest_nodes(&self, target: &NodeId, count: usize) -> Vec<NodeEntry> {
        let mut nodes: Vec<&NodeEntry> = self
            .buckets
            .iter()
            .flat_map(|b| b.live.iter())
            .filter(|n| n.fail_count() == 0)
            .collect();

        nodes.sort_by(|a, b| cmp_distance(&a.id, &b.id, target).then_with(|| a.cmp_quality(b)));
        nodes.into_iter().take(count).cloned().collect()
    }

    pub fn for_each_node(&self, mut f: impl FnMut(&NodeEntry)) {
        for bucket in &self.buckets {
            bucket.live.iter().for_each(&mut f);
        }
    }

    pub fn bucket_entries(&self, idx: usize) -> &[NodeEntry] {
        self.buckets.get(idx).map(|b| b.live.as_slice()).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.buckets.iter().map(|b| b.live.len()).sum()
    }

    pub fn replacement_count(&self) -> usize {
        self.buckets.iter().map(|b| b.replacements.len()).sum()
    }

    /// Buckets that saw no live traffic for `interval`.
    pub fn stale_buckets(&self, now: Instant, interval: Duration) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| match b.last_active {
                Some(t) => now.saturating_duration_since(t) >= interval,
                None => true,
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn touch_bucket(&mut self, idx: usize, now: Instant) {
        if let Some(bucket) = self.buckets.get_mut(idx) {
            bucket.last_active = Some(now);
        }
    }

    /// A random ID that falls into bucket `idx`.
    pub fn random_id_in_bucket(&self, idx: usize) -> NodeId {
        let idx = idx.min(NODE_ID_LEN * 8 - 1);
        let mut id = self.our_id.randomize_suffix(idx);
        if idx < self.buckets.len() - 1 {
            id.0[idx / 8] ^= 0x80 >> (idx % 8);
            // Make sure the flipped bit differs from ours.
            if self.our_id.prefix_len(&id) != idx {
                id.0[idx / 8] ^= 0x80 >> (idx % 8);
            }
        }
        id
    }
}

fn merge_into(existing: &mut NodeEntry, update: &NodeEntry) {
    if update.is_pinged() {
        existing.set_pinged();
        existing.reset_fail_count();
        existing.update_rtt(update.rtt);
    }
}

fn push_replacement(bucket: &mut Bucket, node: NodeEntry, bucket_size: usize) {
    if bucket.replacements.len() >= bucket_size {
        let drop_pos = bucket
            .replacements
            .iter()
            .position(|n| !n.is_pinged())
            .filter(|_| node.is_pinged())
            .unwrap_or(0);
        bucket.replacements.remove(drop_pos);
    }
    bucket.replacements.push_back(node);
}

fn fill_from_replacements(bucket: &mut Bucket, bucket_size: usize) {
    while bucket.live.len() < bucket_size {
        let pos = bucket
            .replacements
            .iter()
            .position(NodeEntry::is_pinged)
            .unwrap_or(0);
        match bucket.replacements.remove(pos) {
            Some(node) => bucket.live.push(node),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DhtSettings {
        DhtSettings {
            restrict_routing_ips: false,
            ..Default::default()
        }
    }

    fn id_with_prefix(first: u8, rest: u8) -> NodeId {
        let mut id = [rest; 20];
        id[0] = first;
        NodeId(id)
    }

    fn addr(i: u32) -> SocketAddr {
        let ip = std::net::Ipv4Addr::from(0x0a00_0000 | i);
        SocketAddr::new(std::net::IpAddr::V4(ip), 6881)
    }

    fn assert_invariants(table: &RoutingTable) {
        let mut seen = std::collections::HashSet::new();
        for idx in 0..table.num_buckets() {
            let entries = table.bucket_entries(idx);
            assert!(entries.len() <= table.bucket_size());
            for e in entries {
                assert!(seen.insert(e.id), "duplicate id {}", e.id);
                assert_eq!(table.bucket_index(&e.id), idx);
            }
        }
    }

    #[test]
    fn test_ignores_self() {
        let our_id = NodeId::generate();
        let mut table = RoutingTable::new(our_id, &settings());
        assert!(!table.heard_about(our_id, addr(1)));
        assert_eq!(table.node_count(), 0);
    }

    #[test]
    fn test_buckets_split_and_stay_bounded() {
        let mut table = RoutingTable::new(NodeId::generate(), &settings());
        for i in 0..2000 {
            table.heard_about(NodeId::generate(), addr(i));
            if i % 100 == 0 {
                assert_invariants(&table);
            }
        }
        assert_invariants(&table);
        assert!(table.num_buckets() > 1);
        assert!(table.node_count() <= table.num_buckets() * table.bucket_size());
    }

    #[test]
    fn test_far_bucket_does_not_split() {
        let our_id = NodeId([0u8; 20]);
        let mut table = RoutingTable::new(our_id, &settings());

        // Force one split so that 0x80.. lands in a bucket that is not last.
        for i in 0..8 {
            table.heard_about(id_with_prefix(0x80, i), addr(i as u32));
        }
        table.heard_about(id_with_prefix(0x01, 1), addr(100));
        assert_eq!(table.num_buckets(), 2);

        assert!(!table.heard_about(id_with_prefix(0x80, 200), addr(200)));
        assert_eq!(table.bucket_entries(0).len(), 8);
        assert_eq!(table.replacement_count(), 1);
    }

    #[test]
    fn test_duplicate_id_from_other_endpoint_rejected() {
        let mut table = RoutingTable::new(NodeId::generate(), &settings());
        let id = NodeId::generate();
        let now = Instant::now();
        assert!(table.node_seen(id, addr(1), 50, now));
        assert!(!table.node_seen(id, addr(2), 50, now));
        assert_eq!(table.find_node(&id).unwrap().addr, addr(1));
        assert_eq!(table.node_count(), 1);
    }

    #[test]
    fn test_node_seen_updates_rtt() {
        let mut table = RoutingTable::new(NodeId::generate(), &settings());
        let id = NodeId::generate();
        let now = Instant::now();
        table.heard_about(id, addr(1));
        assert!(!table.find_node(&id).unwrap().is_pinged());

        table.node_seen(id, addr(1), 90, now);
        let entry = table.find_node(&id).unwrap();
        assert!(entry.is_pinged());
        assert_eq!(entry.rtt, 90);
    }

    #[test]
    fn test_pinged_candidate_evicts_unpinged_entry() {
        let our_id = NodeId([0u8; 20]);
        let mut table = RoutingTable::new(our_id, &settings());
        for i in 0..8 {
            table.heard_about(id_with_prefix(0x80, i), addr(i as u32));
        }
        table.heard_about(id_with_prefix(0x01, 1), addr(100));
        assert_eq!(table.num_buckets(), 2);

        let fresh = id_with_prefix(0x80, 50);
        assert!(table.node_seen(fresh, addr(50), 10, Instant::now()));
        assert!(table.find_node(&fresh).is_some());
        assert_eq!(table.bucket_entries(0).len(), 8);
    }

    #[test]
    fn test_node_failed_without_replacements() {
        let mut table = RoutingTable::new(NodeId::generate(), &settings());
        let now = Instant::now();

        let unpinged = NodeId::generate();
        table.heard_about(unpinged, addr(1));
        table.node_failed(&unpinged, &addr(1));
        assert!(table.find_node(&unpinged).is_none());

        let pinged = NodeId::generate();
        table.node_seen(pinged, addr(2), 10, now);
        table.node_failed(&pinged, &addr(2));
        table.node_failed(&pinged, &addr(2));
        assert_eq!(table.find_node(&pinged).unwrap().fail_count(), 2);
        table.node_failed(&pinged, &addr(2));
        assert!(table.find_node(&pinged).is_none());
    }

    #[test]
    fn test_node_failed_uses_replacement() {
        let our_id = NodeId([0u8; 20]);
        let mut table = RoutingTable::new(our_id, &settings());
        let now = Instant::now();
        for i in 0..8 {
            table.node_seen(id_with_prefix(0x80, i), addr(i as u32), 10, now);
        }
        table.heard_about(id_with_prefix(0x01, 1), addr(100));
        let spare = id_with_prefix(0x80, 77);
        assert!(!table.node_seen(spare, addr(77), 10, now));

        let victim = id_with_prefix(0x80, 3);
        table.node_failed(&victim, &addr(3));
        assert!(table.find_node(&victim).is_none());
        assert!(table.find_node(&spare).is_some());
        assert_invariants(&table);
    }

    #[test]
    fn test_closest_nodes_sorted() {
        let mut table = RoutingTable::new(NodeId::generate(), &settings());
        for i in 0..200 {
            table.heard_about(NodeId::generate(), addr(i));
        }
        let target = NodeId::generate();
        let closest = table.closest_nodes(&target, 8);
        assert_eq!(closest.len(), 8);
        for pair in closest.windows(2) {
            assert_ne!(
                cmp_distance(&pair[0].id, &pair[1].id, &target),
                std::cmp::Ordering::Greater
            );
        }

        let mut all = Vec::new();
        table.for_each_node(|n| all.push(n.id));
        all.sort_by(|a, b| cmp_distance(a, b, &target));
        assert_eq!(closest[0].id, all[0]);
    }

    #[test]
    fn test_restrict_ips() {
        let mut table = RoutingTable::new(NodeId::generate(), &DhtSettings::default());
        let now = Instant::now();
        let first = NodeId::generate();
        assert!(table.node_seen(first, addr(1), 10, now));

        let other_port = SocketAddr::new(addr(1).ip(), 7000);
        assert!(!table.node_seen(NodeId::generate(), other_port, 10, now));

        let restarted = NodeId::generate();
        assert!(table.node_seen(restarted, addr(1), 10, now));
        assert!(table.find_node(&first).is_none());
        assert_eq!(table.node_count(), 1);
    }

    #[test]
    fn test_stale_buckets_and_refresh_ids() {
        let mut table = RoutingTable::new(NodeId::generate(), &settings());
        let now = Instant::now();
        for i in 0..100 {
            table.heard_about(NodeId::generate(), addr(i));
        }
        let interval = Duration::from_secs(60);
        assert_eq!(table.stale_buckets(now, interval).len(), table.num_buckets());

        table.touch_bucket(0, now);
        assert!(!table.stale_buckets(now, interval).contains(&0));
        assert!(table.stale_buckets(now + interval, interval).contains(&0));

        for idx in 0..table.num_buckets() {
            let id = table.random_id_in_bucket(idx);
            assert_eq!(table.bucket_index(&id), idx);
        }
    }
}
