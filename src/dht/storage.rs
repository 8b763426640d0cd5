use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::seq::IteratorRandom;
use tracing::{debug, trace};

use super::error::StoreError;
use super::item::{immutable_target, MutableItem};
use super::node_id::NodeId;
use super::settings::DhtSettings;
use crate::constants::{MAX_ITEM_SIZE, MAX_SALT_SIZE};

/// Distinct announcer IPs remembered per item.
const MAX_ANNOUNCERS: usize = 256;

struct AnnouncedPeer {
    addr: SocketAddr,
    announced_at: Instant,
}

struct TorrentEntry {
    peers: Vec<AnnouncedPeer>,
    last_announce: Instant,
}

struct StoredItem<T> {
    item: T,
    announcers: HashSet<IpAddr>,
    last_seen: Instant,
}

impl<T> StoredItem<T> {
    fn new(item: T, from: IpAddr, now: Instant) -> Self {
        let mut announcers = HashSet::new();
        announcers.insert(from);
        Self {
            item,
            announcers,
            last_seen: now,
        }
    }

    fn touch(&mut self, from: IpAddr, now: Instant) {
        if self.announcers.len() < MAX_ANNOUNCERS {
            self.announcers.insert(from);
        }
        self.last_seen = now;
    }
}

/// What this node stores on behalf of the network: announced peers and
/// BEP-44 items.
pub struct DhtStorage {
    torrents: HashMap<NodeId, TorrentEntry>,
    immutable: HashMap<NodeId, StoredItem<Bytes>>,
    mutable: HashMap<NodeId, StoredItem<MutableItem>>,
    peer_lifetime: Duration,
    item_lifetime: Duration,
    max_peers_per_torrent: usize,
    max_torrents: usize,
    max_items: usize,
}

impl DhtStorage {
    pub fn new(settings: &DhtSettings) -> Self {
        Self {
            torrents: HashMap::new(),
            immutable: HashMap::new(),
            mutable: HashMap::new(),
            peer_lifetime: settings.peer_lifetime,
            item_lifetime: settings.item_lifetime,
            max_peers_per_torrent: settings.max_peers_per_torrent,
            max_torrents: settings.max_torrents.max(1),
            max_items: settings.max_dht_items.max(1),
        }
    }

    pub fn announce_peer(&mut self, info_hash: NodeId, addr: SocketAddr, now: Instant) {
        if !self.torrents.contains_key(&info_hash) && self.torrents.len() >= self.max_torrents {
            let oldest = self
                .torrents
                .iter()
                .min_by_key(|(_, t)| t.last_announce)
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                self.torrents.remove(&oldest);
            }
        }

        let torrent = self.torrents.entry(info_hash).or_insert_with(|| TorrentEntry {
            peers: Vec::new(),
            last_announce: now,
        });
        torrent.last_announce = now;

        if let Some(peer) = torrent.peers.iter_mut().find(|p| p.addr == addr) {
            peer.announced_at = now;
            return;
        }
        if torrent.peers.len() < self.max_peers_per_torrent {
            torrent.peers.push(AnnouncedPeer {
                addr,
                announced_at: now,
            });
            trace!(%addr, info_hash = %info_hash, "stored announced peer");
        }
    }

    /// Up to `max` peers for `info_hash`, randomly sampled if there are more.
    pub fn get_peers(&self, info_hash: &NodeId, max: usize) -> Vec<SocketAddr> {
        match self.torrents.get(info_hash) {
            Some(torrent) if torrent.peers.len() <= max => {
                torrent.peers.iter().map(|p| p.addr).collect()
            }
            Some(torrent) => torrent
                .peers
                .iter()
                .map(|p| p.addr)
                .choose_multiple(&mut rand::rng(), max),
            None => Vec::new(),
        }
    }

    pub fn get_immutable(&self, target: &NodeId) -> Option<&Bytes> {
        self.immutable.get(target).map(|s| &s.item)
    }

    pub fn get_mutable(&self, target: &NodeId) -> Option<&MutableItem> {
        self.mutable.get(target).map(|s| &s.item)
    }

    /// Stores a bencoded immutable value and returns its target.
    pub fn put_immutable(
        &mut self,
        value: Bytes,
        from: IpAddr,
        now: Instant,
    ) -> Result<NodeId, StoreError> {
        if value.len() > MAX_ITEM_SIZE {
            return Err(StoreError::MessageTooBig);
        }
        let target = immutable_target(&value);

        if let Some(stored) = self.immutable.get_mut(&target) {
            stored.touch(from, now);
            return Ok(target);
        }

        if self.immutable.len() >= self.max_items {
            evict_least_announced(&mut self.immutable);
        }
        self.immutable.insert(target, StoredItem::new(value, from, now));
        Ok(target)
    }

    /// Stores a mutable item. The signature is checked before anything else;
    /// then `cas` against the stored sequence number, then the sequence
    /// number itself. An item with the same sequence number as the stored
    /// one leaves the stored value in place.
    pub fn put_mutable(
        &mut self,
        item: MutableItem,
        cas: Option<i64>,
        from: IpAddr,
        now: Instant,
    ) -> Result<NodeId, StoreError> {
        if item.value.len() > MAX_ITEM_SIZE {
            return Err(StoreError::MessageTooBig);
        }
        if item.salt.len() > MAX_SALT_SIZE {
            return Err(StoreError::SaltTooBig);
        }
        if !item.verify() {
            return Err(StoreError::InvalidSignature);
        }

        let target = item.target();

        if let Some(stored) = self.mutable.get_mut(&target) {
            if let Some(cas) = cas {
                if cas != stored.item.seq {
                    return Err(StoreError::CasMismatch);
                }
            }
            if item.seq < stored.item.seq {
                return Err(StoreError::SequenceTooOld);
            }
            if item.seq > stored.item.seq {
                debug!(target = %target, seq = item.seq, "updated mutable item");
                stored.item = item;
            }
            stored.touch(from, now);
            return Ok(target);
        }

        if self.mutable.len() >= self.max_items {
            evict_least_announced(&mut self.mutable);
        }
        self.mutable.insert(target, StoredItem::new(item, from, now));
        Ok(target)
    }

    /// A random sample of up to `max` stored info hashes, and how many there are.
    pub fn sample_infohashes(&self, max: usize) -> (Vec<NodeId>, usize) {
        let sample = self
            .torrents
            .keys()
            .copied()
            .choose_multiple(&mut rand::rng(), max);
        (sample, self.torrents.len())
    }

    /// Drops peers and items that were not refreshed in time.
    pub fn tick(&mut self, now: Instant) {
        let peer_lifetime = self.peer_lifetime;
        self.torrents.retain(|_, torrent| {
            torrent
                .peers
                .retain(|p| now.saturating_duration_since(p.announced_at) < peer_lifetime);
            !torrent.peers.is_empty()
        });

        let item_lifetime = self.item_lifetime;
        self.immutable
            .retain(|_, s| now.saturating_duration_since(s.last_seen) < item_lifetime);
        self.mutable
            .retain(|_, s| now.saturating_duration_since(s.last_seen) < item_lifetime);
    }

    pub fn num_torrents(&self) -> usize {
        self.torrents.len()
    }

    pub fn num_peers(&self) -> usize {
        self.torrents.values().map(|t| t.peers.len()).sum()
    }

    pub fn num_immutable_items(&self) -> usize {
        self.immutable.len()
    }

    pub fn num_mutable_items(&self) -> usize {
        self.mutable.len()
    }
}

/// Evicts the item with the fewest announcers, the oldest one among equals.
fn evict_least_announced<T>(items: &mut HashMap<NodeId, StoredItem<T>>) {
    let victim = items
        .iter()
        .min_by_key(|(_, s)| (s.announcers.len(), s.last_seen))
        .map(|(k, _)| *k);
    if let Some(victim) = victim {
        items.remove(&victim);
    }
}
