use std::time::Duration;

use crate::constants::*;

/// Runtime configuration of a [`DhtEngine`](super::DhtEngine).
///
/// `Default` gives the values from [`crate::constants`].
#[derive(Debug, Clone)]
pub struct DhtSettings {
    /// Nodes per bucket (k).
    pub bucket_size: usize,
    pub max_buckets: usize,
    /// Timeouts in a row before a pinged node is dropped.
    pub max_fail_count: u8,
    pub bucket_refresh_interval: Duration,

    /// Queries in flight per lookup.
    pub branch_factor: usize,
    pub max_results: usize,
    pub min_seed_nodes: usize,

    pub query_timeout: Duration,
    pub short_timeout: Duration,
    pub max_transactions: usize,

    pub dos_blocker_slots: usize,
    pub message_rate_limit: u32,
    pub rate_limit_window: Duration,
    pub block_timeout: Duration,

    pub token_rotation_interval: Duration,

    pub peer_lifetime: Duration,
    pub max_peers_per_torrent: usize,
    pub max_torrents: usize,
    pub max_dht_items: usize,
    pub item_lifetime: Duration,
    pub max_infohash_samples: usize,
    pub sample_infohashes_interval: i64,

    /// At most one routing table entry per IP address.
    pub restrict_routing_ips: bool,
    /// Ignore lookup results from the same /28 (v4) or /64 (v6) network.
    pub restrict_search_ips: bool,
    /// Keep nodes whose ID fails BEP-42 verification out of the routing table.
    pub enforce_node_id: bool,
    /// Count only requests to the closest nodes against the branch factor.
    pub aggressive_lookups: bool,
}

impl Default for DhtSettings {
    fn default() -> Self {
        Self {
            bucket_size: DHT_BUCKET_SIZE,
            max_buckets: DHT_MAX_BUCKETS,
            max_fail_count: DHT_MAX_FAIL_COUNT,
            bucket_refresh_interval: DHT_BUCKET_REFRESH_INTERVAL,
            branch_factor: DHT_BRANCH_FACTOR,
            max_results: DHT_MAX_RESULTS,
            min_seed_nodes: DHT_MIN_SEED_NODES,
            query_timeout: DHT_QUERY_TIMEOUT,
            short_timeout: DHT_SHORT_TIMEOUT,
            max_transactions: MAX_PENDING_DHT_QUERIES,
            dos_blocker_slots: DOS_BLOCKER_SLOTS,
            message_rate_limit: DHT_MESSAGE_RATE_LIMIT,
            rate_limit_window: DHT_RATE_LIMIT_WINDOW,
            block_timeout: DHT_BLOCK_TIMEOUT,
            token_rotation_interval: DHT_TOKEN_ROTATION_INTERVAL,
            peer_lifetime: PEER_ANNOUNCE_LIFETIME,
            max_peers_per_torrent: MAX_PEERS_PER_TORRENT,
            max_torrents: MAX_DHT_TORRENTS,
            max_dht_items: MAX_DHT_ITEMS,
            item_lifetime: DHT_ITEM_LIFETIME,
            max_infohash_samples: MAX_INFOHASH_SAMPLES,
            sample_infohashes_interval: SAMPLE_INFOHASHES_INTERVAL,
            restrict_routing_ips: true,
            restrict_search_ips: true,
            enforce_node_id: false,
            aggressive_lookups: true,
        }
    }
}
