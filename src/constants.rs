//! Protocol constants and tuning parameters.
//!
//! This module collects the numbers the DHT is tuned with: bucket sizes,
//! timeouts, rate limits, storage caps and BEP-defined limits. The values
//! follow the defaults of mainline clients (libtorrent, Transmission) and
//! seed [`DhtSettings::default`](crate::dht::DhtSettings).

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client version sent in the `v` key of every KRPC message
pub const CLIENT_VERSION: &[u8] = b"RD01";

// ============================================================================
// Ports and routers
// ============================================================================

/// Default DHT listen port
pub const DEFAULT_PORT: u16 = 6881;

/// Well-known DHT bootstrap routers
pub const DHT_BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
    "dht.libtorrent.org:25401",
];

// ============================================================================
// Routing table
// ============================================================================

/// DHT bucket size (k value in Kademlia)
pub const DHT_BUCKET_SIZE: usize = 8;

/// Maximum number of buckets (one per bit of a SHA-1 sized ID)
pub const DHT_MAX_BUCKETS: usize = 160;

/// Timeouts after which a pinged node is dropped from the table
pub const DHT_MAX_FAIL_COUNT: u8 = 3;

/// A bucket with no activity for this long is refreshed with a lookup
pub const DHT_BUCKET_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// How often stale buckets and expired storage are looked for
pub const DHT_REFRESH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Lookups
// ============================================================================

/// Parallel queries per lookup (alpha in the Kademlia paper)
pub const DHT_BRANCH_FACTOR: usize = 3;

/// Upper bound on the result list of a single lookup
pub const DHT_MAX_RESULTS: usize = 100;

/// Fewer seeds than this and a lookup falls back to the router nodes
pub const DHT_MIN_SEED_NODES: usize = 3;

// ============================================================================
// RPC
// ============================================================================

/// A query with no reply after this long has failed
pub const DHT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A query with no reply after this long frees its slot in the branch factor
pub const DHT_SHORT_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum pending DHT queries
pub const MAX_PENDING_DHT_QUERIES: usize = 1024;

/// How often the event loop should call `tick`
pub const DHT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Largest datagram we read from the socket
pub const DHT_MAX_PACKET_SIZE: usize = 1500;

// ============================================================================
// Abuse protection
// ============================================================================

/// Number of source addresses the DOS blocker tracks
pub const DOS_BLOCKER_SLOTS: usize = 20;

/// Messages accepted from one address per rate window
pub const DHT_MESSAGE_RATE_LIMIT: u32 = 50;

/// Length of a rate window
pub const DHT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);

/// How long an address stays banned once it exceeded the rate limit
pub const DHT_BLOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Write tokens
// ============================================================================

/// Interval between token secret rotations; a token is valid for one to two intervals
pub const DHT_TOKEN_ROTATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Length of a write token handed out to remote nodes
pub const DHT_TOKEN_LENGTH: usize = 8;

// ============================================================================
// Storage
// ============================================================================

/// Announced peers expire after this long without a re-announce
pub const PEER_ANNOUNCE_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Maximum peers stored per info hash
pub const MAX_PEERS_PER_TORRENT: usize = 1000;

/// Peers returned in a single get_peers reply
pub const MAX_PEERS_PER_REPLY: usize = 50;

/// Maximum info hashes we store peers for
pub const MAX_DHT_TORRENTS: usize = 2000;

/// Maximum items (per kind) in the BEP-44 store
pub const MAX_DHT_ITEMS: usize = 700;

/// Items expire after this long without a re-put
pub const DHT_ITEM_LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);

/// Maximum bencoded size of a stored value (BEP-44)
pub const MAX_ITEM_SIZE: usize = 1000;

/// Maximum salt length of a mutable item (BEP-44)
pub const MAX_SALT_SIZE: usize = 64;

/// Info hashes returned per sample_infohashes reply (BEP-51)
pub const MAX_INFOHASH_SAMPLES: usize = 20;

/// Interval hint, in seconds, returned in sample_infohashes replies
pub const SAMPLE_INFOHASHES_INTERVAL: i64 = 6 * 60 * 60;
