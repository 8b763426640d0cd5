use std::cmp::Ordering;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;

use super::node_id::{NodeId, NODE_ID_LEN};
use super::node_id_security::verify_id;

pub const COMPACT_NODE_V4_LEN: usize = NODE_ID_LEN + 6;
pub const COMPACT_NODE_V6_LEN: usize = NODE_ID_LEN + 18;

/// Round-trip time of a node we never measured.
pub const RTT_UNKNOWN: u16 = 0xffff;

/// `timeout_count` of a node that never answered.
const NEVER_PINGED: u8 = 0xff;

/// A remote DHT node as tracked by the routing table.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub id: NodeId,
    pub addr: SocketAddr,
    /// Smoothed round-trip time in milliseconds.
    pub rtt: u16,
    pub timeout_count: u8,
    /// The ID is consistent with the address under BEP-42.
    pub verified: bool,
    pub last_queried: Option<Instant>,
}

impl NodeEntry {
    /// An entry we only heard about from a third party.
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            rtt: RTT_UNKNOWN,
            timeout_count: NEVER_PINGED,
            verified: verify_id(&id, addr.ip()),
            last_queried: None,
        }
    }

    /// An entry for a node that just answered us.
    pub fn pinged(id: NodeId, addr: SocketAddr, rtt: u16) -> Self {
        let mut entry = Self::new(id, addr);
        entry.set_pinged();
        entry.update_rtt(rtt);
        entry
    }

    pub fn is_pinged(&self) -> bool {
        self.timeout_count != NEVER_PINGED
    }

    pub fn set_pinged(&mut self) {
        if self.timeout_count == NEVER_PINGED {
            self.timeout_count = 0;
        }
    }

    /// Consecutive timeouts; 0 for a node that was never pinged.
    pub fn fail_count(&self) -> u8 {
        if self.is_pinged() {
            self.timeout_count
        } else {
            0
        }
    }

    pub fn timed_out(&mut self) {
        if self.is_pinged() && self.timeout_count < NEVER_PINGED - 1 {
            self.timeout_count += 1;
        }
    }

    pub fn reset_fail_count(&mut self) {
        if self.is_pinged() {
            self.timeout_count = 0;
        }
    }

    pub fn update_rtt(&mut self, new_rtt: u16) {
        if new_rtt == RTT_UNKNOWN {
            return;
        }
        if self.rtt == RTT_UNKNOWN {
            self.rtt = new_rtt;
        } else {
            self.rtt = ((self.rtt as u32 * 2 + new_rtt as u32) / 3) as u16;
        }
    }

    /// Ranks two entries: verified before unverified, then lower RTT first.
    pub fn cmp_quality(&self, other: &NodeEntry) -> Ordering {
        other
            .verified
            .cmp(&self.verified)
            .then(self.rtt.cmp(&other.rtt))
    }

    pub fn from_compact(data: &[u8]) -> Option<Self> {
        let id = NodeId::from_bytes(data.get(..NODE_ID_LEN)?).ok()?;
        let addr = read_compact_endpoint(&data[NODE_ID_LEN..])?;
        Some(Self::new(id, addr))
    }

    /// Appends the compact node info (ID + endpoint) to `out`.
    pub fn write_compact(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.id.as_bytes());
        write_compact_endpoint(&self.addr, out);
    }
}

/// Entries are the same node when ID and endpoint match.
impl PartialEq for NodeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.addr == other.addr
    }
}

impl Eq for NodeEntry {}

/// Parses a `nodes` (26-byte records) or `nodes6` (38-byte records) string.
/// A trailing partial record is ignored.
pub fn parse_compact_nodes(data: &[u8], record_len: usize) -> Vec<NodeEntry> {
    data.chunks_exact(record_len)
        .filter_map(NodeEntry::from_compact)
        .collect()
}

/// Writes 6 bytes for IPv4 or 18 bytes for IPv6, port big-endian.
pub fn write_compact_endpoint(addr: &SocketAddr, out: &mut Vec<u8>) {
    match addr.ip() {
        IpAddr::V4(ip) => out.extend_from_slice(&ip.octets()),
        IpAddr::V6(ip) => out.extend_from_slice(&ip.octets()),
    }
    out.extend_from_slice(&addr.port().to_be_bytes());
}

pub fn compact_endpoint(addr: &SocketAddr) -> Vec<u8> {
    let mut out = Vec::with_capacity(18);
    write_compact_endpoint(addr, &mut out);
    out
}

pub fn read_compact_endpoint(data: &[u8]) -> Option<SocketAddr> {
    match data.len() {
        6 => {
            let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
            let port = u16::from_be_bytes([data[4], data[5]]);
            Some(SocketAddr::new(IpAddr::V4(ip), port))
        }
        18 => {
            let octets = <[u8; 16]>::try_from(&data[..16]).ok()?;
            let port = u16::from_be_bytes([data[16], data[17]]);
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_new_entry_is_unpinged() {
        let entry = NodeEntry::new(NodeId::generate(), addr("10.0.0.1:6881"));
        assert!(!entry.is_pinged());
        assert_eq!(entry.fail_count(), 0);
        assert_eq!(entry.rtt, RTT_UNKNOWN);
        assert!(entry.verified);
    }

    #[test]
    fn test_timeouts_only_count_after_ping() {
        let mut entry = NodeEntry::new(NodeId::generate(), addr("10.0.0.1:6881"));
        entry.timed_out();
        assert!(!entry.is_pinged());

        entry.set_pinged();
        entry.timed_out();
        entry.timed_out();
        assert_eq!(entry.fail_count(), 2);

        entry.reset_fail_count();
        assert_eq!(entry.fail_count(), 0);

        for _ in 0..300 {
            entry.timed_out();
        }
        assert!(entry.is_pinged());
        assert_eq!(entry.fail_count(), 0xfe);
    }

    #[test]
    fn test_rtt_smoothing() {
        let mut entry = NodeEntry::new(NodeId::generate(), addr("10.0.0.1:6881"));
        entry.update_rtt(300);
        assert_eq!(entry.rtt, 300);
        entry.update_rtt(0);
        assert_eq!(entry.rtt, 200);
        entry.update_rtt(RTT_UNKNOWN);
        assert_eq!(entry.rtt, 200);
    }

    #[test]
    fn test_quality_order() {
        let mut a = NodeEntry::pinged(NodeId::generate(), addr("10.0.0.1:1"), 50);
        let b = NodeEntry::pinged(NodeId::generate(), addr("10.0.0.2:1"), 100);
        assert_eq!(a.cmp_quality(&b), Ordering::Less);

        a.verified = false;
        assert_eq!(a.cmp_quality(&b), Ordering::Greater);
    }

    #[test]
    fn test_compact_v4_and_v6() {
        let v4 = NodeEntry::new(NodeId::generate(), addr("1.2.3.4:6881"));
        let v6 = NodeEntry::new(NodeId::generate(), addr("[2001:db8::1]:6882"));

        let mut buf = Vec::new();
        v4.write_compact(&mut buf);
        assert_eq!(buf.len(), COMPACT_NODE_V4_LEN);
        buf.push(0xaa);
        let parsed = parse_compact_nodes(&buf, COMPACT_NODE_V4_LEN);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, v4.id);
        assert_eq!(parsed[0].addr, v4.addr);

        let mut buf = Vec::new();
        v6.write_compact(&mut buf);
        assert_eq!(buf.len(), COMPACT_NODE_V6_LEN);
        let parsed = NodeEntry::from_compact(&buf).unwrap();
        assert_eq!(parsed.addr, v6.addr);
    }

    #[test]
    fn test_compact_endpoint_lengths() {
        assert_eq!(compact_endpoint(&addr("1.2.3.4:80")), [1, 2, 3, 4, 0, 80]);
        assert_eq!(compact_endpoint(&addr("[::1]:80")).len(), 18);
        assert!(read_compact_endpoint(&[1, 2, 3]).is_none());
    }
}
