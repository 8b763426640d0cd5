//! BEP-42: DHT Security Extension
//!
//! Node IDs are tied to the node's external IP address so that a single host
//! cannot pick arbitrary positions in the ID space. The top 21 bits of the ID
//! come from a CRC32C of the masked IP, and the last byte carries the random
//! value `r` that was mixed into the hash, so any node can re-check an ID
//! against the address it was received from without keeping state.
//!
//! [BEP-42]: http://bittorrent.org/beps/bep_0042.html

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rand::Rng;

use super::node_id::NodeId;

/// IPv4 mask applied before hashing.
pub const BEP42_IPV4_MASK: u32 = 0x030f3fff;

/// IPv6 mask applied to the high 64 bits before hashing.
pub const BEP42_IPV6_MASK: u64 = 0x0103070f1f3f7fff;

/// Distinct nodes that must report the same external address before we
/// believe it.
pub const BEP42_REQUIRED_VOTES: usize = 3;

const MAX_ADDRESS_CANDIDATES: usize = 16;

/// Generates an ID that [`verify_id`] accepts for `ip`.
///
/// For local network addresses a plain random ID is returned.
pub fn generate_id(ip: IpAddr) -> NodeId {
    if is_local_network(&ip) {
        return NodeId::generate();
    }
    generate_id_with(ip, rand::rng().random())
}

/// Deterministic part of [`generate_id`]: `r` becomes the last byte of the ID
/// and its low three bits are mixed into the hash.
pub fn generate_id_with(ip: IpAddr, r: u8) -> NodeId {
    let crc = compute_ip_crc(ip, r & 0x07);

    let mut id = [0u8; 20];
    rand::rng().fill(&mut id);

    id[0] = (crc >> 24) as u8;
    id[1] = (crc >> 16) as u8;
    id[2] = ((crc >> 8) as u8 & 0xf8) | (id[2] & 0x07);
    id[19] = r;

    NodeId(id)
}

/// Returns true if `node_id` is consistent with `ip`.
///
/// Local network addresses are always valid.
pub fn verify_id(node_id: &NodeId, ip: IpAddr) -> bool {
    if is_local_network(&ip) {
        return true;
    }

    let r = node_id.0[19] & 0x07;
    let expected = compute_ip_crc(ip, r);

    let actual = ((node_id.0[0] as u32) << 24)
        | ((node_id.0[1] as u32) << 16)
        | ((node_id.0[2] as u32) << 8);

    actual & 0xfffff800 == expected & 0xfffff800
}

fn compute_ip_crc(ip: IpAddr, r: u8) -> u32 {
    match ip {
        IpAddr::V4(ipv4) => {
            let masked = (u32::from(ipv4) & BEP42_IPV4_MASK) | ((r as u32) << 29);
            crc32c::crc32c(&masked.to_be_bytes())
        }
        IpAddr::V6(ipv6) => {
            let high = (u128::from(ipv6) >> 64) as u64;
            let masked = (high & BEP42_IPV6_MASK) | ((r as u64) << 61);
            crc32c::crc32c(&masked.to_be_bytes())
        }
    }
}

/// Checks if an IP address is in a local/private network range.
///
/// - IPv4: 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16, 169.254.0.0/16, 127.0.0.0/8
/// - IPv6: loopback, link-local, unique local (fc00::/7)
pub fn is_local_network(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_local_ipv4(ipv4),
        IpAddr::V6(ipv6) => is_local_ipv6(ipv6),
    }
}

fn is_local_ipv4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    a == 10
        || a == 127
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        || (a == 169 && b == 254)
}

fn is_local_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() {
        return true;
    }

    let first = ip.segments()[0];
    // fe80::/10 and fc00::/7
    first & 0xffc0 == 0xfe80 || first & 0xfe00 == 0xfc00
}

/// Tallies the external address that other nodes report back in the `ip`
/// field of their replies.
#[derive(Debug, Default)]
pub struct ExternalIpVoter {
    votes: HashMap<IpAddr, HashSet<IpAddr>>,
    external: Option<IpAddr>,
}

impl ExternalIpVoter {
    pub fn external_ip(&self) -> Option<IpAddr> {
        self.external
    }

    /// Records that `voter` sees us at `reported`. Returns the address once
    /// it has enough distinct voters and differs from the one we had.
    pub fn vote(&mut self, reported: IpAddr, voter: IpAddr) -> Option<IpAddr> {
        if self.external == Some(reported) {
            return None;
        }

        if !self.votes.contains_key(&reported) && self.votes.len() >= MAX_ADDRESS_CANDIDATES {
            let weakest = self
                .votes
                .iter()
                .min_by_key(|(_, voters)| voters.len())
                .map(|(ip, _)| *ip);
            if let Some(ip) = weakest {
                self.votes.remove(&ip);
            }
        }

        let voters = self.votes.entry(reported).or_default();
        voters.insert(voter);
        if voters.len() < BEP42_REQUIRED_VOTES {
            return None;
        }

        self.votes.clear();
        self.external = Some(reported);
        Some(reported)
    }
}
