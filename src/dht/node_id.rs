use super::error::DhtError;
use rand::Rng as _;
use std::cmp::Ordering;
use std::fmt;

pub const NODE_ID_LEN: usize = 20;

/// A 160-bit DHT identifier.
///
/// Node IDs, info hashes and item targets all live in the same ID space and
/// are ordered only relative to a reference ID, by XOR distance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NodeId(pub [u8; NODE_ID_LEN]);

impl NodeId {
    pub fn generate() -> Self {
        let mut id = [0u8; NODE_ID_LEN];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        let id = <[u8; NODE_ID_LEN]>::try_from(bytes).map_err(|_| DhtError::InvalidNodeId)?;
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    pub fn is_all_zeros(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// XOR distance to `other`, itself a point in the ID space.
    pub fn distance(&self, other: &NodeId) -> NodeId {
        let mut dist = [0u8; NODE_ID_LEN];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        NodeId(dist)
    }

    /// Number of leading bits shared with `other` (160 for identical IDs).
    pub fn prefix_len(&self, other: &NodeId) -> usize {
        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let x = a ^ b;
            if x != 0 {
                return i * 8 + x.leading_zeros() as usize;
            }
        }
        NODE_ID_LEN * 8
    }

    /// Copies this ID, keeps the first `bits` bits and randomizes the rest.
    pub fn randomize_suffix(&self, bits: usize) -> NodeId {
        let mut id = NodeId::generate().0;
        let full_bytes = (bits / 8).min(NODE_ID_LEN);
        id[..full_bytes].copy_from_slice(&self.0[..full_bytes]);

        let rem = bits % 8;
        if rem > 0 && full_bytes < NODE_ID_LEN {
            let keep_mask = !(0xffu8 >> rem);
            id[full_bytes] = (self.0[full_bytes] & keep_mask) | (id[full_bytes] & !keep_mask);
        }
        NodeId(id)
    }
}

/// Bitwise XOR of two IDs.
pub fn distance(a: &NodeId, b: &NodeId) -> NodeId {
    a.distance(b)
}

/// Returns true iff `a` is strictly closer to `reference` than `b` is.
pub fn compare_ref(a: &NodeId, b: &NodeId, reference: &NodeId) -> bool {
    cmp_distance(a, b, reference) == Ordering::Less
}

/// Orders `a` and `b` by their XOR distance to `reference`.
pub fn cmp_distance(a: &NodeId, b: &NodeId, reference: &NodeId) -> Ordering {
    for i in 0..NODE_ID_LEN {
        let lhs = a.0[i] ^ reference.0[i];
        let rhs = b.0[i] ^ reference.0[i];
        match lhs.cmp(&rhs) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Index of the highest set bit of `a XOR b`, 0..=159. Identical IDs give 0.
pub fn distance_exp(a: &NodeId, b: &NodeId) -> usize {
    let prefix = a.prefix_len(b);
    (NODE_ID_LEN * 8 - 1).saturating_sub(prefix)
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl From<[u8; NODE_ID_LEN]> for NodeId {
    fn from(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }
}
