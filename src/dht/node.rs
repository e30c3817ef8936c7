//! DHT node module
//!
//! Identity digests and the peer records kept in the address book.

use std::net::SocketAddr;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of bits in a digest.
pub const ID_BITS: u32 = 256;

/// Hash an arbitrary name or key to a 64 character lowercase hex digest.
pub fn hash_id(s: &str) -> String {
    hex::encode(Sha256::digest(s.as_bytes()))
}

/// 256-bit identity digest of a node name or data key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create a new NodeId from bytes
    pub fn new(id: [u8; 32]) -> Self {
        Self(id)
    }

    /// Digest of a node name or data key
    pub fn for_key(key: &str) -> Self {
        let mut id = [0u8; 32];
        id.copy_from_slice(&Sha256::digest(key.as_bytes()));
        Self(id)
    }

    /// Get the NodeId as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Get the NodeId as a hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a NodeId from a hex string
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        hex::decode(hex_str)
            .ok()
            .and_then(|bytes| {
                if bytes.len() == 32 {
                    let mut id = [0u8; 32];
                    id.copy_from_slice(&bytes);
                    Some(Self(id))
                } else {
                    None
                }
            })
    }

    /// Number of leading bits shared with another digest
    pub fn matching_bits(&self, other: &NodeId) -> u32 {
        let mut bits = 0;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let xor = a ^ b;
            if xor == 0 {
                bits += 8;
            } else {
                bits += xor.leading_zeros();
                break;
            }
        }
        bits
    }

    /// Distance to another digest: 0 when identical, 256 when the first bit differs
    pub fn distance(&self, other: &NodeId) -> u32 {
        ID_BITS - self.matching_bits(other)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The local node's name and digest, fixed for the node's lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub name: String,
    pub id: NodeId,
}

impl NodeIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let id = NodeId::for_key(&name);
        Self { name, id }
    }
}

/// A known peer: its name, digest and transport address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
    pub name: String,
    pub addr: SocketAddr,
    #[serde(skip)]
    pub id: NodeId,
}

impl PeerRecord {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        let name = name.into();
        let id = NodeId::for_key(&name);
        Self { name, addr, id }
    }

    /// Distance from this peer to a target digest
    pub fn distance_to(&self, target: &NodeId) -> u32 {
        self.id.distance(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_id_known_vector() {
        assert_eq!(
            hash_id("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_id("N:alice").len(), 64);
    }

    #[test]
    fn test_for_key_matches_hash_id() {
        let id = NodeId::for_key("D:hello");
        assert_eq!(id.to_hex(), hash_id("D:hello"));
    }

    #[test]
    fn test_from_hex() {
        let hex_str = "ab".repeat(32);
        let node_id = NodeId::from_hex(&hex_str);
        assert_eq!(node_id.unwrap().0, [0xABu8; 32]);
        assert!(NodeId::from_hex("abcd").is_none());
        assert!(NodeId::from_hex(&"zz".repeat(32)).is_none());
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let id = NodeId::for_key("N:alice");
        assert_eq!(id.distance(&id), 0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = NodeId::for_key("N:alice");
        let b = NodeId::for_key("N:bob");
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn test_distance_counts_leading_agreement() {
        let zero = NodeId::new([0u8; 32]);
        let mut first_bit = [0u8; 32];
        first_bit[0] = 0x80;
        assert_eq!(zero.distance(&NodeId::new(first_bit)), 256);

        // 0x0 vs 0x1 in the second nibble: 4 + 3 matching bits
        let mut low = [0u8; 32];
        low[0] = 0x01;
        assert_eq!(zero.distance(&NodeId::new(low)), 256 - 7);

        let mut deep = [0u8; 32];
        deep[2] = 0x10;
        assert_eq!(zero.distance(&NodeId::new(deep)), 256 - 19);
    }

    #[test]
    fn test_peer_record_digest() {
        let peer = PeerRecord::new("N:bob", "127.0.0.1:20111".parse().unwrap());
        assert_eq!(peer.id, NodeId::for_key("N:bob"));
        assert_eq!(peer.distance_to(&peer.id), 0);
    }

    #[test]
    fn test_identity_digest() {
        let me = NodeIdentity::new("N:alice");
        assert_eq!(me.id.to_hex(), hash_id("N:alice"));
    }
}
