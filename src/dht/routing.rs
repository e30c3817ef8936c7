//! DHT routing module
//!
//! A flat address book of named peers. The nearest set is recomputed by a
//! linear scan on every call instead of being maintained in k-buckets.

use crate::dht::node::{NodeId, NodeIdentity, PeerRecord};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tracing::trace;

/// Size of the nearest set
pub const K: usize = 3;

/// Prefix carried by every node name
pub const NODE_PREFIX: &str = "N:";

/// Mapping from node name to transport address.
///
/// Keyed by name so iteration order, and therefore tie-breaking during
/// ranking, is deterministic. Entries are only ever overwritten.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    peers: BTreeMap<String, PeerRecord>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite a peer. Returns true if the entry is new or changed.
    pub fn upsert(&mut self, name: &str, addr: SocketAddr) -> bool {
        match self.peers.get_mut(name) {
            Some(existing) if existing.addr == addr => false,
            Some(existing) => {
                trace!("Address of {} changed: {} -> {}", name, existing.addr, addr);
                existing.addr = addr;
                true
            }
            None => {
                trace!("Learned peer {} at {}", name, addr);
                self.peers.insert(name.to_string(), PeerRecord::new(name, addr));
                true
            }
        }
    }

    /// Merge `(name, address)` pairs reported by another node.
    ///
    /// Pairs are skipped when the name lacks the node prefix, is our own name,
    /// or the address is not `ip:port`. Returns how many entries changed.
    pub fn merge<'a, I>(&mut self, own_name: &str, pairs: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut changed = 0;
        for (name, addr) in pairs {
            if name == own_name || !name.starts_with(NODE_PREFIX) {
                continue;
            }
            let Ok(addr) = addr.trim().parse::<SocketAddr>() else {
                trace!("Ignoring {} with malformed address {:?}", name, addr);
                continue;
            };
            if self.upsert(name, addr) {
                changed += 1;
            }
        }
        changed
    }

    pub fn get(&self, name: &str) -> Option<&PeerRecord> {
        self.peers.get(name)
    }

    pub fn addr_of(&self, name: &str) -> Option<SocketAddr> {
        self.peers.get(name).map(|p| p.addr)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// All peers in name order
    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Up to `limit` peers sorted by ascending distance to `target`
    pub fn rank(&self, target: &NodeId, limit: usize) -> Vec<PeerRecord> {
        rank_records(self.peers.values().cloned(), target, limit)
    }

    /// The nearest set for `target`
    pub fn nearest(&self, target: &NodeId) -> Vec<PeerRecord> {
        self.rank(target, K)
    }

    /// Whether `me` would rank among the nearest set for `target`
    pub fn is_among_closest(&self, me: &NodeIdentity, target: &NodeId) -> bool {
        let own = me.id.distance(target);
        let closer_or_equal = self
            .nearest(target)
            .iter()
            .filter(|p| p.distance_to(target) <= own)
            .count();
        closer_or_equal < K
    }
}

/// Stable sort by distance, so equal distances keep input order
pub fn rank_records<I>(records: I, target: &NodeId, limit: usize) -> Vec<PeerRecord>
where
    I: IntoIterator<Item = PeerRecord>,
{
    let mut ranked: Vec<(u32, PeerRecord)> = records
        .into_iter()
        .map(|p| (p.distance_to(target), p))
        .collect();
    ranked.sort_by_key(|(distance, _)| *distance);
    ranked.into_iter().take(limit).map(|(_, p)| p).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn book_with(count: u16) -> AddressBook {
        let mut book = AddressBook::new();
        for i in 0..count {
            book.upsert(&format!("N:node{}", i), addr(20110 + i));
        }
        book
    }

    #[test]
    fn test_upsert_last_write_wins() {
        let mut book = AddressBook::new();
        assert!(book.upsert("N:bob", addr(1)));
        assert!(!book.upsert("N:bob", addr(1)));
        assert!(book.upsert("N:bob", addr(2)));
        assert_eq!(book.len(), 1);
        assert_eq!(book.addr_of("N:bob"), Some(addr(2)));
    }

    #[test]
    fn test_merge_validates_pairs() {
        let mut book = AddressBook::new();
        let changed = book.merge(
            "N:me",
            vec![
                ("N:bob", "127.0.0.1:20111"),
                ("N:me", "127.0.0.1:20110"),
                ("D:key", "127.0.0.1:20112"),
                ("N:carol", "not-an-address"),
                ("N:dave", "127.0.0.1"),
            ],
        );
        assert_eq!(changed, 1);
        assert!(book.contains("N:bob"));
        assert!(!book.contains("N:me"));
        assert!(!book.contains("N:carol"));
    }

    #[test]
    fn test_rank_at_most_k_sorted() {
        let book = book_with(10);
        let target = NodeId::for_key("D:hello");
        let nearest = book.nearest(&target);
        assert_eq!(nearest.len(), K);
        let distances: Vec<u32> = nearest.iter().map(|p| p.distance_to(&target)).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));

        // Nothing outside the set is strictly closer than its last member
        let worst = *distances.last().unwrap();
        let outside_closer = book
            .peers()
            .filter(|p| !nearest.contains(p))
            .filter(|p| p.distance_to(&target) < worst)
            .count();
        assert_eq!(outside_closer, 0);
    }

    #[test]
    fn test_rank_small_book() {
        let book = book_with(2);
        assert_eq!(book.nearest(&NodeId::for_key("D:x")).len(), 2);
        assert!(AddressBook::new().nearest(&NodeId::for_key("D:x")).is_empty());
    }

    #[test]
    fn test_rank_ties_broken_by_name() {
        // Every peer sits at distance 256 from the all-zero target
        let mut book = AddressBook::new();
        for name in ["N:d", "N:c", "N:a", "N:b"] {
            book.peers.insert(
                name.to_string(),
                PeerRecord { name: name.to_string(), addr: addr(1), id: NodeId::new([0xFFu8; 32]) },
            );
        }
        let ranked = book.nearest(&NodeId::new([0u8; 32]));
        let names: Vec<&str> = ranked.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["N:a", "N:b", "N:c"]);
    }

    #[test]
    fn test_rank_is_deterministic() {
        let book = book_with(8);
        let target = NodeId::for_key("D:Juliet-0");
        assert_eq!(book.nearest(&target), book.nearest(&target));
    }

    #[test]
    fn test_is_among_closest_with_few_peers() {
        let me = NodeIdentity::new("N:me");
        let book = book_with(2);
        assert!(book.is_among_closest(&me, &NodeId::for_key("D:anything")));
    }

    #[test]
    fn test_is_among_closest_when_target_is_self() {
        let me = NodeIdentity::new("N:me");
        let book = book_with(10);
        // Distance zero beats every peer
        assert!(book.is_among_closest(&me, &me.id));
    }

    fn record(name: &str, first_byte: u8) -> PeerRecord {
        let mut id = [0u8; 32];
        id[0] = first_byte;
        PeerRecord { name: name.to_string(), addr: addr(1), id: NodeId::new(id) }
    }

    #[test]
    fn test_not_among_closest_when_three_peers_are_closer() {
        let me = NodeIdentity { name: "N:me".into(), id: NodeId::new([0xFFu8; 32]) };
        let mut book = AddressBook::new();
        for (name, byte) in [("N:a", 0x01), ("N:b", 0x02), ("N:c", 0x04)] {
            book.peers.insert(name.to_string(), record(name, byte));
        }
        assert!(!book.is_among_closest(&me, &NodeId::new([0u8; 32])));
    }

    #[test]
    fn test_among_closest_when_closer_than_third_peer() {
        let mut id = [0u8; 32];
        id[0] = 0x03;
        let me = NodeIdentity { name: "N:me".into(), id: NodeId::new(id) };
        let mut book = AddressBook::new();
        for (name, byte) in [("N:a", 0x01), ("N:b", 0x10), ("N:c", 0x80)] {
            book.peers.insert(name.to_string(), record(name, byte));
        }
        // Only N:a (distance 249) is at or below our distance of 250
        assert!(book.is_among_closest(&me, &NodeId::new([0u8; 32])));
    }
}
