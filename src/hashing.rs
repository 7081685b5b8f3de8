//! Consistent hash ring (spec §4.2): maps a string key to exactly one owning
//! node among the live nodes, via `replicas` virtual points per node hashed
//! with the first 4 bytes of MD5, big-endian -- the same digest construction
//! the original Python `ConsistentHashRing._hash` used.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    replicas: usize,
    /// Sorted by key (`BTreeMap` keeps insertion order sorted for free), maps
    /// a virtual point to the physical node that owns it.
    points: BTreeMap<u32, String>,
}

impl ConsistentHashRing {
    pub fn new(replicas: usize) -> Self {
        ConsistentHashRing { replicas, points: BTreeMap::new() }
    }

    fn point_hash(key: &str) -> u32 {
        let digest = md5::compute(key.as_bytes());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    /// Adds a physical node, represented by `replicas` virtual points. On a
    /// point collision (vanishingly unlikely with MD5) the later call wins,
    /// since it simply overwrites the map entry for that point.
    pub fn add(&mut self, node_id: &str) {
        for i in 0..self.replicas {
            let point = Self::point_hash(&format!("{}:{}", node_id, i));
            self.points.insert(point, node_id.to_string());
        }
    }

    /// Removes a physical node's virtual points. Erases only points whose
    /// current owner is exactly `node_id`, so a stale `remove` after a
    /// colliding `add` can't evict the wrong node.
    pub fn remove(&mut self, node_id: &str) {
        for i in 0..self.replicas {
            let point = Self::point_hash(&format!("{}:{}", node_id, i));
            if self.points.get(&point).map(|n| n.as_str()) == Some(node_id) {
                self.points.remove(&point);
            }
        }
    }

    /// Returns the node responsible for `key`: the node owning the smallest
    /// point `>= hash(key)`, wrapping to the first point past the end.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let h = Self::point_hash(key);
        let owner = self
            .points
            .range(h..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, node)| node.as_str());
        owner
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
