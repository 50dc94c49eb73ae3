//! Ketama consistent hash ring.
//!
//! Routes keys the same way libmemcached and twemproxy do, so a cluster
//! shared with those clients agrees on which server owns each key. Adding or
//! removing a server remaps roughly 1/N of the keys.

use md5::{Digest, Md5};

/// Ring points per unit of weight.
pub const POINTS_PER_WEIGHT: usize = 160;

/// Each MD5 digest is cut into this many 32-bit points.
const POINTS_PER_DIGEST: usize = 4;

/// Immutable ring of `(point, node index)` pairs sorted by point.
#[derive(Clone, Debug)]
pub struct Ring {
    points: Box<[(u32, u16)]>,
    node_count: u16,
}

impl Ring {
    /// Ring over equally weighted servers.
    pub fn build(servers: &[&str]) -> Self {
        servers
            .iter()
            .fold(RingBuilder::new(), |builder, server| builder.node(server, 1))
            .build()
    }

    /// Index of the node that owns `key`, in `0..node_count()`.
    #[inline]
    pub fn route(&self, key: &[u8]) -> usize {
        if self.node_count <= 1 {
            return 0;
        }
        let hash = key_hash(key);
        let idx = self.points.partition_point(|&(point, _)| point < hash);
        // past the last point wraps to the first
        let (_, node) = self.points.get(idx).unwrap_or(&self.points[0]);
        usize::from(*node)
    }

    /// Group key positions by owning node.
    ///
    /// Nodes come in the order their first key appears; positions within a
    /// node keep the caller's order.
    pub fn route_many<K: AsRef<[u8]>>(&self, keys: &[K]) -> Vec<(usize, Vec<usize>)> {
        let mut slot_of = vec![usize::MAX; self.node_count()];
        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        for (pos, key) in keys.iter().enumerate() {
            let node = self.route(key.as_ref());
            if slot_of[node] == usize::MAX {
                slot_of[node] = groups.len();
                groups.push((node, Vec::new()));
            }
            groups[slot_of[node]].1.push(pos);
        }
        groups
    }

    pub fn node_count(&self) -> usize {
        usize::from(self.node_count)
    }

    /// Total points on the ring.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }
}

/// Collects weighted nodes for a [`Ring`].
#[derive(Debug, Default)]
pub struct RingBuilder {
    nodes: Vec<(String, u32)>,
}

impl RingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. `identity` is what gets hashed, normally `host:port`;
    /// a node of weight `w` gets `160 * w` points.
    pub fn node(mut self, identity: &str, weight: u32) -> Self {
        self.nodes.push((identity.to_owned(), weight));
        self
    }

    /// # Panics
    ///
    /// If no nodes were added, any weight is 0, or there are more than
    /// `u16::MAX` nodes.
    pub fn build(self) -> Ring {
        assert!(!self.nodes.is_empty(), "Ring must have at least one node");
        assert!(
            self.nodes.iter().all(|&(_, weight)| weight > 0),
            "Ring node weight must be at least 1"
        );
        let Ok(node_count) = u16::try_from(self.nodes.len()) else {
            panic!("Ring supports at most {} nodes", u16::MAX);
        };

        let mut points: Vec<(u32, u16)> = self
            .nodes
            .iter()
            .zip(0u16..)
            .flat_map(|((identity, weight), node)| {
                node_points(identity, *weight).map(move |point| (point, node))
            })
            .collect();
        points.sort_unstable_by_key(|&(point, _)| point);

        Ring {
            points: points.into_boxed_slice(),
            node_count,
        }
    }
}

/// Points of one node: MD5 of `"<identity>-<i>"`, each digest split into
/// four little-endian words.
fn node_points(identity: &str, weight: u32) -> impl Iterator<Item = u32> + '_ {
    let digests = POINTS_PER_WEIGHT * weight as usize / POINTS_PER_DIGEST;
    (0..digests).flat_map(move |i| {
        let digest = md5(format!("{identity}-{i}").as_bytes());
        (0..POINTS_PER_DIGEST).map(move |w| le_word(&digest, w * 4))
    })
}

fn md5(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

fn le_word(digest: &[u8; 16], at: usize) -> u32 {
    u32::from_le_bytes([digest[at], digest[at + 1], digest[at + 2], digest[at + 3]])
}

/// First four digest bytes of the key, little-endian.
#[inline]
fn key_hash(key: &[u8]) -> u32 {
    le_word(&md5(key), 0)
}
