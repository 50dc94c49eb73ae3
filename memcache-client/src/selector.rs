//! Maps keys to nodes of the cluster.

use ketama::{Ring, RingBuilder};

use crate::config::NodeConfig;

/// Ketama server selection over a fixed cluster.
///
/// Node indices match the order of the configured servers.
pub(crate) struct Selector {
    ring: Ring,
}

impl Selector {
    /// Build the ring. `nodes` must be non-empty with weights of at least 1,
    /// which [`ClientConfig::validate`](crate::ClientConfig::validate) checks.
    pub(crate) fn new(nodes: &[NodeConfig]) -> Self {
        let ring = nodes
            .iter()
            .fold(RingBuilder::new(), |builder, node| {
                builder.node(&node.address, node.weight)
            })
            .build();
        Self { ring }
    }

    pub(crate) fn select(&self, key: &[u8]) -> usize {
        self.ring.route(key)
    }

    /// Group key positions by node. Nodes come in order of first appearance
    /// and each group keeps the caller's key order.
    pub(crate) fn group<K: AsRef<[u8]>>(&self, keys: &[K]) -> Vec<(usize, Vec<usize>)> {
        self.ring.route_many(keys)
    }

    /// Like [`Selector::group`], with the keys themselves.
    pub(crate) fn select_many<'k, K: AsRef<[u8]>>(
        &self,
        keys: &'k [K],
    ) -> Vec<(usize, Vec<&'k [u8]>)> {
        self.group(keys)
            .into_iter()
            .map(|(node, positions)| {
                (
                    node,
                    positions.into_iter().map(|i| keys[i].as_ref()).collect(),
                )
            })
            .collect()
    }
}
