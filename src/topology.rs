//! Graph topology analysis using CSR format.
//!
//! A [`GraphTopology`] is a snapshot of a network's enabled connections
//! (self-connections included) in Compressed Sparse Row form. Dense indices are
//! list positions, so index `i` is the node at `Network::node_at(i)`.
//!
//! ## Determinism
//!
//! Edges are laid out in connection creation order, and Kahn's algorithm seeds
//! its queue in list order. Two clones of a network therefore produce the same
//! topological order.

use std::collections::VecDeque;

use crate::gene::{ConnectionId, NodeId};
use crate::network::Network;

/// CSR-format graph topology.
#[derive(Debug, Clone)]
pub struct GraphTopology {
    node_count: usize,
    /// Maps dense index (list position) back to NodeId.
    idx_to_node: Vec<NodeId>,
    /// CSR offsets for forward edges. Length = node_count + 1.
    fwd_offsets: Vec<usize>,
    /// fwd_targets[fwd_offsets[i]..fwd_offsets[i+1]] are successors of node i.
    fwd_targets: Vec<usize>,
    /// Connection ids parallel to fwd_targets.
    fwd_conn_ids: Vec<ConnectionId>,
    /// Number of incoming edges per node.
    in_degree: Vec<usize>,
}

impl GraphTopology {
    /// Build topology from a network's enabled connections.
    #[must_use]
    pub fn from_network(net: &Network) -> Self {
        Self::build(net, false)
    }

    /// Build topology from every connection, disabled ones included.
    ///
    /// Disabled connections can be re-enabled, so structural checks such as
    /// acyclic enforcement have to see them.
    #[must_use]
    pub fn structural(net: &Network) -> Self {
        Self::build(net, true)
    }

    fn build(net: &Network, include_disabled: bool) -> Self {
        let idx_to_node = net.node_ids().to_vec();
        let node_count = idx_to_node.len();

        let edges: Vec<(ConnectionId, usize, usize)> = net
            .connection_ids()
            .iter()
            .chain(net.self_connection_ids())
            .filter_map(|&id| {
                let conn = net.connection(id)?;
                if !conn.enabled && !include_disabled {
                    return None;
                }
                Some((id, net.position(conn.from())?, net.position(conn.to())?))
            })
            .collect();

        let (fwd_offsets, fwd_slots) = csr_offsets(node_count, edges.iter().map(|e| e.1));
        let mut fwd_targets = vec![0usize; edges.len()];
        let mut fwd_conn_ids = vec![ConnectionId::default(); edges.len()];
        let mut in_degree = vec![0usize; node_count];
        let mut write_pos = fwd_slots;
        for &(id, from, to) in &edges {
            let pos = write_pos[from];
            fwd_targets[pos] = to;
            fwd_conn_ids[pos] = id;
            write_pos[from] += 1;
            in_degree[to] += 1;
        }

        Self {
            node_count,
            idx_to_node,
            fwd_offsets,
            fwd_targets,
            fwd_conn_ids,
            in_degree,
        }
    }

    /// Get the NodeId for a dense index.
    #[inline]
    #[must_use]
    pub fn node_id(&self, idx: usize) -> Option<NodeId> {
        self.idx_to_node.get(idx).copied()
    }

    /// Number of nodes in the topology.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Iterate over successors of a node.
    #[inline]
    pub fn successors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        let start = self.fwd_offsets[idx];
        let end = self.fwd_offsets[idx + 1];
        self.fwd_targets[start..end].iter().copied()
    }

    /// Connections whose target does not come after their source in list order.
    ///
    /// These are exactly the edges acyclic enforcement rejects.
    #[must_use]
    pub fn backward_edges(&self) -> Vec<ConnectionId> {
        let mut found = Vec::new();
        for from in 0..self.node_count {
            let start = self.fwd_offsets[from];
            for (offset, to) in self.successors(from).enumerate() {
                if to <= from {
                    found.push(self.fwd_conn_ids[start + offset]);
                }
            }
        }
        found
    }

    /// Node indices in topological order (Kahn's algorithm).
    ///
    /// Returns None if the graph has cycles.
    #[must_use]
    pub fn topological_order(&self) -> Option<Vec<usize>> {
        let mut in_degree = self.in_degree.clone();

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(idx, _)| idx)
            .collect();

        let mut order = Vec::with_capacity(self.node_count);
        while let Some(u) = queue.pop_front() {
            order.push(u);
            for v in self.successors(u) {
                in_degree[v] -= 1;
                if in_degree[v] == 0 {
                    queue.push_back(v);
                }
            }
        }

        if order.len() == self.node_count {
            Some(order)
        } else {
            None
        }
    }
}

/// Prefix-sum offsets for a CSR array keyed by `keys`, plus a copy of the
/// starting write positions.
fn csr_offsets(node_count: usize, keys: impl Iterator<Item = usize>) -> (Vec<usize>, Vec<usize>) {
    let mut counts = vec![0usize; node_count];
    for key in keys {
        counts[key] += 1;
    }
    let mut offsets = Vec::with_capacity(node_count + 1);
    let mut running = 0;
    offsets.push(0);
    for count in counts {
        running += count;
        offsets.push(running);
    }
    let slots = offsets[..node_count].to_vec();
    (offsets, slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn test_topology_basic() {
        let mut rng = test_rng();
        let net = Network::new(2, 1, &mut rng);
        let topo = GraphTopology::from_network(&net);

        assert_eq!(topo.node_count(), 3);
        assert!(topo.topological_order().is_some());
        assert_eq!(topo.successors(0).collect::<Vec<_>>(), vec![2]);
        assert_eq!(topo.successors(1).collect::<Vec<_>>(), vec![2]);
        assert_eq!(topo.successors(2).count(), 0);
        assert_eq!(topo.node_id(2), net.node_at(2));
    }

    #[test]
    fn test_disabled_edges_are_skipped() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        let first = net.connection_ids()[0];
        net.set_enabled(first, false).unwrap();

        let topo = GraphTopology::from_network(&net);
        assert_eq!(topo.successors(0).count(), 0);
        let structural = GraphTopology::structural(&net);
        assert_eq!(structural.successors(0).count(), 1);
    }

    #[test]
    fn test_self_connection_is_a_cycle() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 1, &mut rng);
        let out = net.node_at(1).unwrap();
        let self_conn = net.connect(out, out, 0.2).unwrap();

        let topo = GraphTopology::from_network(&net);
        assert!(topo.topological_order().is_none());
        assert_eq!(topo.backward_edges(), vec![self_conn]);
    }

    #[test]
    fn test_backward_edges_include_disabled() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 1, &mut rng);
        let (input, out) = (net.node_at(0).unwrap(), net.node_at(1).unwrap());
        let back = net.connect(out, input, 0.3).unwrap();
        net.set_enabled(back, false).unwrap();

        assert!(GraphTopology::from_network(&net).backward_edges().is_empty());
        assert_eq!(GraphTopology::structural(&net).backward_edges(), vec![back]);
    }

    #[test]
    fn test_topological_order() {
        let mut rng = test_rng();
        let net = Network::perceptron(&[2, 3, 1], &mut rng).unwrap();
        let topo = GraphTopology::from_network(&net);
        let order = topo.topological_order().expect("perceptron is acyclic");

        assert_eq!(order.len(), 6);
        let rank = |idx: usize| order.iter().position(|&o| o == idx).unwrap();
        for from in 0..topo.node_count() {
            for to in topo.successors(from) {
                assert!(rank(from) < rank(to));
            }
        }
    }
}
