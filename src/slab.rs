//! Packed forward pass for acyclic, ungated networks.
//!
//! The slab stores the network in list order using Compressed Sparse Row
//! arrays: for node `i`, incoming edges live at `offsets[i]..offsets[i + 1]`.
//! Summation follows the generic pass exactly (bias first, then incoming
//! connections in insertion order), so both paths produce bit-identical
//! activations.

use crate::activation::Activation;
use crate::gene::{ConnectionId, NodeId};
use crate::network::Network;

/// A compiled, evaluation-ready snapshot of a network.
#[derive(Debug, Clone)]
pub(crate) struct Slab {
    input: usize,
    output: usize,
    /// Node ids in list order, for writing results back.
    ids: Vec<NodeId>,
    biases: Vec<f64>,
    squashes: Vec<Activation>,
    masks: Vec<f64>,
    /// CSR offsets, len = node count + 1.
    offsets: Vec<usize>,
    /// CSR: list position of each edge's source.
    sources: Vec<usize>,
    /// CSR: effective weights, parallel to `sources`.
    weights: Vec<f64>,
    /// CSR: connection ids, parallel to `sources`.
    conn_ids: Vec<ConnectionId>,
    activations: Vec<f64>,
    states: Vec<f64>,
}

impl Slab {
    /// Pack a network, or `None` if it needs the generic pass.
    ///
    /// Unsupported: gated connections, enabled self-connections and enabled
    /// edges whose source does not precede their target in list order.
    pub(crate) fn build(net: &Network) -> Option<Self> {
        if net.gate_count() > 0 {
            return None;
        }
        let has_self_loop = net
            .self_connection_ids()
            .iter()
            .filter_map(|&c| net.connection(c))
            .any(|c| c.enabled);
        if has_self_loop {
            return None;
        }

        let ids = net.node_ids().to_vec();
        let n = ids.len();
        let mut biases = Vec::with_capacity(n);
        let mut squashes = Vec::with_capacity(n);
        let mut masks = Vec::with_capacity(n);
        let mut offsets = Vec::with_capacity(n + 1);
        let mut sources = Vec::new();
        let mut weights = Vec::new();
        let mut conn_ids = Vec::new();
        offsets.push(0);

        for (pos, &id) in ids.iter().enumerate() {
            let node = net.node(id)?;
            biases.push(node.bias);
            squashes.push(node.squash);
            masks.push(node.mask);
            for &c in node.incoming() {
                let conn = net.connection(c)?;
                if !conn.enabled {
                    continue;
                }
                let from = net.position(conn.from())?;
                if from >= pos {
                    return None;
                }
                sources.push(from);
                weights.push(conn.effective_weight());
                conn_ids.push(c);
            }
            offsets.push(sources.len());
        }

        Some(Self {
            input: net.input_size(),
            output: net.output_size(),
            ids,
            biases,
            squashes,
            masks,
            offsets,
            sources,
            weights,
            conn_ids,
            activations: vec![0.0; n],
            states: vec![0.0; n],
        })
    }

    /// Whether the snapshot still matches the network's node list.
    pub(crate) fn matches(&self, net: &Network) -> bool {
        self.ids.as_slice() == net.node_ids()
    }

    /// Run the forward pass and return the output activations.
    pub(crate) fn run(&mut self, inputs: &[f64]) -> Vec<f64> {
        let n = self.ids.len();
        self.activations[..self.input].copy_from_slice(inputs);

        for pos in self.input..n {
            let mut sum = self.biases[pos];
            for k in self.offsets[pos]..self.offsets[pos + 1] {
                sum += self.activations[self.sources[k]] * self.weights[k];
            }
            self.states[pos] = sum;
            self.activations[pos] = self.squashes[pos].apply(sum) * self.masks[pos];
        }

        self.activations[n - self.output..].to_vec()
    }

    /// Copy the last run's values onto the network's nodes.
    ///
    /// With `trace`, also refresh `old`, `derivative` and each connection's
    /// eligibility, as the generic tracing pass would.
    pub(crate) fn write_back(&self, net: &mut Network, trace: bool) {
        for (pos, &id) in self.ids.iter().enumerate() {
            let Some(node) = net.nodes.get_mut(id) else {
                continue;
            };
            node.activation = self.activations[pos];
            if pos < self.input {
                continue;
            }
            if trace {
                node.old = node.state;
                node.derivative = self.squashes[pos].derivative(self.states[pos]);
            }
            node.state = self.states[pos];
        }

        if trace {
            for (k, &c) in self.conn_ids.iter().enumerate() {
                if let Some(conn) = net.connections.get_mut(c) {
                    conn.eligibility = self.activations[self.sources[k]] * conn.gain;
                }
            }
        }
    }
}
