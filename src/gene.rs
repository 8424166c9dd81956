//! Node and connection types.
//!
//! - [`Node`]: a computational unit with bias, squash, running state and the
//!   error signals used by backpropagation
//! - [`Connection`]: a weighted edge, optionally gated by a third node
//!
//! Both live in `SlotMap` arenas owned by [`Network`](crate::Network) and are
//! addressed by generational ids that stay valid across structural edits.

use rand::Rng;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::activation::Activation;

new_key_type! {
    /// Stable identifier of a node within one network.
    pub struct NodeId;

    /// Stable identifier of a connection within one network.
    pub struct ConnectionId;
}

/// Role of a node in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Receives an external value; no squash applied.
    Input,
    /// Internal node added by construction or mutation.
    Hidden,
    /// Produces one network output.
    Output,
}

/// Error signals computed during the backward pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeError {
    /// Total error attributed to this node.
    pub responsibility: f64,
    /// Error flowing back through outgoing connections.
    pub projected: f64,
    /// Error flowing back through connections this node gates.
    pub gated: f64,
}

/// A node in the network graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Role of the node.
    pub kind: NodeKind,
    /// Historical marking used to align genomes during crossover.
    pub gene_id: u64,
    /// Bias added to the state before squashing.
    pub bias: f64,
    /// Squash function.
    pub squash: Activation,
    /// Output of the last activation.
    pub activation: f64,
    /// Pre-squash accumulator of the last activation.
    pub state: f64,
    /// State before the last activation (read by gated self-connections).
    pub old: f64,
    /// Squash derivative at the last state.
    pub derivative: f64,
    /// Dropout mask: 0 or 1 while training, the survival value afterwards.
    pub mask: f64,
    /// Error signals of the last backward pass.
    pub error: NodeError,
    /// Bias delta applied by the previous update (momentum).
    pub previous_delta_bias: f64,
    /// Bias delta accumulated since the last update.
    pub total_delta_bias: f64,
    pub(crate) incoming: Vec<ConnectionId>,
    pub(crate) outgoing: Vec<ConnectionId>,
    pub(crate) self_connection: Option<ConnectionId>,
    pub(crate) gated: Vec<ConnectionId>,
}

impl Node {
    /// Create a node with the given role, bias and squash.
    #[must_use]
    pub fn new(kind: NodeKind, gene_id: u64, bias: f64, squash: Activation) -> Self {
        Self {
            kind,
            gene_id,
            bias,
            squash,
            activation: 0.0,
            state: 0.0,
            old: 0.0,
            derivative: 0.0,
            mask: 1.0,
            error: NodeError::default(),
            previous_delta_bias: 0.0,
            total_delta_bias: 0.0,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            self_connection: None,
            gated: Vec::new(),
        }
    }

    /// Create an input node.
    #[must_use]
    pub fn input(gene_id: u64) -> Self {
        Self::new(NodeKind::Input, gene_id, 0.0, Activation::Logistic)
    }

    /// Create a hidden or output node with a small random bias.
    #[must_use]
    pub fn random<R: Rng>(kind: NodeKind, gene_id: u64, squash: Activation, rng: &mut R) -> Self {
        let bias = if kind == NodeKind::Input {
            0.0
        } else {
            small_random(rng)
        };
        Self::new(kind, gene_id, bias, squash)
    }

    /// Incoming connections, excluding the self-connection.
    #[must_use]
    pub fn incoming(&self) -> &[ConnectionId] {
        &self.incoming
    }

    /// Outgoing connections, excluding the self-connection.
    #[must_use]
    pub fn outgoing(&self) -> &[ConnectionId] {
        &self.outgoing
    }

    /// The self-connection, if any.
    #[must_use]
    pub fn self_connection(&self) -> Option<ConnectionId> {
        self.self_connection
    }

    /// Connections this node currently gates.
    #[must_use]
    pub fn gated(&self) -> &[ConnectionId] {
        &self.gated
    }

    /// Reset running state, traces and error signals.
    pub(crate) fn clear(&mut self) {
        self.activation = 0.0;
        self.state = 0.0;
        self.old = 0.0;
        self.derivative = 0.0;
        self.error = NodeError::default();
    }
}

/// A directed, weighted edge.
#[derive(Debug, Clone)]
pub struct Connection {
    pub(crate) from: NodeId,
    pub(crate) to: NodeId,
    /// Connection weight.
    pub weight: f64,
    pub(crate) gater: Option<NodeId>,
    /// Multiplier from the gater's last activation; 1 when ungated.
    pub gain: f64,
    /// Disabled connections stay in the graph but carry no signal.
    pub enabled: bool,
    /// Historical marking derived from the endpoint gene ids.
    pub innovation: u64,
    /// Eligibility trace for the weight gradient.
    pub eligibility: f64,
    /// Extended traces, one per node influenced through a gate.
    pub xtrace: Vec<(NodeId, f64)>,
    /// Weight delta applied by the previous update (momentum).
    pub previous_delta_weight: f64,
    /// Weight delta accumulated since the last update.
    pub total_delta_weight: f64,
    /// Raw gradient of the last backward pass, used for saliency pruning.
    pub gradient: f64,
    /// DropConnect mask; 1 outside training.
    pub drop_mask: f64,
}

impl Connection {
    pub(crate) fn new(from: NodeId, to: NodeId, weight: f64, innovation: u64) -> Self {
        Self {
            from,
            to,
            weight,
            gater: None,
            gain: 1.0,
            enabled: true,
            innovation,
            eligibility: 0.0,
            xtrace: Vec::new(),
            previous_delta_weight: 0.0,
            total_delta_weight: 0.0,
            gradient: 0.0,
            drop_mask: 1.0,
        }
    }

    /// Source node.
    #[must_use]
    pub fn from(&self) -> NodeId {
        self.from
    }

    /// Target node.
    #[must_use]
    pub fn to(&self) -> NodeId {
        self.to
    }

    /// Node gating this connection, if any.
    #[must_use]
    pub fn gater(&self) -> Option<NodeId> {
        self.gater
    }

    /// Whether this is a self-connection.
    #[must_use]
    pub fn is_self(&self) -> bool {
        self.from == self.to
    }

    /// Weight as seen by the forward pass.
    #[inline]
    #[must_use]
    pub fn effective_weight(&self) -> f64 {
        self.weight * self.drop_mask
    }
}

/// Uniform value in `[-0.1, 0.1)`, the default for fresh biases and weights.
pub(crate) fn small_random<R: Rng>(rng: &mut R) -> f64 {
    rng.random::<f64>() * 0.2 - 0.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use slotmap::SlotMap;

    #[test]
    fn test_node_creation() {
        let input = Node::input(0);
        assert_eq!(input.kind, NodeKind::Input);
        assert_eq!(input.bias, 0.0);
        assert_eq!(input.mask, 1.0);

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let hidden = Node::random(NodeKind::Hidden, 99, Activation::Tanh, &mut rng);
        assert_eq!(hidden.kind, NodeKind::Hidden);
        assert_eq!(hidden.squash, Activation::Tanh);
        assert!(hidden.bias.abs() <= 0.1);
        assert!(hidden.incoming().is_empty());
        assert!(hidden.self_connection().is_none());
    }

    #[test]
    fn test_connection_creation() {
        let mut nodes: SlotMap<NodeId, Node> = SlotMap::with_key();
        let a = nodes.insert(Node::input(0));
        let b = nodes.insert(Node::new(NodeKind::Output, 1, 0.0, Activation::Logistic));

        let conn = Connection::new(a, b, 0.5, 100);
        assert_eq!(conn.from(), a);
        assert_eq!(conn.to(), b);
        assert!(conn.enabled);
        assert!(conn.gater().is_none());
        assert!(!conn.is_self());
        assert!((conn.effective_weight() - 0.5).abs() < 1e-12);

        let selfie = Connection::new(b, b, 1.0, 101);
        assert!(selfie.is_self());
    }
}
