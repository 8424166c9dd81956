//! The network graph container.
//!
//! A [`Network`] owns every node and connection in `SlotMap` arenas and keeps
//! a separate list order: the first `input` entries are input nodes, the last
//! `output` entries are output nodes and everything between is hidden. The
//! forward pass walks that order; backpropagation walks it in reverse.
//!
//! Derived state (position index, topological order, packed slab) is rebuilt
//! from the arenas. Every structural edit goes through this module so the
//! caches are invalidated in one place.

mod activate;
mod crossover;
mod mutation;
mod propagate;
mod pruning;
mod serialize;
mod standalone;

pub use mutation::{Mutation, MutationConfig, MAX_OPERATORS_PER_CALL};
pub use propagate::Regularization;
pub(crate) use propagate::Step;
pub use pruning::{PruningConfig, PruningMethod};
pub use serialize::{
    evaluate_serialized, CompactConnection, CompactGenome, ConnectionJson, NetworkJson, NodeJson,
    FORMAT_VERSION,
};

use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};

use crate::activation::Activation;
use crate::error::{NetworkError, Result};
use crate::gene::{small_random, Connection, ConnectionId, Node, NodeId, NodeKind};
use crate::innovation::{
    connection_innovation, input_gene_id, layer_gene_id, output_gene_id, resalt,
};
use crate::slab::Slab;
use crate::topology::GraphTopology;

use pruning::PruningSchedule;

/// Seed of the network-owned stream when none is given.
const DEFAULT_SEED: u64 = 0x5EED_0F_5EED;

/// Options for [`Network::with_options`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkOptions {
    /// Split connections at construction until this many hidden nodes exist.
    pub min_hidden: usize,
    /// Reject connections whose target precedes their source in list order.
    pub enforce_acyclic: bool,
    /// Dropout rate applied to hidden nodes during training passes.
    pub dropout: f64,
    /// Seed for the stream used by dropout, DropConnect, noise and shuffling.
    pub seed: u64,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            min_hidden: 0,
            enforce_acyclic: false,
            dropout: 0.0,
            seed: DEFAULT_SEED,
        }
    }
}

impl NetworkOptions {
    /// Options for a strictly feedforward network.
    #[must_use]
    pub fn feedforward() -> Self {
        Self {
            enforce_acyclic: true,
            ..Default::default()
        }
    }
}

/// Packed fast-path state.
#[derive(Debug, Clone, Default)]
pub(crate) enum SlabState {
    /// Not built since the last invalidation.
    #[default]
    Unknown,
    /// The current graph cannot use the fast path.
    Unsupported,
    /// Ready to run.
    Ready(Slab),
}

/// Caches derived from the arenas.
#[derive(Debug, Clone, Default)]
pub(crate) struct DerivedCache {
    /// `Some(None)` records that the graph has a cycle.
    pub(crate) topo: Option<Option<Vec<NodeId>>>,
    pub(crate) slab: SlabState,
}

impl DerivedCache {
    pub(crate) fn invalidate(&mut self) {
        self.topo = None;
        self.slab = SlabState::Unknown;
    }

    pub(crate) fn invalidate_params(&mut self) {
        self.slab = SlabState::Unknown;
    }
}

/// A mutable, graph-structured neural network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "NetworkJson", try_from = "NetworkJson")]
pub struct Network {
    input: usize,
    output: usize,
    pub(crate) nodes: SlotMap<NodeId, Node>,
    pub(crate) order: Vec<NodeId>,
    pub(crate) positions: SecondaryMap<NodeId, usize>,
    pub(crate) connections: SlotMap<ConnectionId, Connection>,
    pub(crate) edges: Vec<ConnectionId>,
    pub(crate) self_connections: Vec<ConnectionId>,
    pub(crate) gates: Vec<ConnectionId>,
    /// Dropout rate for hidden nodes during training passes.
    pub dropout: f64,
    /// Fitness assigned by an external evaluator; read by crossover.
    pub score: Option<f64>,
    /// Bounds and options used by [`Network::mutate`].
    pub mutation: MutationConfig,
    pub(crate) training_step: u64,
    pub(crate) enforce_acyclic: bool,
    pub(crate) pruning: Option<PruningSchedule>,
    pub(crate) prune_baseline: Option<usize>,
    pub(crate) cache: DerivedCache,
    pub(crate) rng: ChaCha8Rng,
}

impl Network {
    /// Create a network with every input connected to every output.
    #[must_use]
    pub fn new<R: Rng>(input: usize, output: usize, rng: &mut R) -> Self {
        Self::with_options(input, output, NetworkOptions::default(), rng)
    }

    /// Create a fully connected network with explicit options.
    ///
    /// Initial weights are drawn from `[0, input * sqrt(2 / input))`. When
    /// `min_hidden` is set, connections are split until the floor is met or no
    /// connection is left to split.
    #[must_use]
    pub fn with_options<R: Rng>(
        input: usize,
        output: usize,
        options: NetworkOptions,
        rng: &mut R,
    ) -> Self {
        let mut net = Self::bare(input, output, options.seed);
        net.dropout = options.dropout;
        net.enforce_acyclic = options.enforce_acyclic;

        for i in 0..input {
            net.push_node(Node::input(input_gene_id(i)));
        }
        for j in 0..output {
            net.push_node(Node::random(
                NodeKind::Output,
                output_gene_id(input, j),
                Activation::Logistic,
                rng,
            ));
        }

        let scale = if input > 0 {
            input as f64 * (2.0 / input as f64).sqrt()
        } else {
            0.0
        };
        for i in 0..input {
            for j in 0..output {
                let from = net.order[i];
                let to = net.order[input + j];
                let weight = rng.random::<f64>() * scale;
                // Fresh inputs and outputs cannot collide or point backwards.
                let _ = net.connect(from, to, weight);
            }
        }

        while net.hidden_count() < options.min_hidden {
            if !net.mutate(Mutation::AddNode, rng) {
                break;
            }
        }

        net
    }

    /// Build an all-to-all layered network, e.g. `&[2, 4, 1]`.
    ///
    /// Hidden layers use the logistic squash; weights and biases start small.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidOption`] when fewer than two layers are given.
    pub fn perceptron<R: Rng>(layers: &[usize], rng: &mut R) -> Result<Self> {
        if layers.len() < 2 {
            return Err(NetworkError::InvalidOption(
                "a perceptron needs an input and an output layer".into(),
            ));
        }
        let input = layers[0];
        let output = layers[layers.len() - 1];
        let mut net = Self::bare(input, output, DEFAULT_SEED);

        let mut previous: Vec<NodeId> = (0..input)
            .map(|i| net.push_node(Node::input(input_gene_id(i))))
            .collect();

        for (layer, &size) in layers.iter().enumerate().skip(1) {
            let is_output = layer == layers.len() - 1;
            let current: Vec<NodeId> = (0..size)
                .map(|j| {
                    let (kind, gene) = if is_output {
                        (NodeKind::Output, output_gene_id(input, j))
                    } else {
                        (NodeKind::Hidden, layer_gene_id(layer, j))
                    };
                    net.push_node(Node::random(kind, gene, Activation::Logistic, rng))
                })
                .collect();
            for &from in &previous {
                for &to in &current {
                    let weight = small_random(rng);
                    let _ = net.connect(from, to, weight);
                }
            }
            previous = current;
        }

        Ok(net)
    }

    /// An empty network with the given shape; nodes are pushed by the caller.
    pub(crate) fn bare(input: usize, output: usize, seed: u64) -> Self {
        Self {
            input,
            output,
            nodes: SlotMap::with_key(),
            order: Vec::new(),
            positions: SecondaryMap::new(),
            connections: SlotMap::with_key(),
            edges: Vec::new(),
            self_connections: Vec::new(),
            gates: Vec::new(),
            dropout: 0.0,
            score: None,
            mutation: MutationConfig::default(),
            training_step: 0,
            enforce_acyclic: false,
            pruning: None,
            prune_baseline: None,
            cache: DerivedCache::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Append a node at the end of the list order.
    pub(crate) fn push_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.insert(node);
        self.positions.insert(id, self.order.len());
        self.order.push(id);
        self.cache.invalidate();
        id
    }

    /// Insert a node at list position `position`.
    pub(crate) fn insert_node(&mut self, position: usize, node: Node) -> NodeId {
        let id = self.nodes.insert(node);
        self.order.insert(position.min(self.order.len()), id);
        self.reindex();
        self.cache.invalidate();
        id
    }

    fn reindex(&mut self) {
        self.positions.clear();
        for (i, &id) in self.order.iter().enumerate() {
            self.positions.insert(id, i);
        }
    }

    /// Number of input nodes.
    #[must_use]
    pub fn input_size(&self) -> usize {
        self.input
    }

    /// Number of output nodes.
    #[must_use]
    pub fn output_size(&self) -> usize {
        self.output
    }

    /// Total number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// Number of hidden nodes.
    #[must_use]
    pub fn hidden_count(&self) -> usize {
        self.order.len().saturating_sub(self.input + self.output)
    }

    /// Number of regular (non-self) connections, enabled or not.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of enabled regular connections.
    #[must_use]
    pub fn enabled_connection_count(&self) -> usize {
        self.edges
            .iter()
            .filter(|&&c| self.connections[c].enabled)
            .count()
    }

    /// Number of self-connections.
    #[must_use]
    pub fn self_connection_count(&self) -> usize {
        self.self_connections.len()
    }

    /// Number of gated connections.
    #[must_use]
    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    /// Node ids in list order.
    #[must_use]
    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    /// Ids of the hidden nodes in list order.
    #[must_use]
    pub fn hidden_ids(&self) -> Vec<NodeId> {
        let end = self.order.len().saturating_sub(self.output);
        self.order[self.input.min(end)..end].to_vec()
    }

    /// Regular connection ids in creation order.
    #[must_use]
    pub fn connection_ids(&self) -> &[ConnectionId] {
        &self.edges
    }

    /// Self-connection ids in creation order.
    #[must_use]
    pub fn self_connection_ids(&self) -> &[ConnectionId] {
        &self.self_connections
    }

    /// Ids of gated connections in gating order.
    #[must_use]
    pub fn gate_ids(&self) -> &[ConnectionId] {
        &self.gates
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Mutable access to a node's parameters.
    ///
    /// Topology lists are crate-private, so this cannot break graph
    /// invariants; it does drop the packed fast path.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.cache.invalidate_params();
        self.nodes.get_mut(id)
    }

    /// Look up a connection.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Mutable access to a connection's parameters.
    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        // `enabled` is reachable here and changes the executable topology
        self.cache.invalidate();
        self.connections.get_mut(id)
    }

    /// List position of a node.
    #[must_use]
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Node at a list position.
    #[must_use]
    pub fn node_at(&self, position: usize) -> Option<NodeId> {
        self.order.get(position).copied()
    }

    /// The regular connection from `from` to `to`, if any.
    #[must_use]
    pub fn connection_between(&self, from: NodeId, to: NodeId) -> Option<ConnectionId> {
        if from == to {
            return self.nodes.get(from).and_then(|n| n.self_connection);
        }
        self.nodes
            .get(from)?
            .outgoing
            .iter()
            .copied()
            .find(|&c| self.connections[c].to == to)
    }

    /// Whether `from` already projects a connection onto `to`.
    #[must_use]
    pub fn is_projecting_to(&self, from: NodeId, to: NodeId) -> bool {
        self.connection_between(from, to).is_some()
    }

    /// Whether connect-time acyclic enforcement is active.
    #[must_use]
    pub fn enforces_acyclic(&self) -> bool {
        self.enforce_acyclic
    }

    /// Turn acyclic enforcement on or off.
    ///
    /// Enabling it removes every self-connection and every connection whose
    /// target does not come after its source in list order.
    pub fn set_enforce_acyclic(&mut self, enforce: bool) {
        self.enforce_acyclic = enforce;
        if !enforce {
            return;
        }
        let violating = GraphTopology::structural(self).backward_edges();
        if !violating.is_empty() {
            debug!(
                "acyclic enforcement removed {} recurrent connections",
                violating.len()
            );
        }
        for c in violating {
            self.remove_connection(c);
        }
    }

    /// Number of training iterations run so far.
    #[must_use]
    pub fn training_step(&self) -> u64 {
        self.training_step
    }

    /// Reseed the stream used by dropout, DropConnect, noise and shuffling.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Connect two nodes.
    ///
    /// A connection from a node to itself becomes its self-connection.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::UnknownNode`] if either node is not in this network
    /// - [`NetworkError::InputTarget`] if `to` is an input node
    /// - [`NetworkError::AcyclicViolation`] if acyclic enforcement is on and
    ///   `to` does not come after `from`
    /// - [`NetworkError::DuplicateConnection`] if the edge already exists
    pub fn connect(&mut self, from: NodeId, to: NodeId, weight: f64) -> Result<ConnectionId> {
        let from_pos = self.position(from).ok_or(NetworkError::UnknownNode)?;
        let to_pos = self.position(to).ok_or(NetworkError::UnknownNode)?;

        if self.nodes[to].kind == NodeKind::Input {
            return Err(NetworkError::InputTarget);
        }
        if self.enforce_acyclic && from_pos >= to_pos {
            return Err(NetworkError::AcyclicViolation {
                from: from_pos,
                to: to_pos,
            });
        }
        if self.is_projecting_to(from, to) {
            return Err(NetworkError::DuplicateConnection);
        }

        let innovation = connection_innovation(self.nodes[from].gene_id, self.nodes[to].gene_id);
        let id = self
            .connections
            .insert(Connection::new(from, to, weight, innovation));

        if from == to {
            self.nodes[from].self_connection = Some(id);
            self.self_connections.push(id);
        } else {
            self.nodes[from].outgoing.push(id);
            self.nodes[to].incoming.push(id);
            self.edges.push(id);
        }

        self.cache.invalidate();
        Ok(id)
    }

    /// Remove the connection from `from` to `to`, ungating it first.
    ///
    /// Returns `false` when no such connection exists.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> bool {
        match self.connection_between(from, to) {
            Some(id) => self.remove_connection(id),
            None => false,
        }
    }

    /// Remove a connection by id, ungating it first.
    pub fn remove_connection(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.get(id) else {
            return false;
        };
        if conn.gater.is_some() {
            self.ungate(id);
        }

        let (from, to) = (self.connections[id].from, self.connections[id].to);
        if from == to {
            if let Some(node) = self.nodes.get_mut(from) {
                node.self_connection = None;
            }
            self.self_connections.retain(|&c| c != id);
        } else {
            if let Some(node) = self.nodes.get_mut(from) {
                node.outgoing.retain(|&c| c != id);
            }
            if let Some(node) = self.nodes.get_mut(to) {
                node.incoming.retain(|&c| c != id);
            }
            self.edges.retain(|&c| c != id);
        }

        self.connections.remove(id);
        self.cache.invalidate();
        true
    }

    /// Enable or disable a connection.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::UnknownConnection`] if the id is not in this network.
    pub fn set_enabled(&mut self, id: ConnectionId, enabled: bool) -> Result<()> {
        let conn = self
            .connections
            .get_mut(id)
            .ok_or(NetworkError::UnknownConnection)?;
        conn.enabled = enabled;
        self.cache.invalidate();
        Ok(())
    }

    /// Let `gater` modulate `connection`.
    ///
    /// Returns `Ok(false)` and logs a warning if the connection is already gated.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::UnknownNode`] if the gater is not part of this network
    /// - [`NetworkError::UnknownConnection`] if the connection is not
    pub fn gate(&mut self, gater: NodeId, connection: ConnectionId) -> Result<bool> {
        if !self.nodes.contains_key(gater) {
            return Err(NetworkError::UnknownNode);
        }
        let conn = self
            .connections
            .get_mut(connection)
            .ok_or(NetworkError::UnknownConnection)?;
        if conn.gater.is_some() {
            warn!("connection is already gated");
            return Ok(false);
        }
        conn.gater = Some(gater);
        self.nodes[gater].gated.push(connection);
        self.gates.push(connection);
        self.cache.invalidate();
        Ok(true)
    }

    /// Remove the gate from a connection.
    ///
    /// Returns `false` and logs a warning if the connection is not gated.
    pub fn ungate(&mut self, connection: ConnectionId) -> bool {
        let Some(conn) = self.connections.get_mut(connection) else {
            warn!("cannot ungate a connection that is not part of this network");
            return false;
        };
        let Some(gater) = conn.gater.take() else {
            warn!("connection is not gated");
            return false;
        };
        conn.gain = 1.0;
        let target = conn.to;
        if let Some(node) = self.nodes.get_mut(gater) {
            node.gated.retain(|&c| c != connection);
        }
        // the gater no longer influences the old target unless it still
        // gates another connection into it
        let still_gated = self.nodes.get(gater).is_some_and(|node| {
            node.gated
                .iter()
                .any(|&c| self.connections.get(c).is_some_and(|g| g.to == target))
        });
        if !still_gated {
            if let Some(node) = self.nodes.get(gater) {
                for &c in &node.incoming {
                    if let Some(incoming) = self.connections.get_mut(c) {
                        incoming.xtrace.retain(|&(influenced, _)| influenced != target);
                    }
                }
            }
        }
        self.gates.retain(|&c| c != connection);
        self.cache.invalidate();
        true
    }

    /// Remove a hidden node and repair connectivity around it.
    ///
    /// Every predecessor is bridged to every successor it does not already
    /// reach, with the product of the two removed weights. Gates held on the
    /// removed node's connections move to random bridges when
    /// [`MutationConfig::keep_gates`] is set; gates the node itself held are
    /// dropped. Bridges that would violate acyclic enforcement are skipped.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::UnknownNode`] if the node is not in this network
    /// - [`NetworkError::NotHidden`] for input and output nodes
    pub fn remove_node<R: Rng>(&mut self, id: NodeId, rng: &mut R) -> Result<()> {
        let node = self.nodes.get(id).ok_or(NetworkError::UnknownNode)?;
        if node.kind != NodeKind::Hidden {
            return Err(NetworkError::NotHidden);
        }
        let self_connection = node.self_connection;
        let keep_gates = self.mutation.keep_gates;

        if let Some(self_conn) = self_connection {
            self.remove_connection(self_conn);
        }

        let mut gaters = Vec::new();

        let incoming = self.nodes[id].incoming.clone();
        let mut sources = Vec::with_capacity(incoming.len());
        for &c in incoming.iter().rev() {
            let conn = &self.connections[c];
            if let Some(g) = conn.gater.filter(|&g| keep_gates && g != id) {
                gaters.push(g);
            }
            sources.push((conn.from, conn.weight));
            self.remove_connection(c);
        }

        let outgoing = self.nodes[id].outgoing.clone();
        let mut targets = Vec::with_capacity(outgoing.len());
        for &c in outgoing.iter().rev() {
            let conn = &self.connections[c];
            if let Some(g) = conn.gater.filter(|&g| keep_gates && g != id) {
                gaters.push(g);
            }
            targets.push((conn.to, conn.weight));
            self.remove_connection(c);
        }

        let mut bridges = Vec::new();
        for &(src, w_in) in &sources {
            for &(dst, w_out) in &targets {
                if src == dst || self.is_projecting_to(src, dst) {
                    continue;
                }
                if let Ok(c) = self.connect(src, dst, w_in * w_out) {
                    bridges.push(c);
                }
            }
        }

        for gater in gaters {
            if bridges.is_empty() {
                break;
            }
            let pick = bridges.remove(rng.random_range(0..bridges.len()));
            self.gate(gater, pick)?;
        }

        for c in self.nodes[id].gated.clone().into_iter().rev() {
            self.ungate(c);
        }

        let pos = self.positions[id];
        self.order.remove(pos);
        self.nodes.remove(id);
        self.reindex();
        self.cache.invalidate();
        Ok(())
    }

    /// Reset activations, states, traces and error signals.
    pub fn clear(&mut self) {
        for (_, node) in &mut self.nodes {
            node.clear();
        }
        for (_, conn) in &mut self.connections {
            conn.eligibility = 0.0;
            conn.xtrace.clear();
            if conn.gater.is_some() {
                conn.gain = 0.0;
            }
        }
        self.cache.invalidate_params();
    }

    /// Topological order of the enabled graph, or `None` if it has a cycle.
    ///
    /// Self-connections count as cycles. The order is cached until the next
    /// structural edit.
    pub fn topological_order(&mut self) -> Option<&[NodeId]> {
        if self.cache.topo.is_none() {
            let topo = GraphTopology::from_network(self);
            let order: Option<Vec<NodeId>> = topo
                .topological_order()
                .map(|idx| idx.into_iter().filter_map(|i| topo.node_id(i)).collect());
            self.cache.topo = Some(order);
        }
        self.cache.topo.as_ref().and_then(|o| o.as_deref())
    }

    /// Whether the enabled graph is free of cycles.
    pub fn is_acyclic(&mut self) -> bool {
        self.topological_order().is_some()
    }

    /// A gene id not yet used by any node, starting from `candidate`.
    pub(crate) fn unique_gene_id(&self, candidate: u64) -> u64 {
        let mut gene = candidate;
        let mut attempt = 0;
        while self.nodes.values().any(|n| n.gene_id == gene) {
            attempt += 1;
            gene = resalt(candidate, attempt);
        }
        gene
    }

    /// All connection ids: regular first, then self-connections.
    pub(crate) fn all_connection_ids(&self) -> Vec<ConnectionId> {
        self.edges
            .iter()
            .chain(self.self_connections.iter())
            .copied()
            .collect()
    }

    /// Run `f` with the network-owned random stream borrowed out.
    pub(crate) fn with_rng<T>(&mut self, f: impl FnOnce(&mut Self, &mut ChaCha8Rng) -> T) -> T {
        let mut rng = std::mem::replace(&mut self.rng, ChaCha8Rng::seed_from_u64(0));
        let result = f(self, &mut rng);
        self.rng = rng;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn test_new_network_layout() {
        let mut rng = test_rng();
        let net = Network::new(3, 2, &mut rng);

        assert_eq!(net.node_count(), 5);
        assert_eq!(net.connection_count(), 6);
        assert_eq!(net.hidden_count(), 0);
        for (i, &id) in net.node_ids().iter().enumerate() {
            let kind = net.node(id).unwrap().kind;
            if i < 3 {
                assert_eq!(kind, NodeKind::Input);
            } else {
                assert_eq!(kind, NodeKind::Output);
            }
            assert_eq!(net.position(id), Some(i));
        }
    }

    #[test]
    fn test_min_hidden_floor() {
        let mut rng = test_rng();
        let options = NetworkOptions {
            min_hidden: 3,
            ..Default::default()
        };
        let net = Network::with_options(2, 1, options, &mut rng);
        assert_eq!(net.hidden_count(), 3);
        // hidden nodes stay between inputs and outputs
        let last = *net.node_ids().last().unwrap();
        assert_eq!(net.node(last).unwrap().kind, NodeKind::Output);
    }

    #[test]
    fn test_perceptron_shape() {
        let mut rng = test_rng();
        let net = Network::perceptron(&[2, 4, 3, 1], &mut rng).unwrap();
        assert_eq!(net.node_count(), 10);
        assert_eq!(net.hidden_count(), 7);
        assert_eq!(net.connection_count(), 2 * 4 + 4 * 3 + 3);
        assert!(Network::perceptron(&[2], &mut rng).is_err());
    }

    #[test]
    fn test_connect_rejects_duplicates_and_inputs() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        let a = net.node_at(0).unwrap();
        let b = net.node_at(1).unwrap();
        let out = net.node_at(2).unwrap();

        assert_eq!(
            net.connect(a, out, 0.5),
            Err(NetworkError::DuplicateConnection)
        );
        assert_eq!(net.connect(out, a, 0.5), Err(NetworkError::InputTarget));
        assert_eq!(net.connect(a, b, 0.5), Err(NetworkError::InputTarget));
    }

    #[test]
    fn test_self_connection_is_separate() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 1, &mut rng);
        let out = net.node_at(1).unwrap();

        let id = net.connect(out, out, 0.7).unwrap();
        assert_eq!(net.self_connection_count(), 1);
        assert_eq!(net.connection_count(), 1);
        assert_eq!(net.node(out).unwrap().self_connection(), Some(id));
        assert_eq!(
            net.connect(out, out, 0.1),
            Err(NetworkError::DuplicateConnection)
        );

        assert!(net.disconnect(out, out));
        assert_eq!(net.self_connection_count(), 0);
        assert!(!net.disconnect(out, out));
    }

    #[test]
    fn test_acyclic_rejects_backward_edges() {
        let mut rng = test_rng();
        let mut net = Network::with_options(1, 2, NetworkOptions::feedforward(), &mut rng);
        let o1 = net.node_at(1).unwrap();
        let o2 = net.node_at(2).unwrap();

        assert!(net.connect(o1, o2, 0.3).is_ok());
        assert_eq!(
            net.connect(o2, o1, 0.3),
            Err(NetworkError::AcyclicViolation { from: 2, to: 1 })
        );
        assert!(matches!(
            net.connect(o1, o1, 0.3),
            Err(NetworkError::AcyclicViolation { .. })
        ));
    }

    #[test]
    fn test_enabling_acyclic_drops_recurrence() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 2, &mut rng);
        let o1 = net.node_at(1).unwrap();
        let o2 = net.node_at(2).unwrap();
        net.connect(o2, o1, 0.3).unwrap();
        net.connect(o1, o1, 0.3).unwrap();
        assert!(!net.is_acyclic());

        net.set_enforce_acyclic(true);
        assert_eq!(net.self_connection_count(), 0);
        assert!(!net.is_projecting_to(o2, o1));
        assert!(net.is_acyclic());
    }

    #[test]
    fn test_gate_and_ungate() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        let gater = net.node_at(1).unwrap();
        let conn = net.connection_ids()[0];

        assert_eq!(net.gate(gater, conn), Ok(true));
        assert_eq!(net.gate(gater, conn), Ok(false));
        assert_eq!(net.gate_count(), 1);
        assert_eq!(net.node(gater).unwrap().gated(), &[conn]);

        assert!(net.ungate(conn));
        assert!(!net.ungate(conn));
        assert_eq!(net.gate_count(), 0);
        assert!(net.node(gater).unwrap().gated().is_empty());
    }

    #[test]
    fn test_ungate_drops_extended_traces() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        let a = net.node_at(0).unwrap();
        let b = net.node_at(1).unwrap();
        let out = net.node_at(2).unwrap();
        let conn = net.connection_between(a, out).unwrap();
        let b_out = net.connection_between(b, out).unwrap();
        let gater = net.add_node(b_out, &mut rng).unwrap();
        net.gate(gater, conn).unwrap();
        let feed = net.connection_between(b, gater).unwrap();

        net.activate(&[1.0, 1.0], true).unwrap();
        assert_eq!(net.connection(feed).unwrap().xtrace.len(), 1);

        assert!(net.ungate(conn));
        assert!(net.connection(feed).unwrap().xtrace.is_empty());
        net.activate(&[1.0, 1.0], true).unwrap();
        assert!(net.connection(feed).unwrap().xtrace.is_empty());
    }

    #[test]
    fn test_enabling_acyclic_drops_disabled_recurrence() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 2, &mut rng);
        let o1 = net.node_at(1).unwrap();
        let o2 = net.node_at(2).unwrap();
        let back = net.connect(o2, o1, 0.3).unwrap();
        net.set_enabled(back, false).unwrap();

        net.set_enforce_acyclic(true);
        assert!(net.connection(back).is_none());
        assert!(net.set_enabled(back, true).is_err());
    }

    #[test]
    fn test_gate_with_stale_node_fails() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        let stale = net.nodes.insert(Node::input(77));
        net.nodes.remove(stale);

        let conn = net.connection_ids()[0];
        assert_eq!(net.gate(stale, conn), Err(NetworkError::UnknownNode));
    }

    #[test]
    fn test_disconnect_ungates() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        let a = net.node_at(0).unwrap();
        let out = net.node_at(2).unwrap();
        let conn = net.connection_between(a, out).unwrap();
        net.gate(out, conn).unwrap();

        assert!(net.disconnect(a, out));
        assert_eq!(net.gate_count(), 0);
        assert!(net.node(out).unwrap().gated().is_empty());
        assert!(net.node(a).unwrap().outgoing().is_empty());
    }

    #[test]
    fn test_remove_node_bridges_neighbours() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 1, &mut rng);
        let input = net.node_at(0).unwrap();
        let out = net.node_at(1).unwrap();
        let conn = net.connection_ids()[0];
        let hidden = net.add_node(conn, &mut rng).unwrap();
        assert!(!net.is_projecting_to(input, out));

        net.remove_node(hidden, &mut rng).unwrap();
        assert_eq!(net.node_count(), 2);
        assert!(net.is_projecting_to(input, out));
        assert_eq!(net.remove_node(out, &mut rng), Err(NetworkError::NotHidden));
    }

    #[test]
    fn test_remove_node_moves_gates_to_bridges() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        let a = net.node_at(0).unwrap();
        let out = net.node_at(2).unwrap();
        let conn = net.connection_between(a, out).unwrap();
        let hidden = net.add_node(conn, &mut rng).unwrap();
        let into_hidden = net.connection_between(a, hidden).unwrap();
        net.gate(out, into_hidden).unwrap();

        net.remove_node(hidden, &mut rng).unwrap();
        let bridge = net.connection_between(a, out).unwrap();
        assert_eq!(net.connection(bridge).unwrap().gater(), Some(out));
        assert_eq!(net.gate_ids(), &[bridge]);
    }

    #[test]
    fn test_topological_order_detects_cycles() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        assert_eq!(net.topological_order().map(<[NodeId]>::len), Some(3));

        let out = net.node_at(2).unwrap();
        net.connect(out, out, 0.5).unwrap();
        assert!(net.topological_order().is_none());
    }

    #[test]
    fn test_unique_gene_id_resalts() {
        let mut rng = test_rng();
        let net = Network::new(2, 1, &mut rng);
        let taken = net.node(net.node_at(0).unwrap()).unwrap().gene_id;
        assert_ne!(net.unique_gene_id(taken), taken);
        assert_eq!(net.unique_gene_id(123_456_789), 123_456_789);
    }
}
