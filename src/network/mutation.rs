//! Structural and parametric mutation operators.
//!
//! Every operator either applies one change and returns `true`, or finds no
//! eligible target, logs a warning and returns `false`. Under acyclic
//! enforcement, operators that can only create recurrence are no-ops and the
//! rest draw only from candidates that keep the graph feedforward.

use log::warn;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use symbios_genetics::Genotype;

use super::Network;
use crate::activation::Activation;
use crate::gene::{small_random, ConnectionId, Node, NodeId, NodeKind};
use crate::innovation::node_split_innovation;

/// Upper bound on operators applied by one [`Genotype::mutate`] call.
pub const MAX_OPERATORS_PER_CALL: usize = 256;

/// A mutation operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mutation {
    /// Split a connection with a new hidden node.
    AddNode,
    /// Remove a random hidden node, bridging around it.
    SubNode,
    /// Add a forward connection.
    AddConn,
    /// Remove a redundant forward connection.
    SubConn,
    /// Perturb one weight.
    ModWeight,
    /// Perturb one bias.
    ModBias,
    /// Change one node's squash.
    ModActivation,
    /// Add a self-connection.
    AddSelfConn,
    /// Remove a self-connection.
    SubSelfConn,
    /// Gate an ungated connection.
    AddGate,
    /// Remove a gate.
    SubGate,
    /// Add a recurrent connection.
    AddBackConn,
    /// Remove a redundant recurrent connection.
    SubBackConn,
    /// Swap bias and squash between two nodes.
    SwapNodes,
}

impl Mutation {
    /// Every operator.
    pub const ALL: [Self; 14] = [
        Self::AddNode,
        Self::SubNode,
        Self::AddConn,
        Self::SubConn,
        Self::ModWeight,
        Self::ModBias,
        Self::ModActivation,
        Self::AddSelfConn,
        Self::SubSelfConn,
        Self::AddGate,
        Self::SubGate,
        Self::AddBackConn,
        Self::SubBackConn,
        Self::SwapNodes,
    ];

    /// Operators that never introduce recurrence.
    pub const FFW: [Self; 8] = [
        Self::AddNode,
        Self::SubNode,
        Self::AddConn,
        Self::SubConn,
        Self::ModWeight,
        Self::ModBias,
        Self::ModActivation,
        Self::SwapNodes,
    ];
}

/// Bounds and switches used by the mutation operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationConfig {
    /// Lower bound of a weight perturbation.
    pub weight_min: f64,
    /// Upper bound of a weight perturbation.
    pub weight_max: f64,
    /// Lower bound of a bias perturbation.
    pub bias_min: f64,
    /// Upper bound of a bias perturbation.
    pub bias_max: f64,
    /// Squash functions available to `ModActivation` and new hidden nodes.
    pub allowed_activations: Vec<Activation>,
    /// Whether `ModActivation` and `SwapNodes` may touch output nodes.
    pub mutate_output: bool,
    /// Whether node removal moves gates onto the bridging connections.
    pub keep_gates: bool,
    /// Chance that crossover re-enables a gene disabled in either parent.
    pub reenable_probability: f64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            weight_min: -1.0,
            weight_max: 1.0,
            bias_min: -1.0,
            bias_max: 1.0,
            allowed_activations: Activation::ALL.to_vec(),
            mutate_output: true,
            keep_gates: true,
            reenable_probability: 0.25,
        }
    }
}

/// Uniform draw in `[min, max)`, or `min` for an empty range.
fn uniform<R: Rng>(rng: &mut R, min: f64, max: f64) -> f64 {
    if max > min {
        rng.random_range(min..max)
    } else {
        min
    }
}

impl Network {
    /// Apply one mutation operator.
    ///
    /// Returns `false` when the operator found nothing to change.
    pub fn mutate<R: Rng>(&mut self, method: Mutation, rng: &mut R) -> bool {
        let applied = match method {
            Mutation::AddNode => self.mutate_add_node(rng),
            Mutation::SubNode => self.mutate_sub_node(rng),
            Mutation::AddConn => self.mutate_add_conn(rng),
            Mutation::SubConn => self.mutate_sub_conn(rng, false),
            Mutation::ModWeight => self.mutate_mod_weight(rng),
            Mutation::ModBias => self.mutate_mod_bias(rng),
            Mutation::ModActivation => self.mutate_mod_activation(rng),
            Mutation::AddSelfConn => self.mutate_add_self_conn(rng),
            Mutation::SubSelfConn => self.mutate_sub_self_conn(rng),
            Mutation::AddGate => self.mutate_add_gate(rng),
            Mutation::SubGate => self.mutate_sub_gate(rng),
            Mutation::AddBackConn => self.mutate_add_back_conn(rng),
            Mutation::SubBackConn => self.mutate_sub_conn(rng, true),
            Mutation::SwapNodes => self.mutate_swap_nodes(rng),
        };
        if !applied {
            warn!("{:?} found no eligible target", method);
        }
        applied
    }

    /// Split `connection` with a new hidden node.
    ///
    /// The connection is removed; `from -> new` gets weight 1 and `new -> to`
    /// keeps the old weight, so the signal path is preserved. The node is
    /// placed just before the target, but never inside the output block. A
    /// gate on the split connection moves to one of the two halves.
    pub fn add_node<R: Rng>(&mut self, connection: ConnectionId, rng: &mut R) -> Option<NodeId> {
        let conn = self.connections.get(connection)?;
        if conn.is_self() {
            return None;
        }
        let (from, to, weight, gater, innovation) =
            (conn.from, conn.to, conn.weight, conn.gater, conn.innovation);

        let out_start = self.order.len() - self.output_size();
        let insert_at = self.positions[to].min(out_start);
        if self.enforce_acyclic && insert_at <= self.positions[from] {
            return None;
        }

        self.remove_connection(connection);

        let gene = self.unique_gene_id(node_split_innovation(innovation));
        let squash = self
            .mutation
            .allowed_activations
            .choose(rng)
            .copied()
            .unwrap_or_default();
        let id = self.insert_node(insert_at, Node::random(NodeKind::Hidden, gene, squash, rng));

        let first = self.connect(from, id, 1.0).ok()?;
        let second = self.connect(id, to, weight).ok()?;
        if let Some(g) = gater {
            let target = if rng.random::<bool>() { first } else { second };
            let _ = self.gate(g, target);
        }
        Some(id)
    }

    fn mutate_add_node<R: Rng>(&mut self, rng: &mut R) -> bool {
        let out_start = self.order.len() - self.output_size();
        let candidates: Vec<ConnectionId> = self
            .edges
            .iter()
            .copied()
            .filter(|&c| {
                let conn = &self.connections[c];
                !self.enforce_acyclic
                    || self.positions[conn.to].min(out_start) > self.positions[conn.from]
            })
            .collect();
        match candidates.choose(rng) {
            Some(&c) => self.add_node(c, rng).is_some(),
            None => false,
        }
    }

    fn mutate_sub_node<R: Rng>(&mut self, rng: &mut R) -> bool {
        let hidden = self.hidden_ids();
        match hidden.choose(rng) {
            Some(&id) => self.remove_node(id, rng).is_ok(),
            None => false,
        }
    }

    /// Unconnected forward pairs `(i, j)` with `i` outside the output block and
    /// `j` past both `i` and the input block.
    pub(crate) fn forward_pairs(&self) -> Vec<(NodeId, NodeId)> {
        let len = self.order.len();
        let mut pairs = Vec::new();
        for i in 0..len - self.output_size() {
            for j in (i + 1).max(self.input_size())..len {
                let (a, b) = (self.order[i], self.order[j]);
                if !self.is_projecting_to(a, b) {
                    pairs.push((a, b));
                }
            }
        }
        pairs
    }

    fn mutate_add_conn<R: Rng>(&mut self, rng: &mut R) -> bool {
        let pairs = self.forward_pairs();
        match pairs.choose(rng) {
            Some(&(from, to)) => self.connect(from, to, small_random(rng)).is_ok(),
            None => false,
        }
    }

    /// Remove a connection whose endpoints stay connected elsewhere.
    fn mutate_sub_conn<R: Rng>(&mut self, rng: &mut R, backward: bool) -> bool {
        let candidates: Vec<ConnectionId> = self
            .edges
            .iter()
            .copied()
            .filter(|&c| {
                let conn = &self.connections[c];
                let (from_pos, to_pos) = (self.positions[conn.from], self.positions[conn.to]);
                let directed = if backward {
                    from_pos > to_pos
                } else {
                    to_pos > from_pos
                };
                self.nodes[conn.from].outgoing.len() > 1
                    && self.nodes[conn.to].incoming.len() > 1
                    && directed
            })
            .collect();
        match candidates.choose(rng) {
            Some(&c) => self.remove_connection(c),
            None => false,
        }
    }

    fn mutate_mod_weight<R: Rng>(&mut self, rng: &mut R) -> bool {
        let all = self.all_connection_ids();
        let Some(&c) = all.choose(rng) else {
            return false;
        };
        let delta = uniform(rng, self.mutation.weight_min, self.mutation.weight_max);
        self.connections[c].weight += delta;
        self.cache.invalidate_params();
        true
    }

    fn mutate_mod_bias<R: Rng>(&mut self, rng: &mut R) -> bool {
        let len = self.order.len();
        if len <= self.input_size() {
            return false;
        }
        let id = self.order[rng.random_range(self.input_size()..len)];
        let delta = uniform(rng, self.mutation.bias_min, self.mutation.bias_max);
        self.nodes[id].bias += delta;
        self.cache.invalidate_params();
        true
    }

    /// End of the node range open to `ModActivation` and `SwapNodes`.
    fn mutable_node_end(&self) -> usize {
        if self.mutation.mutate_output {
            self.order.len()
        } else {
            self.order.len() - self.output_size()
        }
    }

    fn mutate_mod_activation<R: Rng>(&mut self, rng: &mut R) -> bool {
        let end = self.mutable_node_end();
        let allowed = &self.mutation.allowed_activations;
        if end <= self.input_size() || allowed.is_empty() {
            return false;
        }
        let id = self.order[rng.random_range(self.input_size()..end)];
        let current = self.nodes[id].squash;

        let next = match allowed.iter().position(|&a| a == current) {
            Some(_) if allowed.len() == 1 => return false,
            Some(idx) => allowed[(idx + rng.random_range(1..allowed.len())) % allowed.len()],
            None => allowed[rng.random_range(0..allowed.len())],
        };
        self.nodes[id].squash = next;
        self.cache.invalidate_params();
        true
    }

    fn mutate_add_self_conn<R: Rng>(&mut self, rng: &mut R) -> bool {
        if self.enforce_acyclic {
            return false;
        }
        let candidates: Vec<NodeId> = self.order[self.input_size()..]
            .iter()
            .copied()
            .filter(|&id| self.nodes[id].self_connection.is_none())
            .collect();
        match candidates.choose(rng) {
            Some(&id) => self.connect(id, id, small_random(rng)).is_ok(),
            None => false,
        }
    }

    fn mutate_sub_self_conn<R: Rng>(&mut self, rng: &mut R) -> bool {
        match self.self_connections.clone().choose(rng) {
            Some(&c) => self.remove_connection(c),
            None => false,
        }
    }

    fn mutate_add_gate<R: Rng>(&mut self, rng: &mut R) -> bool {
        let input = self.input_size();
        let candidates: Vec<ConnectionId> = self
            .all_connection_ids()
            .into_iter()
            .filter(|&c| {
                let conn = &self.connections[c];
                // under enforcement the gater must fire before the gated target
                conn.gater.is_none() && (!self.enforce_acyclic || self.positions[conn.to] > input)
            })
            .collect();
        let Some(&c) = candidates.choose(rng) else {
            return false;
        };
        let upper = if self.enforce_acyclic {
            self.positions[self.connections[c].to]
        } else {
            self.order.len()
        };
        if upper <= input {
            return false;
        }
        let gater = self.order[rng.random_range(input..upper)];
        self.gate(gater, c).unwrap_or(false)
    }

    fn mutate_sub_gate<R: Rng>(&mut self, rng: &mut R) -> bool {
        match self.gates.clone().choose(rng) {
            Some(&c) => self.ungate(c),
            None => false,
        }
    }

    fn mutate_add_back_conn<R: Rng>(&mut self, rng: &mut R) -> bool {
        if self.enforce_acyclic {
            return false;
        }
        let input = self.input_size();
        let mut pairs = Vec::new();
        for i in input..self.order.len() {
            for j in input..i {
                let (a, b) = (self.order[i], self.order[j]);
                if !self.is_projecting_to(a, b) {
                    pairs.push((a, b));
                }
            }
        }
        match pairs.choose(rng) {
            Some(&(from, to)) => self.connect(from, to, small_random(rng)).is_ok(),
            None => false,
        }
    }

    fn mutate_swap_nodes<R: Rng>(&mut self, rng: &mut R) -> bool {
        let input = self.input_size();
        let end = self.mutable_node_end();
        if end < input + 2 {
            return false;
        }
        let a = rng.random_range(input..end);
        let mut b = rng.random_range(input..end - 1);
        if b >= a {
            b += 1;
        }
        let (a, b) = (self.order[a], self.order[b]);

        let (bias_a, squash_a) = (self.nodes[a].bias, self.nodes[a].squash);
        let (bias_b, squash_b) = (self.nodes[b].bias, self.nodes[b].squash);
        self.nodes[a].bias = bias_b;
        self.nodes[a].squash = squash_b;
        self.nodes[b].bias = bias_a;
        self.nodes[b].squash = squash_a;
        self.cache.invalidate_params();
        true
    }
}

impl Genotype for Network {
    /// Apply `rate` random operators: the integer part always, the fractional
    /// part as a probability, at most [`MAX_OPERATORS_PER_CALL`] in total.
    /// Acyclic networks draw from [`Mutation::FFW`].
    fn mutate<R: Rng>(&mut self, rng: &mut R, rate: f32) {
        if !rate.is_finite() || rate <= 0.0 {
            return;
        }
        let whole = (rate.floor() as usize).min(MAX_OPERATORS_PER_CALL);
        let extra = usize::from(rng.random::<f32>() < rate.fract());
        let pool: &[Mutation] = if self.enforce_acyclic {
            &Mutation::FFW
        } else {
            &Mutation::ALL
        };
        for _ in 0..(whole + extra).min(MAX_OPERATORS_PER_CALL) {
            if let Some(&method) = pool.choose(rng) {
                Network::mutate(self, method, rng);
            }
        }
    }

    fn crossover<R: Rng>(&self, other: &Self, rng: &mut R) -> Self {
        match Network::cross_over(self, other, false, rng) {
            Ok(child) => child,
            Err(err) => {
                warn!("crossover failed ({}); cloning the first parent", err);
                self.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkOptions;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn assert_forward(net: &Network) {
        assert_eq!(net.self_connection_count(), 0);
        for &c in net.connection_ids() {
            let conn = net.connection(c).unwrap();
            assert!(net.position(conn.from()) < net.position(conn.to()));
        }
    }

    #[test]
    fn test_add_node_grows_by_one() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        let nodes = net.node_count();
        let conns = net.connection_count();

        assert!(net.mutate(Mutation::AddNode, &mut rng));
        assert_eq!(net.node_count(), nodes + 1);
        assert_eq!(net.connection_count(), conns + 1);
    }

    #[test]
    fn test_add_node_splits_the_only_connection() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 1, &mut rng);
        let input = net.node_at(0).unwrap();
        let out = net.node_at(1).unwrap();
        let original = net.connection_ids()[0];

        assert!(net.mutate(Mutation::AddNode, &mut rng));
        assert_eq!(net.node_count(), 3);
        assert_eq!(net.connection_count(), 2);
        assert!(net.connection(original).is_none());
        assert!(net.connection_between(input, out).is_none());

        let hidden = net.hidden_ids()[0];
        assert!(net.connection_between(input, hidden).is_some());
        assert!(net.connection_between(hidden, out).is_some());
    }

    #[test]
    fn test_add_node_keeps_outputs_last() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 2, &mut rng);
        for _ in 0..5 {
            net.mutate(Mutation::AddNode, &mut rng);
        }
        let ids = net.node_ids();
        for &id in &ids[ids.len() - 2..] {
            assert_eq!(net.node(id).unwrap().kind, NodeKind::Output);
        }
        for &id in &ids[..2] {
            assert_eq!(net.node(id).unwrap().kind, NodeKind::Input);
        }
    }

    #[test]
    fn test_add_node_moves_gate() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 1, &mut rng);
        let out = net.node_at(1).unwrap();
        let conn = net.connection_ids()[0];
        net.gate(out, conn).unwrap();

        net.add_node(conn, &mut rng).unwrap();
        assert_eq!(net.gate_count(), 1);
        let gated = net.gate_ids()[0];
        assert_eq!(net.connection(gated).unwrap().gater(), Some(out));
    }

    #[test]
    fn test_split_gene_ids_are_shared() {
        let mut rng_a = ChaCha8Rng::seed_from_u64(1);
        let mut rng_b = ChaCha8Rng::seed_from_u64(2);
        let mut a = Network::new(2, 1, &mut rng_a);
        let mut b = Network::new(2, 1, &mut rng_b);

        let ca = a.connection_ids()[0];
        let cb = b.connection_ids()[0];
        let na = a.add_node(ca, &mut rng_a).unwrap();
        let nb = b.add_node(cb, &mut rng_b).unwrap();
        assert_eq!(a.node(na).unwrap().gene_id, b.node(nb).unwrap().gene_id);
    }

    #[test]
    fn test_sub_conn_requires_redundancy() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 1, &mut rng);
        assert!(!net.mutate(Mutation::SubConn, &mut rng));

        let mut net = Network::new(2, 2, &mut rng);
        assert!(net.mutate(Mutation::SubConn, &mut rng));
        assert_eq!(net.connection_count(), 3);
    }

    #[test]
    fn test_mod_weight_and_bias_change_values() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 1, &mut rng);
        let conn = net.connection_ids()[0];
        let out = net.node_at(1).unwrap();
        let weight = net.connection(conn).unwrap().weight;
        let bias = net.node(out).unwrap().bias;

        assert!(net.mutate(Mutation::ModWeight, &mut rng));
        assert!(net.mutate(Mutation::ModBias, &mut rng));
        assert_ne!(net.connection(conn).unwrap().weight, weight);
        assert_ne!(net.node(out).unwrap().bias, bias);
    }

    #[test]
    fn test_mod_activation_respects_mutate_output() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        net.mutation.mutate_output = false;
        assert!(!net.mutate(Mutation::ModActivation, &mut rng));

        net.mutation.mutate_output = true;
        let out = net.node_at(2).unwrap();
        assert!(net.mutate(Mutation::ModActivation, &mut rng));
        assert_ne!(net.node(out).unwrap().squash, Activation::Logistic);
    }

    #[test]
    fn test_self_and_back_connections() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 2, &mut rng);
        assert!(net.mutate(Mutation::AddSelfConn, &mut rng));
        assert_eq!(net.self_connection_count(), 1);
        assert!(net.mutate(Mutation::SubSelfConn, &mut rng));
        assert_eq!(net.self_connection_count(), 0);

        assert!(net.mutate(Mutation::AddBackConn, &mut rng));
        let o1 = net.node_at(1).unwrap();
        let o2 = net.node_at(2).unwrap();
        assert!(net.is_projecting_to(o2, o1));
        assert!(!net.mutate(Mutation::AddBackConn, &mut rng));
    }

    #[test]
    fn test_gate_mutations() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        assert!(!net.mutate(Mutation::SubGate, &mut rng));
        assert!(net.mutate(Mutation::AddGate, &mut rng));
        assert_eq!(net.gate_count(), 1);
        assert!(net.mutate(Mutation::SubGate, &mut rng));
        assert_eq!(net.gate_count(), 0);
    }

    #[test]
    fn test_swap_nodes() {
        let mut rng = test_rng();
        let mut net = Network::new(1, 2, &mut rng);
        let o1 = net.node_at(1).unwrap();
        let o2 = net.node_at(2).unwrap();
        let (b1, b2) = (net.node(o1).unwrap().bias, net.node(o2).unwrap().bias);

        assert!(net.mutate(Mutation::SwapNodes, &mut rng));
        assert_eq!(net.node(o1).unwrap().bias, b2);
        assert_eq!(net.node(o2).unwrap().bias, b1);
    }

    #[test]
    fn test_recurrent_operators_are_noops_when_acyclic() {
        let mut rng = test_rng();
        let mut net = Network::with_options(2, 1, NetworkOptions::feedforward(), &mut rng);
        assert!(!net.mutate(Mutation::AddSelfConn, &mut rng));
        assert!(!net.mutate(Mutation::AddBackConn, &mut rng));
        assert_eq!(net.connection_count(), 2);
    }

    #[test]
    fn test_acyclic_holds_under_random_mutation() {
        let mut rng = test_rng();
        let mut net = Network::with_options(3, 2, NetworkOptions::feedforward(), &mut rng);
        for _ in 0..300 {
            let method = *Mutation::ALL.choose(&mut rng).unwrap();
            net.mutate(method, &mut rng);
            assert_forward(&net);
        }
        assert!(net.is_acyclic());
    }

    #[test]
    fn test_genotype_mutate_rate() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        let before = (net.node_count(), net.connection_count());
        Genotype::mutate(&mut net, &mut rng, 0.0);
        assert_eq!((net.node_count(), net.connection_count()), before);

        // a whole-number rate always applies that many operators
        Genotype::mutate(&mut net, &mut rng, 20.0);
        assert!(net.input_size() == 2 && net.output_size() == 1);
    }

    #[test]
    fn test_genotype_mutate_bounds_huge_rates() {
        let mut rng = test_rng();
        let mut net = Network::new(2, 1, &mut rng);
        let before = net.node_count();
        Genotype::mutate(&mut net, &mut rng, 1e20);
        assert!(net.node_count() <= before + MAX_OPERATORS_PER_CALL);
    }
}
