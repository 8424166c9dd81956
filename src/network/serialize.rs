//! Serialized forms.
//!
//! Two forms are supported:
//!
//! - [`CompactGenome`]: a positional tuple of parallel arrays, cheap to ship
//!   to a worker and evaluate there with [`evaluate_serialized`]
//! - [`NetworkJson`]: a structured, versioned document that keeps every
//!   parameter, gene ids and disabled connections, and backs the `serde`
//!   implementation of [`Network`]
//!
//! Node references in both forms are list positions.

use log::warn;
use serde::{Deserialize, Serialize};

use super::Network;
use crate::activation::Activation;
use crate::cost::Cost;
use crate::error::{NetworkError, Result};
use crate::gene::{Node, NodeId, NodeKind};
use crate::innovation::{imported_gene_id, input_gene_id, output_gene_id};
use crate::train::Sample;

/// Version written into [`NetworkJson::format_version`].
pub const FORMAT_VERSION: u32 = 2;

/// One connection in the compact form. Self-connections have `from == to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactConnection {
    /// Source position.
    pub from: usize,
    /// Target position.
    pub to: usize,
    /// Weight.
    pub weight: f64,
    /// Gater position, if gated.
    pub gater: Option<usize>,
}

/// Compact positional form:
/// `(activations, states, squashes, connections, input, output, biases, masks)`.
///
/// The trailing `biases` and `masks` arrays may be absent (empty), in which
/// case biases import as 0 and masks as 1. Disabled connections are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactGenome(
    pub Vec<f64>,
    pub Vec<f64>,
    pub Vec<String>,
    pub Vec<CompactConnection>,
    pub usize,
    pub usize,
    #[serde(default)] pub Vec<f64>,
    #[serde(default)] pub Vec<f64>,
);

/// A node in the structured form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeJson {
    /// Role of the node.
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Bias.
    pub bias: f64,
    /// Squash name.
    pub squash: String,
    /// List position.
    pub index: usize,
    /// Historical marking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene_id: Option<u64>,
    /// Dropout mask.
    #[serde(default = "default_mask")]
    pub mask: f64,
}

/// A connection in the structured form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionJson {
    /// Source position.
    pub from: usize,
    /// Target position.
    pub to: usize,
    /// Weight.
    pub weight: f64,
    /// Gater position, if gated.
    pub gater: Option<usize>,
    /// Disabled connections carry no signal.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Structured form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkJson {
    /// Document version; a mismatch imports on a best-effort basis.
    #[serde(default)]
    pub format_version: Option<u32>,
    /// Input size.
    pub input: usize,
    /// Output size.
    pub output: usize,
    /// Dropout rate.
    #[serde(default)]
    pub dropout: f64,
    /// Whether acyclic enforcement is on.
    #[serde(default)]
    pub enforce_acyclic: bool,
    /// Nodes.
    pub nodes: Vec<NodeJson>,
    /// Regular and self connections.
    pub connections: Vec<ConnectionJson>,
}

fn default_mask() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

fn squash_from_name(name: &str) -> Activation {
    Activation::from_name(name).unwrap_or_else(|| {
        warn!("unknown squash '{}'; using LOGISTIC", name);
        Activation::Logistic
    })
}

/// Role implied by a list position.
fn kind_at(position: usize, len: usize, input: usize, output: usize) -> NodeKind {
    if position < input {
        NodeKind::Input
    } else if position >= len - output {
        NodeKind::Output
    } else {
        NodeKind::Hidden
    }
}

fn default_gene(kind: NodeKind, position: usize, len: usize, input: usize, output: usize) -> u64 {
    match kind {
        NodeKind::Input => input_gene_id(position),
        NodeKind::Output => output_gene_id(input, position - (len - output)),
        NodeKind::Hidden => imported_gene_id(position),
    }
}

fn check_shape(len: usize, input: usize, output: usize) -> Result<()> {
    if len < input + output {
        return Err(NetworkError::MalformedGenome(format!(
            "{} nodes cannot hold {} inputs and {} outputs",
            len, input, output
        )));
    }
    Ok(())
}

fn node_at(ids: &[NodeId], position: usize) -> Result<NodeId> {
    ids.get(position).copied().ok_or_else(|| {
        NetworkError::MalformedGenome(format!("node position {} out of range", position))
    })
}

impl Network {
    /// Position lookup that never fails for members of this network.
    fn pos(&self, id: NodeId) -> usize {
        self.positions[id]
    }

    /// Export to the compact positional form.
    #[must_use]
    pub fn serialize(&self) -> CompactGenome {
        let nodes: Vec<&Node> = self.order.iter().map(|&id| &self.nodes[id]).collect();

        let connections = self
            .all_connection_ids()
            .into_iter()
            .map(|c| &self.connections[c])
            .filter(|c| c.enabled)
            .map(|c| CompactConnection {
                from: self.pos(c.from),
                to: self.pos(c.to),
                weight: c.weight,
                gater: c.gater.map(|g| self.pos(g)),
            })
            .collect();

        CompactGenome(
            nodes.iter().map(|n| n.activation).collect(),
            nodes.iter().map(|n| n.state).collect(),
            nodes.iter().map(|n| n.squash.name().to_string()).collect(),
            connections,
            self.input_size(),
            self.output_size(),
            nodes.iter().map(|n| n.bias).collect(),
            nodes.iter().map(|n| n.mask).collect(),
        )
    }

    /// Rebuild a network from the compact form, restoring activations and states.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::MalformedGenome`] when the arrays disagree in
    /// length, the node count cannot hold the inputs and outputs, or a
    /// connection references a missing position or is rejected by the graph.
    pub fn deserialize(genome: &CompactGenome) -> Result<Self> {
        let CompactGenome(activations, states, squashes, connections, input, output, biases, masks) =
            genome;
        let (input, output) = (*input, *output);
        let len = squashes.len();
        if activations.len() != len || states.len() != len {
            return Err(NetworkError::MalformedGenome(
                "activation, state and squash arrays differ in length".into(),
            ));
        }
        for (name, extra) in [("bias", biases), ("mask", masks)] {
            if !extra.is_empty() && extra.len() != len {
                return Err(NetworkError::MalformedGenome(format!(
                    "{} array has {} entries for {} nodes",
                    name,
                    extra.len(),
                    len
                )));
            }
        }
        check_shape(len, input, output)?;

        let mut net = Self::bare(input, output, super::DEFAULT_SEED);
        let mut ids = Vec::with_capacity(len);
        for pos in 0..len {
            let kind = kind_at(pos, len, input, output);
            let gene = default_gene(kind, pos, len, input, output);
            let bias = if kind == NodeKind::Input {
                0.0
            } else {
                biases.get(pos).copied().unwrap_or(0.0)
            };
            let mut node = Node::new(kind, gene, bias, squash_from_name(&squashes[pos]));
            node.activation = activations[pos];
            node.state = states[pos];
            node.mask = masks.get(pos).copied().unwrap_or(1.0);
            ids.push(net.push_node(node));
        }

        let mut gates = Vec::new();
        for conn in connections {
            let from = node_at(&ids, conn.from)?;
            let to = node_at(&ids, conn.to)?;
            let id = net
                .connect(from, to, conn.weight)
                .map_err(|e| NetworkError::MalformedGenome(e.to_string()))?;
            if let Some(g) = conn.gater {
                gates.push((node_at(&ids, g)?, id));
            }
        }
        for (gater, id) in gates {
            net.gate(gater, id)?;
            // gains track the gater's restored activation
            net.connections[id].gain = net.nodes[gater].activation;
        }
        Ok(net)
    }

    /// Export to the structured form.
    #[must_use]
    pub fn to_json(&self) -> NetworkJson {
        let nodes = self
            .order
            .iter()
            .enumerate()
            .map(|(index, &id)| {
                let node = &self.nodes[id];
                NodeJson {
                    kind: node.kind,
                    bias: node.bias,
                    squash: node.squash.name().to_string(),
                    index,
                    gene_id: Some(node.gene_id),
                    mask: node.mask,
                }
            })
            .collect();

        let connections = self
            .all_connection_ids()
            .into_iter()
            .map(|c| {
                let conn = &self.connections[c];
                ConnectionJson {
                    from: self.pos(conn.from),
                    to: self.pos(conn.to),
                    weight: conn.weight,
                    gater: conn.gater.map(|g| self.pos(g)),
                    enabled: conn.enabled,
                }
            })
            .collect();

        NetworkJson {
            format_version: Some(FORMAT_VERSION),
            input: self.input_size(),
            output: self.output_size(),
            dropout: self.dropout,
            enforce_acyclic: self.enforce_acyclic,
            nodes,
            connections,
        }
    }

    /// Rebuild a network from the structured form.
    ///
    /// Other format versions are imported on a best-effort basis with a
    /// warning. Node roles follow list position; a conflicting `type` is
    /// logged and overridden. Connections the graph rejects are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::MalformedGenome`] when node indices are not a
    /// permutation of the positions, the node count cannot hold the inputs
    /// and outputs, or a connection references a missing position.
    pub fn from_json(json: &NetworkJson) -> Result<Self> {
        if json.format_version != Some(FORMAT_VERSION) {
            warn!(
                "network format version {:?} differs from {}; importing on a best-effort basis",
                json.format_version, FORMAT_VERSION
            );
        }
        let (input, output) = (json.input, json.output);
        let len = json.nodes.len();
        check_shape(len, input, output)?;

        let mut slots: Vec<Option<&NodeJson>> = vec![None; len];
        for node in &json.nodes {
            match slots.get_mut(node.index) {
                Some(slot) if slot.is_none() => *slot = Some(node),
                _ => {
                    return Err(NetworkError::MalformedGenome(format!(
                        "node index {} is duplicated or out of range",
                        node.index
                    )))
                }
            }
        }

        let mut net = Self::bare(input, output, super::DEFAULT_SEED);
        net.dropout = json.dropout;
        net.enforce_acyclic = json.enforce_acyclic;

        let mut ids = Vec::with_capacity(len);
        for (pos, slot) in slots.into_iter().enumerate() {
            let data = slot.ok_or_else(|| {
                NetworkError::MalformedGenome(format!("no node at position {}", pos))
            })?;
            let kind = kind_at(pos, len, input, output);
            if data.kind != kind {
                warn!(
                    "node {} is typed {:?} but its position makes it {:?}",
                    pos, data.kind, kind
                );
            }
            let gene = data
                .gene_id
                .map(|g| net.unique_gene_id(g))
                .unwrap_or_else(|| default_gene(kind, pos, len, input, output));
            let bias = if kind == NodeKind::Input { 0.0 } else { data.bias };
            let mut node = Node::new(kind, gene, bias, squash_from_name(&data.squash));
            node.mask = data.mask;
            ids.push(net.push_node(node));
        }

        let mut gates = Vec::new();
        for conn in &json.connections {
            let from = node_at(&ids, conn.from)?;
            let to = node_at(&ids, conn.to)?;
            let id = match net.connect(from, to, conn.weight) {
                Ok(id) => id,
                Err(err) => {
                    warn!("skipping connection {} -> {}: {}", conn.from, conn.to, err);
                    continue;
                }
            };
            net.connections[id].enabled = conn.enabled;
            if let Some(g) = conn.gater {
                gates.push((node_at(&ids, g)?, id));
            }
        }
        for (gater, id) in gates {
            net.gate(gater, id)?;
        }
        Ok(net)
    }
}

impl From<Network> for NetworkJson {
    fn from(net: Network) -> Self {
        net.to_json()
    }
}

impl TryFrom<NetworkJson> for Network {
    type Error = NetworkError;

    fn try_from(json: NetworkJson) -> Result<Self> {
        Network::from_json(&json)
    }
}

/// Rebuild a compact genome and return its mean cost over `set`.
///
/// Intended for worker-side evaluation, where only the compact form and a
/// cost name cross the process boundary.
///
/// # Errors
///
/// - [`NetworkError::UnknownCost`] if `cost` names no cost function
/// - any error from [`Network::deserialize`] or [`Network::test`]
pub fn evaluate_serialized(genome: &CompactGenome, set: &[Sample], cost: &str) -> Result<f64> {
    let cost = Cost::from_name(cost).ok_or_else(|| NetworkError::UnknownCost(cost.to_string()))?;
    let mut net = Network::deserialize(genome)?;
    Ok(net.test(set, cost)?.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Mutation;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn recurrent_net() -> Network {
        let mut rng = test_rng();
        let mut net = Network::new(2, 2, &mut rng);
        net.mutate(Mutation::AddNode, &mut rng);
        net.mutate(Mutation::AddSelfConn, &mut rng);
        net.mutate(Mutation::AddGate, &mut rng);
        net.mutate(Mutation::AddBackConn, &mut rng);
        net
    }

    #[test]
    fn test_compact_roundtrip_preserves_outputs() {
        let mut net = recurrent_net();
        net.activate(&[0.2, 0.9], false).unwrap();

        let genome = net.serialize();
        let mut copy = Network::deserialize(&genome).unwrap();
        for input in [[0.1, 0.4], [1.0, -1.0]] {
            let a = net.no_trace_activate(&input).unwrap();
            let b = copy.no_trace_activate(&input).unwrap();
            for (x, y) in a.iter().zip(&b) {
                assert!((x - y).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_compact_without_trailing_arrays() {
        let net = recurrent_net();
        let mut genome = net.serialize();
        genome.6.clear();
        genome.7.clear();
        let copy = Network::deserialize(&genome).unwrap();
        let last = *copy.node_ids().last().unwrap();
        assert_eq!(copy.node(last).unwrap().bias, 0.0);
        assert_eq!(copy.node(last).unwrap().mask, 1.0);
    }

    #[test]
    fn test_compact_rejects_bad_positions() {
        let net = recurrent_net();
        let mut genome = net.serialize();
        genome.3.push(CompactConnection {
            from: 0,
            to: 99,
            weight: 1.0,
            gater: None,
        });
        assert!(matches!(
            Network::deserialize(&genome),
            Err(NetworkError::MalformedGenome(_))
        ));
    }

    #[test]
    fn test_json_roundtrip_keeps_structure() {
        let mut net = recurrent_net();
        let first = net.connection_ids()[0];
        net.set_enabled(first, false).unwrap();

        let json = net.to_json();
        let copy = Network::from_json(&json).unwrap();
        assert_eq!(copy.to_json(), json);
        assert_eq!(copy.gate_count(), net.gate_count());
        assert_eq!(copy.self_connection_count(), net.self_connection_count());
    }

    #[test]
    fn test_json_rejects_duplicate_indices() {
        let net = recurrent_net();
        let mut json = net.to_json();
        json.nodes[1].index = 0;
        assert!(Network::from_json(&json).is_err());
    }

    #[test]
    fn test_json_without_version_imports() {
        let net = recurrent_net();
        let mut json = net.to_json();
        json.format_version = None;
        for node in &mut json.nodes {
            node.gene_id = None;
        }
        let copy = Network::from_json(&json).unwrap();
        assert_eq!(copy.node_count(), net.node_count());
    }

    #[test]
    fn test_evaluate_serialized() {
        let mut rng = test_rng();
        let net = Network::new(1, 1, &mut rng);
        let set = vec![Sample::new(vec![0.0], vec![0.5])];
        let genome = net.serialize();

        let err = evaluate_serialized(&genome, &set, "mse").unwrap();
        assert!(err >= 0.0);
        assert!(matches!(
            evaluate_serialized(&genome, &set, "nope"),
            Err(NetworkError::UnknownCost(_))
        ));
    }
}
