//! Crossover aligned on gene ids.
//!
//! Nodes are matched by `gene_id` and connections by their endpoint genes, so
//! structure that two parents acquired through the same split lines up no
//! matter where it sits in each parent's list order.

use std::collections::{HashMap, HashSet};

use log::debug;
use rand::Rng;

use super::Network;
use crate::error::{NetworkError, Result};
use crate::gene::{Node, NodeId, NodeKind};

/// Connection data keyed by `(from_gene, to_gene)`.
#[derive(Debug, Clone, Copy)]
struct ConnGene {
    weight: f64,
    gater: Option<u64>,
    enabled: bool,
}

/// Every connection of a parent, regular first, in creation order.
fn connection_genes(net: &Network) -> Vec<((u64, u64), ConnGene)> {
    net.all_connection_ids()
        .into_iter()
        .map(|c| {
            let conn = &net.connections[c];
            let key = (net.nodes[conn.from].gene_id, net.nodes[conn.to].gene_id);
            let gene = ConnGene {
                weight: conn.weight,
                gater: conn.gater.map(|g| net.nodes[g].gene_id),
                enabled: conn.enabled,
            };
            (key, gene)
        })
        .collect()
}

/// Hidden nodes of a parent as `(gene_id, node)` in list order.
fn hidden_genes(net: &Network) -> Vec<(u64, &Node)> {
    net.hidden_ids()
        .into_iter()
        .map(|id| (net.nodes[id].gene_id, &net.nodes[id]))
        .collect()
}

/// Interleave `b`'s genes into `a`'s order: each gene only `b` has goes right
/// after the nearest preceding gene of `b` that is already placed.
fn merge_orders(a: &[(u64, &Node)], b: &[(u64, &Node)]) -> Vec<u64> {
    let mut merged: Vec<u64> = a.iter().map(|&(g, _)| g).collect();
    let mut placed: HashSet<u64> = merged.iter().copied().collect();
    let mut anchor: Option<u64> = None;

    for &(gene, _) in b {
        if !placed.contains(&gene) {
            let at = anchor
                .and_then(|prev| merged.iter().position(|&g| g == prev))
                .map_or(0, |p| p + 1);
            merged.insert(at, gene);
            placed.insert(gene);
        }
        anchor = Some(gene);
    }
    merged
}

impl Network {
    /// Produce an offspring from two parents of the same shape.
    ///
    /// The parent with the higher [`Network::score`] is the fitter one.
    /// Parents are treated as equal when `equal` is set or their scores
    /// match; then genes from both sides are merged and the hidden count is
    /// drawn between the parents' counts. Otherwise the offspring takes the
    /// fitter parent's hidden genes and connections. Matching genes take
    /// their attributes from a random parent. A gene disabled in either
    /// parent is re-enabled with probability
    /// [`MutationConfig::reenable_probability`](super::MutationConfig).
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::ParentShapeMismatch`] when the parents disagree
    /// on input or output size.
    pub fn cross_over<R: Rng>(a: &Self, b: &Self, equal: bool, rng: &mut R) -> Result<Self> {
        if a.input_size() != b.input_size() || a.output_size() != b.output_size() {
            return Err(NetworkError::ParentShapeMismatch {
                a_in: a.input_size(),
                a_out: a.output_size(),
                b_in: b.input_size(),
                b_out: b.output_size(),
            });
        }

        let a_score = a.score.unwrap_or(f64::NEG_INFINITY);
        let b_score = b.score.unwrap_or(f64::NEG_INFINITY);
        let equal = equal || a_score == b_score;
        let (fit, other) = if b_score > a_score { (b, a) } else { (a, b) };

        let fit_hidden = hidden_genes(fit);
        let other_hidden = hidden_genes(other);
        let fit_nodes: HashMap<u64, &Node> = fit_hidden.iter().copied().collect();
        let other_nodes: HashMap<u64, &Node> = other_hidden.iter().copied().collect();

        let hidden: Vec<u64> = if equal {
            let mut merged = merge_orders(&fit_hidden, &other_hidden);
            let (lo, hi) = (
                fit_hidden.len().min(other_hidden.len()),
                fit_hidden.len().max(other_hidden.len()),
            );
            let size = rng.random_range(lo..=hi);
            let mut disjoint: Vec<u64> = merged
                .iter()
                .copied()
                .filter(|g| !(fit_nodes.contains_key(g) && other_nodes.contains_key(g)))
                .collect();
            while merged.len() > size && !disjoint.is_empty() {
                let drop = disjoint.swap_remove(rng.random_range(0..disjoint.len()));
                merged.retain(|&g| g != drop);
            }
            merged
        } else {
            fit_hidden.iter().map(|&(g, _)| g).collect()
        };

        let mut child = Self::bare(fit.input_size(), fit.output_size(), rng.random());
        child.dropout = fit.dropout;
        child.mutation = fit.mutation.clone();
        child.enforce_acyclic = a.enforce_acyclic || b.enforce_acyclic;

        let mut node_map: HashMap<u64, NodeId> = HashMap::new();

        for &id in &fit.order[..fit.input_size()] {
            let gene = fit.nodes[id].gene_id;
            node_map.insert(gene, child.push_node(Node::input(gene)));
        }

        for gene in hidden {
            let source = match (fit_nodes.get(&gene), other_nodes.get(&gene)) {
                (Some(&x), Some(&y)) => {
                    if rng.random::<bool>() {
                        x
                    } else {
                        y
                    }
                }
                (Some(&x), None) | (None, Some(&x)) => x,
                (None, None) => continue,
            };
            let node = Node::new(NodeKind::Hidden, gene, source.bias, source.squash);
            node_map.insert(gene, child.push_node(node));
        }

        let fit_out = &fit.order[fit.order.len() - fit.output_size()..];
        let other_out = &other.order[other.order.len() - other.output_size()..];
        for (&f, &o) in fit_out.iter().zip(other_out) {
            let source = if rng.random::<bool>() {
                &fit.nodes[f]
            } else {
                &other.nodes[o]
            };
            let gene = fit.nodes[f].gene_id;
            let node = Node::new(NodeKind::Output, gene, source.bias, source.squash);
            node_map.insert(gene, child.push_node(node));
        }

        let fit_conns = connection_genes(fit);
        let other_conns = connection_genes(other);
        let other_lookup: HashMap<(u64, u64), ConnGene> = other_conns.iter().copied().collect();
        let fit_keys: HashSet<(u64, u64)> = fit_conns.iter().map(|&(k, _)| k).collect();

        let mut inherited: Vec<((u64, u64), ConnGene)> = Vec::new();
        for &(key, gene) in &fit_conns {
            let picked = match other_lookup.get(&key) {
                Some(&mate) => {
                    let mut chosen = if rng.random::<bool>() { gene } else { mate };
                    chosen.enabled = gene.enabled && mate.enabled;
                    chosen
                }
                None => gene,
            };
            inherited.push((key, picked));
        }
        if equal {
            inherited.extend(
                other_conns
                    .iter()
                    .copied()
                    .filter(|(key, _)| !fit_keys.contains(key)),
            );
        }

        let reenable = fit.mutation.reenable_probability;
        let mut gates = Vec::new();
        for ((from_gene, to_gene), gene) in inherited {
            let (Some(&from), Some(&to)) = (node_map.get(&from_gene), node_map.get(&to_gene))
            else {
                continue;
            };
            let id = match child.connect(from, to, gene.weight) {
                Ok(id) => id,
                Err(err) => {
                    debug!("dropping inherited connection: {}", err);
                    continue;
                }
            };
            let enabled = gene.enabled || rng.random::<f64>() < reenable;
            child.connections[id].enabled = enabled;
            if let Some(&gater) = gene.gater.as_ref().and_then(|g| node_map.get(g)) {
                gates.push((gater, id));
            }
        }
        for (gater, id) in gates {
            child.gate(gater, id)?;
        }

        child.cache.invalidate();
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Mutation, NetworkOptions};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn evolved(seed: u64, steps: usize) -> Network {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut net = Network::new(2, 1, &mut rng);
        for _ in 0..steps {
            net.mutate(Mutation::AddNode, &mut rng);
            net.mutate(Mutation::AddConn, &mut rng);
        }
        net
    }

    fn gene_set(net: &Network) -> HashSet<u64> {
        net.node_ids()
            .iter()
            .map(|&id| net.node(id).unwrap().gene_id)
            .collect()
    }

    #[test]
    fn test_shape_mismatch() {
        let mut rng = test_rng();
        let a = Network::new(2, 1, &mut rng);
        let b = Network::new(3, 1, &mut rng);
        assert!(matches!(
            Network::cross_over(&a, &b, false, &mut rng),
            Err(NetworkError::ParentShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_fitter_parent_supplies_hidden_genes() {
        let mut rng = test_rng();
        let mut a = evolved(1, 4);
        let mut b = evolved(2, 2);
        a.score = Some(1.0);
        b.score = Some(0.5);

        let child = Network::cross_over(&a, &b, false, &mut rng).unwrap();
        assert_eq!(child.hidden_count(), a.hidden_count());
        assert_eq!(gene_set(&child), gene_set(&a));

        // order of arguments does not matter
        let child = Network::cross_over(&b, &a, false, &mut rng).unwrap();
        assert_eq!(gene_set(&child), gene_set(&a));
    }

    #[test]
    fn test_equal_parents_bound_hidden_count() {
        let mut rng = test_rng();
        let a = evolved(3, 5);
        let b = evolved(4, 2);
        let lo = a.hidden_count().min(b.hidden_count());
        let hi = a.hidden_count().max(b.hidden_count());

        for _ in 0..20 {
            let child = Network::cross_over(&a, &b, true, &mut rng).unwrap();
            assert!(child.hidden_count() >= lo && child.hidden_count() <= hi);
            let parents: HashSet<u64> = gene_set(&a).union(&gene_set(&b)).copied().collect();
            assert!(gene_set(&child).is_subset(&parents));
        }
    }

    #[test]
    fn test_offspring_connections_are_consistent() {
        let mut rng = test_rng();
        let a = evolved(5, 6);
        let b = evolved(6, 6);
        let child = Network::cross_over(&a, &b, true, &mut rng).unwrap();

        assert_eq!(child.input_size(), 2);
        assert_eq!(child.output_size(), 1);
        for &c in child.connection_ids() {
            let conn = child.connection(c).unwrap();
            assert!(child.node(conn.from()).is_some());
            assert!(child.node(conn.to()).is_some());
            assert!(child.node(conn.from()).unwrap().outgoing().contains(&c));
            assert!(child.node(conn.to()).unwrap().incoming().contains(&c));
        }
    }

    #[test]
    fn test_acyclic_flag_is_inherited() {
        let mut rng = test_rng();
        let a = Network::with_options(2, 1, NetworkOptions::feedforward(), &mut rng);
        let mut b = Network::new(2, 1, &mut rng);
        let out = b.node_at(2).unwrap();
        b.connect(out, out, 0.3).unwrap();

        let child = Network::cross_over(&a, &b, true, &mut rng).unwrap();
        assert!(child.enforces_acyclic());
        assert_eq!(child.self_connection_count(), 0);
    }

    /// Whether the child's first-input-to-output connection is enabled.
    fn first_link_enabled(child: &Network) -> bool {
        let input = child.node_at(0).unwrap();
        let out = child.node_at(2).unwrap();
        let c = child.connection_between(input, out).unwrap();
        child.connection(c).unwrap().enabled
    }

    /// Two parents that differ only in whether the first link is disabled.
    fn parents_with_disabled_link(reenable: f64) -> (Network, Network) {
        let mut rng = test_rng();
        let mut a = Network::new(2, 1, &mut rng);
        a.mutation.reenable_probability = reenable;
        let mut b = a.clone();
        let first = b.connection_ids()[0];
        b.set_enabled(first, false).unwrap();
        a.score = Some(1.0);
        b.score = Some(0.0);
        (a, b)
    }

    #[test]
    fn test_disabled_genes_stay_disabled() {
        let (a, b) = parents_with_disabled_link(0.0);
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let child = Network::cross_over(&a, &b, false, &mut rng).unwrap();
            assert!(!first_link_enabled(&child));
            let child = Network::cross_over(&b, &a, true, &mut rng).unwrap();
            assert!(!first_link_enabled(&child));
        }
    }

    #[test]
    fn test_disabled_genes_can_be_reenabled() {
        let (a, b) = parents_with_disabled_link(1.0);
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let child = Network::cross_over(&a, &b, false, &mut rng).unwrap();
            assert!(first_link_enabled(&child));
        }
    }

    #[test]
    fn test_identical_parents_reproduce_structure() {
        let mut rng = test_rng();
        let a = evolved(7, 3);
        let child = Network::cross_over(&a, &a, false, &mut rng).unwrap();
        assert_eq!(child.node_count(), a.node_count());
        assert_eq!(child.connection_count(), a.connection_count());
    }
}
