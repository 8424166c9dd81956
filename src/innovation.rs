//! Hash-based historical markings.
//!
//! Nodes and connections carry ids derived from the structural event that
//! created them, so two independently evolved networks agree on the id of a
//! gene they both acquired the same way. Crossover aligns genomes on these ids.
//!
//! For connections: `Hash(from_gene, to_gene)`
//! For nodes (from split): `Hash(connection_innovation, SPLIT_MARKER)`
//! Input and output nodes take their position as a fixed id below the
//! reserved range.

use std::hash::{Hash, Hasher};

/// Marker mixed into node-split hashes to separate them from connection hashes.
const SPLIT_MARKER: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// Marker for hidden nodes created by layered construction.
const LAYER_MARKER: u64 = 0x1A7E_12ED_0000_0001;

/// Marker for hidden nodes imported from a format that carries no gene ids.
const IMPORT_MARKER: u64 = 0x1EA0_5EED_0000_0002;

/// Ids below this value are reserved for input and output nodes.
const RESERVED_INNOVATION_RANGE: u64 = 1 << 16;

/// FxHash-style hasher whose output never falls inside the reserved range.
#[derive(Default)]
struct InnovationHasher {
    state: u64,
}

impl Hasher for InnovationHasher {
    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state = self
                .state
                .wrapping_mul(0x517c_c1b7_2722_0a95)
                .wrapping_add(u64::from(byte));
        }
    }

    #[inline]
    fn finish(&self) -> u64 {
        let mut h = self.state;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^= h >> 33;

        let range = u64::MAX - RESERVED_INNOVATION_RANGE;
        RESERVED_INNOVATION_RANGE + (h % range)
    }
}

fn hash_pair(a: u64, b: u64) -> u64 {
    let mut hasher = InnovationHasher::default();
    a.hash(&mut hasher);
    b.hash(&mut hasher);
    hasher.finish()
}

/// Innovation id of a connection between two genes.
///
/// Order matters: `a -> b` and `b -> a` are different genes. A self-connection
/// hashes the gene with itself.
#[inline]
#[must_use]
pub fn connection_innovation(from_gene: u64, to_gene: u64) -> u64 {
    hash_pair(from_gene, to_gene)
}

/// Gene id of a hidden node created by splitting a connection.
#[inline]
#[must_use]
pub fn node_split_innovation(connection_innovation: u64) -> u64 {
    hash_pair(connection_innovation, SPLIT_MARKER)
}

/// Fixed gene id of the `index`-th input node.
#[inline]
#[must_use]
pub const fn input_gene_id(index: usize) -> u64 {
    index as u64
}

/// Fixed gene id of the `index`-th output node.
#[inline]
#[must_use]
pub const fn output_gene_id(input_size: usize, index: usize) -> u64 {
    (input_size + index) as u64
}

/// Gene id of the `index`-th hidden node of layer `layer` in a layered build.
#[inline]
#[must_use]
pub fn layer_gene_id(layer: usize, index: usize) -> u64 {
    hash_pair(hash_pair(layer as u64, index as u64), LAYER_MARKER)
}

/// Gene id for a hidden node imported at list position `position`.
#[inline]
#[must_use]
pub fn imported_gene_id(position: usize) -> u64 {
    hash_pair(position as u64, IMPORT_MARKER)
}

/// Derive a replacement id when `gene` already exists in the genome.
///
/// Deterministic in `(gene, attempt)`, so two genomes that hit the same
/// collision resolve it the same way.
#[inline]
#[must_use]
pub fn resalt(gene: u64, attempt: u32) -> u64 {
    hash_pair(gene, u64::from(attempt).wrapping_add(SPLIT_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_innovation_deterministic() {
        assert_eq!(connection_innovation(1, 2), connection_innovation(1, 2));
    }

    #[test]
    fn test_connection_innovation_order_matters() {
        assert_ne!(connection_innovation(1, 2), connection_innovation(2, 1));
    }

    #[test]
    fn test_connection_innovation_distribution() {
        let innovations: Vec<u64> = (0..100).map(|i| connection_innovation(i, i + 1)).collect();
        let mut sorted = innovations.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), innovations.len(), "Should have no collisions");
    }

    #[test]
    fn test_hashed_ids_avoid_reserved_range() {
        for i in 0..200 {
            assert!(connection_innovation(i, i * 7) >= RESERVED_INNOVATION_RANGE);
            assert!(node_split_innovation(i) >= RESERVED_INNOVATION_RANGE);
            assert!(layer_gene_id(1, i as usize) >= RESERVED_INNOVATION_RANGE);
        }
        assert!(output_gene_id(3, 1) < RESERVED_INNOVATION_RANGE);
    }

    #[test]
    fn test_split_and_resalt_differ() {
        let node = node_split_innovation(12345);
        assert_eq!(node, node_split_innovation(12345));
        assert_ne!(resalt(node, 1), node);
        assert_ne!(resalt(node, 1), resalt(node, 2));
    }
}
