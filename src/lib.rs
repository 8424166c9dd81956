//! # Symbios Network
//!
//! Mutable graph neural networks that can be trained with backpropagation and
//! evolved with NEAT-style structural mutation, crossover and pruning.
//!
//! ## Features
//!
//! - **Graph Networks**: Arbitrary node/connection graphs with self-connections
//!   and gating (a node multiplicatively modulating a connection)
//! - **Backpropagation**: Eligibility and extended traces, momentum, batching,
//!   regularization, dropout, DropConnect, gradient clipping and loss scaling
//! - **Structural Evolution**: Fourteen mutation operators, gene-aligned
//!   crossover and node removal that repairs the surrounding graph
//! - **Pruning**: One-shot and scheduled magnitude or SNIP pruning with regrowth
//! - **Fast Path**: Acyclic ungated networks run inference from a packed slab
//! - **Genotype Trait**: Implements `symbios_genetics::Genotype` for use with evolutionary algorithms
//!
//! ## Quick Start
//!
//! ```rust
//! use symbios_network::{Network, Sample, TrainOptions};
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let mut network = Network::perceptron(&[2, 4, 1], &mut rng).unwrap();
//!
//! let set = vec![
//!     Sample::new(vec![0.0, 1.0], vec![1.0]),
//!     Sample::new(vec![1.0, 1.0], vec![0.0]),
//! ];
//! let options = TrainOptions {
//!     iterations: Some(100),
//!     ..Default::default()
//! };
//! let result = network.train(&set, &options).unwrap();
//! println!("error after {} iterations: {}", result.iterations, result.error);
//!
//! let output = network.activate(&[0.0, 1.0], false).unwrap();
//! assert_eq!(output.len(), 1);
//! ```
//!
//! ## Using with Symbios Genetics
//!
//! ```rust,ignore
//! use symbios_genetics::{Evaluator, Evolver, algorithms::simple::SimpleGA};
//! use symbios_network::{Cost, Network, Sample};
//!
//! struct XorFitness(Vec<Sample>);
//! impl Evaluator<Network> for XorFitness {
//!     fn evaluate(&self, network: &Network) -> (f32, Vec<f32>, Vec<f32>) {
//!         let mut network = network.clone();
//!         let error = network.test(&self.0, Cost::Mse).map_or(1.0, |r| r.error);
//!         let fitness = (1.0 - error) as f32;
//!         (fitness, vec![fitness], vec![])
//!     }
//! }
//!
//! let mut rng = rand::rng();
//! let initial: Vec<Network> = (0..100).map(|_| Network::new(2, 1, &mut rng)).collect();
//!
//! let mut ga = SimpleGA::new(initial, 0.3, 5, 42);
//! for _ in 0..100 {
//!     ga.step(&XorFitness(xor_samples()));
//! }
//! ```
//!
//! ## Architecture
//!
//! ### Arena Graph
//!
//! Nodes and connections live in `SlotMap` arenas keyed by stable ids. A
//! separate list order fixes evaluation: inputs first, outputs last, hidden
//! nodes between. Derived state (topological order, packed slab) is cached
//! and invalidated by every structural edit.
//!
//! ### Hash-Based Historical Markings
//!
//! - **Connections**: `innovation = Hash(from.gene_id, to.gene_id)`
//! - **Nodes (from split)**: `gene_id = Hash(connection_innovation, SPLIT_MARKER)`
//!
//! Crossover aligns parents by these ids, so matching structure lines up
//! without a global innovation counter.
//!
//! ### Serialization
//!
//! Three forms: a compact positional tuple for shipping genomes to workers,
//! a structured JSON form (also the `serde` representation of [`Network`])
//! and standalone Rust source with no dependency on this crate.

pub mod activation;
pub mod cost;
pub mod error;
pub mod gene;
pub mod innovation;
pub mod network;
pub mod schedule;
mod slab;
pub mod topology;
pub mod train;

// Re-exports for convenience
pub use activation::Activation;
pub use cost::Cost;
pub use error::{NetworkError, Result};
pub use gene::{Connection, ConnectionId, Node, NodeId, NodeKind};
pub use innovation::{connection_innovation, node_split_innovation};
pub use network::{
    evaluate_serialized, CompactGenome, Mutation, MutationConfig, Network, NetworkJson,
    NetworkOptions, PruningConfig, PruningMethod, Regularization,
};
pub use schedule::RatePolicy;
pub use topology::GraphTopology;
pub use train::{
    CrossValidate, GradientClip, MixedPrecision, Sample, TestResult, TrainOptions, TrainResult,
};

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use symbios_genetics::Genotype;

    #[test]
    fn test_genotype_trait_implementation() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut network = Network::new(2, 1, &mut rng);

        // Test mutation
        Genotype::mutate(&mut network, &mut rng, 3.0);

        // Test crossover
        let mut other = network.clone();
        Genotype::mutate(&mut other, &mut rng, 3.0);

        let child = network.crossover(&other, &mut rng);
        assert_eq!(child.input_size(), 2);
        assert_eq!(child.output_size(), 1);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut rng = ChaCha8Rng::seed_from_u64(123);
        let mut network = Network::new(3, 2, &mut rng);

        // Add some structure
        let conn = network.connection_ids()[0];
        network.add_node(conn, &mut rng);

        let json = serde_json::to_string(&network).expect("Serialization failed");
        let restored: Network = serde_json::from_str(&json).expect("Deserialization failed");

        assert_eq!(network.node_count(), restored.node_count());
        assert_eq!(network.connection_count(), restored.connection_count());
        assert_eq!(network.input_size(), restored.input_size());
        assert_eq!(network.output_size(), restored.output_size());
    }

    #[test]
    fn test_innovation_determinism() {
        // Same structural mutation should produce same innovation
        let inn1 = connection_innovation(1, 2);
        let inn2 = connection_innovation(1, 2);
        assert_eq!(inn1, inn2);

        let node_inn1 = node_split_innovation(100);
        let node_inn2 = node_split_innovation(100);
        assert_eq!(node_inn1, node_inn2);
    }
}
