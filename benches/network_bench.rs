//! Benchmarks for symbios-network.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use symbios_genetics::Genotype;
use symbios_network::{Mutation, Network, NetworkOptions, Sample, TrainOptions};

fn bench_construction(c: &mut Criterion) {
    c.bench_function("perceptron_8_16_4", |b| {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        b.iter(|| {
            black_box(Network::perceptron(&[8, 16, 4], &mut rng).unwrap());
        });
    });
}

fn bench_mutation(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let network = Network::new(4, 2, &mut rng);

    c.bench_function("network_mutation", |b| {
        let mut n = network.clone();
        b.iter(|| {
            Genotype::mutate(&mut n, &mut rng, 1.0);
            black_box(&n);
        });
    });
}

fn bench_crossover(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut parent1 = Network::new(4, 2, &mut rng);
    let mut parent2 = Network::new(4, 2, &mut rng);

    // Add some structure
    for _ in 0..5 {
        parent1.mutate(Mutation::AddNode, &mut rng);
        parent2.mutate(Mutation::AddNode, &mut rng);
        Genotype::mutate(&mut parent1, &mut rng, 1.0);
        Genotype::mutate(&mut parent2, &mut rng, 1.0);
    }

    c.bench_function("network_crossover", |b| {
        b.iter(|| {
            black_box(parent1.crossover(&parent2, &mut rng));
        });
    });
}

fn bench_activation(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut network = Network::with_options(8, 4, NetworkOptions::feedforward(), &mut rng);
    for _ in 0..20 {
        network.mutate(Mutation::AddNode, &mut rng);
        network.mutate(Mutation::AddConn, &mut rng);
    }
    let input = [0.5; 8];

    let mut fast = network.clone();
    c.bench_function("activate_slab", |b| {
        b.iter(|| {
            black_box(fast.activate(&input, false).unwrap());
        });
    });

    let mut generic = network.clone();
    c.bench_function("activate_generic", |b| {
        b.iter(|| {
            black_box(generic.activate_generic(&input, false).unwrap());
        });
    });

    let mut untraced = network;
    c.bench_function("no_trace_activate", |b| {
        b.iter(|| {
            black_box(untraced.no_trace_activate(&input).unwrap());
        });
    });
}

fn bench_training(c: &mut Criterion) {
    let set = vec![
        Sample::new(vec![0.0, 0.0], vec![0.0]),
        Sample::new(vec![0.0, 1.0], vec![1.0]),
        Sample::new(vec![1.0, 0.0], vec![1.0]),
        Sample::new(vec![1.0, 1.0], vec![0.0]),
    ];
    let options = TrainOptions {
        iterations: Some(10),
        ..Default::default()
    };
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut network = Network::perceptron(&[2, 6, 1], &mut rng).unwrap();

    c.bench_function("train_xor_10_iterations", |b| {
        b.iter(|| {
            black_box(network.train(&set, &options).unwrap());
        });
    });
}

fn bench_serialization(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut network = Network::new(4, 2, &mut rng);
    for _ in 0..10 {
        Genotype::mutate(&mut network, &mut rng, 2.0);
    }
    let genome = network.serialize();

    c.bench_function("compact_roundtrip", |b| {
        b.iter(|| {
            black_box(Network::deserialize(&network.serialize()).unwrap());
        });
    });

    c.bench_function("compact_deserialize", |b| {
        b.iter(|| {
            black_box(Network::deserialize(&genome).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_construction,
    bench_mutation,
    bench_crossover,
    bench_activation,
    bench_training,
    bench_serialization,
);
criterion_main!(benches);
