//! Benchmarks for genome encoding and genetic operators.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

use freqfit::{
    compute::{ParameterEncoder, evolution::GenomeRng},
    schema::{CombinationKey, FrequencyEntry, FrequencyTable, Individual, ReferenceDataset},
};

/// Reference with every key of the given arity carrying three outcome slots.
fn reference(arity: usize) -> ReferenceDataset {
    let rows = (0..1usize << arity).map(|code| {
        let bits: Vec<bool> = (0..arity).map(|i| (code >> (arity - 1 - i)) & 1 == 1).collect();
        let entries: Vec<FrequencyEntry> = ["low", "mid", "high"]
            .iter()
            .map(|label| FrequencyEntry {
                label: json!(label),
                frequency: 100.0 / 3.0,
            })
            .collect();
        (CombinationKey::new(bits), entries)
    });
    let table = FrequencyTable::from_rows(rows).expect("valid table");
    ReferenceDataset::new(table).expect("valid reference")
}

fn bench_encoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_parameter_vector");

    for arity in [2, 4, 6, 8] {
        let reference = reference(arity);
        let encoder = ParameterEncoder::new(&reference);
        let genome = GenomeRng::new(1).random_genome(encoder.genome_len());

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("arity{arity}")),
            &arity,
            |b, _| {
                b.iter(|| {
                    encoder
                        .build_parameter_vector(black_box(&genome), &reference)
                        .expect("encodes")
                });
            },
        );
    }

    group.finish();
}

fn bench_variation(c: &mut Criterion) {
    let mut group = c.benchmark_group("variation");
    let mut rng = GenomeRng::new(7);

    for n in [48, 192, 768] {
        let population: Vec<Individual> = (0..150)
            .map(|i| Individual::with_score(rng.random_genome(n), i as f64))
            .collect();

        group.bench_with_input(BenchmarkId::new("select", n), &n, |b, _| {
            b.iter(|| rng.select(black_box(&population), 150, 15));
        });

        group.bench_with_input(BenchmarkId::new("crossover", n), &n, |b, _| {
            let mut a = population[0].clone();
            let mut other = population[1].clone();
            b.iter(|| rng.two_point_crossover(black_box(&mut a), black_box(&mut other)));
        });

        group.bench_with_input(BenchmarkId::new("mutation", n), &n, |b, _| {
            let mut ind = population[0].clone();
            b.iter(|| rng.polynomial_bounded_mutation(black_box(&mut ind), 20.0, 0.1));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encoder, bench_variation);
criterion_main!(benches);
