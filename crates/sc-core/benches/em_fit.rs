//! Criterion benchmarks for the EM training hot path.
//!
//! Matrices are generated from a seeded RNG so runs are deterministic and
//! need no fixture data.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sc_core::{em, EmConfig, RatingMatrix, MAX_SCORE, MIN_SCORE};

/// Synthetic sparse matrix: each cell is rated with probability `density`.
fn synthetic_matrix(users: usize, features: usize, density: f64, seed: u64) -> RatingMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut matrix = RatingMatrix::unrated(users, features);
    for user in 0..users {
        for feature in 0..features {
            if rng.random_bool(density) {
                let score = rng.random_range(MIN_SCORE..=MAX_SCORE);
                matrix.set(user, feature, score - MIN_SCORE);
            }
        }
    }
    matrix
}

fn bench_em_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("em_fit");
    group.sample_size(10);

    for (name, users, features) in [("small", 50, 20), ("medium", 200, 50)] {
        let matrix = synthetic_matrix(users, features, 0.15, 42);
        let config = EmConfig {
            classes: 8,
            iterations: 4,
            ..EmConfig::default()
        };
        group.bench_with_input(BenchmarkId::new("fit", name), &matrix, |b, m| {
            b.iter(|| em::fit(black_box(m), black_box(&config)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_em_fit);
criterion_main!(benches);
