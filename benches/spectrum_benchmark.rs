use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sva::estimate_surrogate_variables;
use sva::ftest::f_pvalues;

fn planted_matrix(features: usize, samples: usize) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(0xBA7C_u64 + features as u64);
    Array2::from_shape_fn((features, samples), |(i, j)| {
        let batch = if j % 2 == 0 { 1.0 } else { -1.0 };
        let signal = if i < features / 10 { 3.0 * batch } else { 0.0 };
        signal + rng.gen_range(-1.0..1.0)
    })
}

fn two_group_model(samples: usize) -> Array2<f64> {
    let mut model = Array2::zeros((samples, 2));
    model.column_mut(0).fill(1.0);
    for i in samples / 2..samples {
        model[[i, 1]] = 1.0;
    }
    model
}

fn benchmark_estimation(c: &mut Criterion) {
    let samples = 20;
    let feature_counts = [200_usize, 500, 1000];
    let mut group = c.benchmark_group("surrogate_estimation");
    for &features in feature_counts.iter() {
        let dat = planted_matrix(features, samples);
        let model = two_group_model(samples);
        group.throughput(Throughput::Elements((features * samples) as u64));
        group.bench_with_input(BenchmarkId::new("irw_sva", features), &dat, |b, input| {
            b.iter(|| {
                let result =
                    estimate_surrogate_variables(black_box(input.view()), model.view(), None, 1)
                        .unwrap();
                black_box(result);
            });
        });
    }
    group.finish();
}

fn benchmark_ftest(c: &mut Criterion) {
    let samples = 20;
    let feature_counts = [1000_usize, 5000];
    let mut group = c.benchmark_group("nested_f_test");
    for &features in feature_counts.iter() {
        let dat = planted_matrix(features, samples);
        let model = two_group_model(samples);
        let null = Array2::ones((samples, 1));
        group.throughput(Throughput::Elements(features as u64));
        group.bench_with_input(BenchmarkId::new("f_pvalues", features), &dat, |b, input| {
            b.iter(|| {
                let pvalues =
                    f_pvalues(black_box(input.view()), model.view(), null.view()).unwrap();
                black_box(pvalues);
            });
        });
    }
    group.finish();
}

criterion_group!(spectrum, benchmark_estimation, benchmark_ftest);
criterion_main!(spectrum);
