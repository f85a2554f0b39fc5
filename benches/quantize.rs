// Benchmark suite for cuantizar quantizers and fused dot products
// Uses Criterion.rs for statistical benchmarking

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cuantizar::quantize::{
    fused_iq1bn_q8k64_dot, fused_iq2bn_q8k64_dot, fused_iq2k_q8k_dot, fused_iq4k_q8k_dot,
    quantize_activations_q8k_into, quantize_iq1_bn, quantize_iq2_bn, quantize_iq2_k,
    quantize_iq4_k, Q8K64Row, QK_K,
};

fn test_row(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let t = i as f32 / 64.0;
            t.sin() + 0.25 * (3.1 * t).cos()
        })
        .collect()
}

fn benchmark_quantize(c: &mut Criterion) {
    let mut group = c.benchmark_group("quantize_row");

    for &n in &[256usize, 4096] {
        let row = test_row(n);
        group.bench_with_input(BenchmarkId::new("iq1_bn", n), &n, |b, &n| {
            b.iter(|| quantize_iq1_bn(black_box(&row), 1, n).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("iq2_bn", n), &n, |b, &n| {
            b.iter(|| quantize_iq2_bn(black_box(&row), 1, n).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("iq4_k", n), &n, |b, &n| {
            b.iter(|| quantize_iq4_k(black_box(&row), 1, n, None).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("iq2_k", n), &n, |b, &n| {
            b.iter(|| quantize_iq2_k(black_box(&row), 1, n, None).unwrap());
        });
    }

    group.finish();
}

fn benchmark_activation_quantize(c: &mut Criterion) {
    let row = test_row(4096);

    c.bench_function("q8_k64_quantize_4096", |b| {
        b.iter(|| Q8K64Row::quantize(black_box(&row)).unwrap());
    });

    c.bench_function("q8_k_quantize_4096", |b| {
        let mut scales = vec![0.0f32; row.len() / QK_K];
        let mut quants = vec![0i8; row.len()];
        b.iter(|| {
            quantize_activations_q8k_into(black_box(&row), &mut scales, &mut quants).unwrap();
        });
    });
}

fn benchmark_fused_dot(c: &mut Criterion) {
    let n = 4096;
    let weights = test_row(n);
    let activations = test_row(n);

    let bn1 = quantize_iq1_bn(&weights, 1, n).unwrap();
    let bn2 = quantize_iq2_bn(&weights, 1, n).unwrap();
    let k4 = quantize_iq4_k(&weights, 1, n, None).unwrap();
    let k2 = quantize_iq2_k(&weights, 1, n, None).unwrap();

    let q8_64 = Q8K64Row::quantize(&activations).unwrap();
    let mut scales = vec![0.0f32; n / QK_K];
    let mut quants = vec![0i8; n];
    quantize_activations_q8k_into(&activations, &mut scales, &mut quants).unwrap();

    let mut group = c.benchmark_group("fused_dot_4096");
    group.bench_function("iq1bn_q8k64", |b| {
        b.iter(|| fused_iq1bn_q8k64_dot(black_box(&bn1), black_box(&q8_64)).unwrap());
    });
    group.bench_function("iq2bn_q8k64", |b| {
        b.iter(|| fused_iq2bn_q8k64_dot(black_box(&bn2), black_box(&q8_64)).unwrap());
    });
    group.bench_function("iq4k_q8k", |b| {
        b.iter(|| fused_iq4k_q8k_dot(black_box(&k4), black_box(&scales), black_box(&quants)).unwrap());
    });
    group.bench_function("iq2k_q8k", |b| {
        b.iter(|| fused_iq2k_q8k_dot(black_box(&k2), black_box(&scales), black_box(&quants)).unwrap());
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_quantize,
    benchmark_activation_quantize,
    benchmark_fused_dot
);
criterion_main!(benches);
