use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use txn_rules::{Compiler, Program, Txn};

/// `n` risk-score comparisons chained with `&&`.
fn chained_definition(n: usize) -> String {
    (0..n)
        .map(|i| format!("txn.RiskScore > {i}"))
        .collect::<Vec<_>>()
        .join(" && ")
}

fn bench_compile(c: &mut Criterion) {
    let compiler = Compiler::new();
    let mut group = c.benchmark_group("compile");

    for &n in &[1, 10, 50] {
        let definition = chained_definition(n);
        group.bench_with_input(BenchmarkId::new("check", n), &definition, |b, d| {
            b.iter(|| compiler.check(black_box(d)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("compile", n), &definition, |b, d| {
            b.iter(|| compiler.compile(black_box(d)).unwrap());
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let compiler = Compiler::new();
    let mut group = c.benchmark_group("decode");

    for &n in &[1, 10, 50] {
        let bytes = compiler.compile(&chained_definition(n)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &bytes, |b, bytes| {
            b.iter(|| Program::from_bytes(black_box(bytes)).unwrap());
        });
    }

    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let compiler = Compiler::new();
    let txn = Txn {
        amount: 2_500_000.0,
        risk_score: 100,
        currency: "USD".into(),
        ..Txn::default()
    };
    let mut group = c.benchmark_group("evaluate");

    for &n in &[1, 10, 50] {
        let program = compiler.check(&chained_definition(n)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &program, |b, p| {
            b.iter(|| p.evaluate(black_box(&txn)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile, bench_decode, bench_evaluate);
criterion_main!(benches);
