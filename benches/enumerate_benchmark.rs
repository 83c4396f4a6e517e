use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use fssgam::correlation::CorrelationMatrix;
use fssgam::enumerate::{EnumerationPolicy, PredictorSpec, enumerate_candidates};
use fssgam::terms::Term;
use ndarray::Array1;
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_columns(count: usize, rows: usize) -> (Vec<String>, Vec<Array1<f64>>) {
    let mut rng = StdRng::seed_from_u64(0xF55 + count as u64);
    let names = (0..count).map(|i| format!("x{i}")).collect();
    let columns = (0..count)
        .map(|_| Array1::from_shape_fn(rows, |_| rng.sample(Standard)))
        .collect();
    (names, columns)
}

fn benchmark_enumeration(c: &mut Criterion) {
    let mut group = c.benchmark_group("enumerate_candidates");
    for &count in &[6usize, 10, 14] {
        let (names, columns) = random_columns(count, 200);
        let views: Vec<_> = columns.iter().map(|c| c.view()).collect();
        let correlations = CorrelationMatrix::from_columns(names.clone(), &views);
        let spec = PredictorSpec {
            continuous: names,
            factors: vec!["status".to_string()],
            linear: Vec::new(),
            fixed_terms: vec![Term::RandomEffect {
                grouping: vec!["site".to_string()],
            }],
            basis_size: 5,
        };
        let policy = EnumerationPolicy {
            max_predictors: 3,
            correlation_cutoff: 0.28,
            max_models: usize::MAX,
            include_null: true,
        };

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("max3", count), &spec, |b, input| {
            b.iter(|| {
                let candidates = enumerate_candidates(black_box(input), &policy, &correlations);
                black_box(candidates.map(|c| c.len()).unwrap_or(0));
            });
        });
    }
    group.finish();
}

criterion_group!(enumerate, benchmark_enumeration);
criterion_main!(enumerate);
