use criterion::measurement::Measurement;
use criterion::{criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion};
use embedscope::dimred::{PcaBuilder, TruncatedSvdBuilder, TsneBuilder};
use embedscope::reshape::explode;
use embedscope::{ReductionEngine, Table};
use rand::distr::{Distribution, Uniform};
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{ArrayRef, Float64Builder, ListBuilder, StringArray};

#[derive(Clone)]
pub struct EmbeddingConfig {
    seed: u64,
    table_sizes: Vec<(usize, usize)>,
    measurement_time: u64,
    sample_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            table_sizes: vec![(100, 1000), (500, 1000), (2000, 1000)],
            measurement_time: 10,
            sample_size: 10,
        }
    }
}

fn create_embedding_table(rows: usize, length: usize, seed: u64) -> Table {
    let mut rng = StdRng::seed_from_u64(seed);
    let value_dist = Uniform::try_from(0.0..1.0).unwrap();
    let mut builder = ListBuilder::new(Float64Builder::with_capacity(rows * length));
    for _ in 0..rows {
        for _ in 0..length {
            builder.values().append_value(value_dist.sample(&mut rng));
        }
        builder.append(true);
    }
    let ids = StringArray::from((0..rows).map(|i| format!("{}.jpg", i)).collect::<Vec<_>>());
    Table::from_columns(vec![
        ("image_ID".to_string(), Arc::new(ids) as ArrayRef),
        (
            "image_params_list".to_string(),
            Arc::new(builder.finish()) as ArrayRef,
        ),
    ])
    .unwrap()
}

fn configure_group<'a, M: Measurement>(
    c: &'a mut Criterion<M>,
    name: &str,
    config: &EmbeddingConfig,
) -> BenchmarkGroup<'a, M> {
    let mut group = c.benchmark_group(name);
    group.measurement_time(Duration::from_secs(config.measurement_time));
    group.sample_size(config.sample_size);
    group
}

pub fn bench_explode(c: &mut Criterion) {
    let config = EmbeddingConfig::default();
    let mut group = configure_group(c, "Explode", &config);

    for &(rows, length) in config.table_sizes.iter() {
        let table = create_embedding_table(rows, length, config.seed + rows as u64);
        group.bench_with_input(
            BenchmarkId::new("explode", format!("{}x{}", rows, length)),
            &(rows, length),
            |b, _| {
                b.iter(|| explode(&table, "image_ID", "image_params_list").unwrap());
            },
        );
    }
    group.finish();
}

pub fn bench_reductions(c: &mut Criterion) {
    let config = EmbeddingConfig::default();
    let mut group = configure_group(c, "Reductions", &config);
    let engine = ReductionEngine::default();

    for &(rows, length) in config.table_sizes.iter() {
        let raw = create_embedding_table(rows, length, config.seed + rows as u64);
        let features = explode(&raw, "image_ID", "image_params_list").unwrap();
        let label = format!("{}x{}", rows, length);

        let pca = PcaBuilder::new().n_components(3).build();
        group.bench_with_input(BenchmarkId::new("pca", &label), &rows, |b, _| {
            b.iter(|| engine.run(&pca, &features, "image_ID").unwrap());
        });

        let svd = TruncatedSvdBuilder::new().n_components(3).random_state(0).build();
        group.bench_with_input(BenchmarkId::new("truncated_svd", &label), &rows, |b, _| {
            b.iter(|| engine.run(&svd, &features, "image_ID").unwrap());
        });

        let tsne = TsneBuilder::new()
            .n_components(3)
            .n_iter(250)
            .random_state(0)
            .build();
        group.bench_with_input(BenchmarkId::new("tsne_250_iter", &label), &rows, |b, _| {
            b.iter(|| engine.run(&tsne, &features, "image_ID").unwrap());
        });

        // exact repulsion is quadratic, keep it to the smaller tables
        if rows <= 500 {
            let exact = TsneBuilder::new()
                .n_components(3)
                .n_iter(250)
                .theta(0.0)
                .random_state(0)
                .build();
            group.bench_with_input(BenchmarkId::new("tsne_exact_250_iter", &label), &rows, |b, _| {
                b.iter(|| engine.run(&exact, &features, "image_ID").unwrap());
            });
        }
    }
    group.finish();
}

criterion_group!(reduction_benches, bench_explode, bench_reductions);
criterion_main!(reduction_benches);
