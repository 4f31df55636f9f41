use std::hint::black_box;

use bencher::{TestCase, in_memory_context, nested_value, passthrough_pipeline};
use brook_web::Normalizer;
use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;

fn create_dispatch_cases() -> Vec<TestCase> {
    vec![TestCase::small("empty", 0), TestCase::normal("ten_middlewares", 10), TestCase::large("hundred_middlewares", 100)]
}

fn create_normalize_cases() -> Vec<TestCase> {
    vec![TestCase::small("flat_record", 1), TestCase::normal("nested_record", 3), TestCase::large("deep_record", 5)]
}

fn benchmark_dispatch(criterion: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime should start");
    let mut group = criterion.benchmark_group("pipeline_dispatch");

    for case in create_dispatch_cases() {
        let pipeline = passthrough_pipeline(case.size());
        group.bench_with_input(BenchmarkId::from_parameter(case.name()), &case, |b, _case| {
            b.to_async(&runtime).iter_batched(
                || in_memory_context().expect("context should build"),
                |mut ctx| {
                    let pipeline = &pipeline;
                    async move {
                        pipeline.dispatch(&mut ctx).await.expect("passthrough dispatch should succeed");
                        black_box(ctx.status());
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn benchmark_normalize(criterion: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime should start");
    let normalizer = Normalizer::new();
    let mut group = criterion.benchmark_group("normalize");

    for case in create_normalize_cases() {
        group.bench_with_input(BenchmarkId::from_parameter(case.name()), &case, |b, case| {
            b.to_async(&runtime).iter_batched(
                || nested_value(4, case.size()),
                |value| {
                    let normalizer = &normalizer;
                    async move {
                        black_box(normalizer.normalize(value).await.expect("nested value should normalize"));
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(pipeline, benchmark_dispatch, benchmark_normalize);
criterion_main!(pipeline);
