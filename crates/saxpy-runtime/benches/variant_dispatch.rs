//! Kernel variant benchmark suite
//!
//! Benchmarks on the host reference device:
//! - Full pipeline runs (acquire, upload, dispatch, download, teardown) per variant
//! - Dispatch and wait alone on a prepared session, per work load
//! - Native Rust baseline for the same arithmetic

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use saxpy_runtime::{
    default_inputs, reference_saxpy, ComputeApi, DeviceClass, HostApi, KernelVariant, PipelineConfig,
    SaxpyPipeline,
};

const SIZES: [usize; 3] = [4_096, 65_536, 1_048_576];

fn host_api() -> Arc<dyn ComputeApi> {
    Arc::new(HostApi::emulating(DeviceClass::Gpu))
}

fn benchmark_pipeline_variants(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_run");

    for size in SIZES {
        let (a, b) = default_inputs(size);
        group.throughput(Throughput::Elements(size as u64));

        // Native Rust baseline
        group.bench_with_input(BenchmarkId::new("native_rust", size), &size, |bench, _| {
            bench.iter(|| black_box(reference_saxpy(2.0, &a, &b)));
        });

        for variant in KernelVariant::ALL {
            let config = PipelineConfig::for_elements(size).with_variant(variant);
            let pipeline = SaxpyPipeline::new(host_api(), config);
            group.bench_with_input(BenchmarkId::new(variant.to_string(), size), &size, |bench, _| {
                bench.iter(|| black_box(pipeline.run(&a, &b).map(|outcome| outcome.output.len())));
            });
        }
    }

    group.finish();
}

fn benchmark_work_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("strided_work_load");
    let size = 1_048_576;
    let (a, b) = default_inputs(size);
    group.throughput(Throughput::Elements(size as u64));

    for work_load in [1, 4, 16, 64] {
        let config = PipelineConfig::for_elements(size).with_work_load(work_load);
        let pipeline = SaxpyPipeline::new(host_api(), config);
        let Ok(mut session) = pipeline.launch() else {
            continue;
        };

        group.bench_with_input(BenchmarkId::from_parameter(work_load), &work_load, |bench, _| {
            bench.iter(|| black_box(session.execute(2.0, &a, &b).map(|outcome| outcome.elapsed)));
        });
        session.teardown();
    }

    group.finish();
}

criterion_group!(benches, benchmark_pipeline_variants, benchmark_work_load);
criterion_main!(benches);
