//! End-to-end runs of the SAXPY pipeline on the host reference device

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use saxpy_runtime::{
    default_inputs, reference_saxpy, AccessDirection, CommandQueue, ComputeApi, DeviceBuffer, DeviceClass,
    DeviceEnumerator, Error, ExecutionContext, HostApi, KernelSource, KernelVariant, PipelineConfig,
    ProgramBuilder, QueueProperties, Result, SaxpyPipeline, WorkDecomposition,
};

fn host_pipeline(config: PipelineConfig) -> SaxpyPipeline {
    SaxpyPipeline::new(Arc::new(HostApi::emulating(config.device_class)), config)
}

#[test]
fn test_reference_scenario_n1024() -> Result<()> {
    let outcome = host_pipeline(PipelineConfig::for_elements(1024).with_alpha(2.0)).run_default_inputs()?;

    for (i, value) in outcome.output.iter().enumerate() {
        assert_eq!(*value, (i + 1024) as f32, "C[{i}]");
    }
    let elapsed = outcome.elapsed.expect("profiling enabled by default");
    assert!(elapsed.as_millis_f64() >= 0.0);
    Ok(())
}

#[test]
fn test_both_variants_match_reference() -> Result<()> {
    let n = 4096;
    let (a, b) = default_inputs(n);
    let expected = reference_saxpy(3.5, &a, &b);

    for variant in KernelVariant::ALL {
        let config = PipelineConfig::for_elements(n).with_alpha(3.5).with_variant(variant);
        let outcome = host_pipeline(config).run(&a, &b)?;
        assert_eq!(outcome.variant, variant);
        assert_eq!(outcome.output, expected, "{variant}");
    }
    Ok(())
}

#[test]
fn test_strided_work_loads() -> Result<()> {
    let n = 2048;
    let (a, b) = default_inputs(n);
    let expected = reference_saxpy(2.0, &a, &b);

    for work_load in [1, 2, 4, 8, 16] {
        let config = PipelineConfig::for_elements(n).with_work_load(work_load).with_local_size(16);
        let outcome = host_pipeline(config).run(&a, &b)?;
        assert_eq!(outcome.work.elements_per_item(), work_load);
        assert_eq!(outcome.work.stride(), n / work_load);
        assert_eq!(outcome.output, expected, "work_load {work_load}");
    }
    Ok(())
}

#[test]
fn test_indivisible_decomposition_fails_before_device_work() {
    let api = common::CountingApi::new(common::Fault::None);
    let dyn_api: Arc<dyn ComputeApi> = api.clone();
    // 1000 / 4 = 250 work-items, not a multiple of 32
    let pipeline = SaxpyPipeline::new(dyn_api, PipelineConfig::for_elements(1000));

    let err = pipeline.run_default_inputs().unwrap_err();
    assert!(matches!(
        err,
        Error::DispatchFailed {
            global_size: 250,
            local_size: 32,
            ..
        }
    ));
    assert!(api.acquisitions().is_empty());
}

#[test]
fn test_components_without_pipeline() -> Result<()> {
    let n = 250;
    let api: Arc<dyn ComputeApi> = Arc::new(HostApi::new());
    let selection = DeviceEnumerator::new(Arc::clone(&api)).select(DeviceClass::All, None)?;
    let context = ExecutionContext::create(api, selection.platform(), selection.devices())?;
    let queue = CommandQueue::create(&context, selection.primary(), QueueProperties { profiling: true })?;

    let program = ProgramBuilder::build(&context, &KernelSource::bundled(n), &[])?;
    let mut kernel = program.kernel(KernelVariant::Elementwise)?;
    let a = DeviceBuffer::allocate_for::<f32>(&context, n, AccessDirection::ReadOnly)?;
    let b = DeviceBuffer::allocate_for::<f32>(&context, n, AccessDirection::ReadOnly)?;
    let c = DeviceBuffer::allocate_for::<f32>(&context, n, AccessDirection::WriteOnly)?;

    let (host_a, host_b) = default_inputs(n);
    queue.upload(&a, &host_a)?;
    queue.upload(&b, &host_b)?;
    kernel.bind_scalar(0, -1.0)?;
    kernel.bind_buffer(1, &a)?;
    kernel.bind_buffer(2, &b)?;
    kernel.bind_buffer(3, &c)?;

    let work = WorkDecomposition::new(n, 1, 125)?;
    let event = queue.dispatch(&kernel, &work)?;
    event.wait()?;
    let elapsed = event.elapsed()?;
    assert_eq!(elapsed.as_millis_f64(), elapsed.nanos as f64 / 1_000_000.0);

    let mut host_c = vec![0.0f32; n];
    queue.download(&c, &mut host_c, &[&event])?;
    assert_eq!(host_c, reference_saxpy(-1.0, &host_a, &host_b));
    Ok(())
}

#[test]
fn test_elementwise_writes_only_its_global_range() -> Result<()> {
    let n = 1024;
    let api: Arc<dyn ComputeApi> = Arc::new(HostApi::new());
    let selection = DeviceEnumerator::new(Arc::clone(&api)).select(DeviceClass::All, None)?;
    let context = ExecutionContext::create(api, selection.platform(), selection.devices())?;
    let queue = CommandQueue::create(&context, selection.primary(), QueueProperties::default())?;

    let program = ProgramBuilder::build(&context, &KernelSource::bundled(n), &[])?;
    let mut kernel = program.kernel(KernelVariant::Elementwise)?;
    let a = DeviceBuffer::allocate_for::<f32>(&context, n, AccessDirection::ReadOnly)?;
    let b = DeviceBuffer::allocate_for::<f32>(&context, n, AccessDirection::ReadOnly)?;
    let c = DeviceBuffer::allocate_for::<f32>(&context, n, AccessDirection::WriteOnly)?;

    let (host_a, host_b) = default_inputs(n);
    queue.upload(&a, &host_a)?;
    queue.upload(&b, &host_b)?;
    queue.upload(&c, &vec![-1.0f32; n])?;
    kernel.bind_scalar(0, 2.0)?;
    kernel.bind_buffer(1, &a)?;
    kernel.bind_buffer(2, &b)?;
    kernel.bind_buffer(3, &c)?;

    // Four elements per work-item is a strided decomposition; the
    // elementwise body only covers the first global-size elements.
    let work = WorkDecomposition::new(n, 4, 32)?;
    let event = queue.dispatch(&kernel, &work)?;
    let mut host_c = vec![0.0f32; n];
    queue.download(&c, &mut host_c, &[&event])?;

    let written = work.global_size();
    assert_eq!(&host_c[..written], &reference_saxpy(2.0, &host_a, &host_b)[..written]);
    assert!(host_c[written..].iter().all(|&v| v == -1.0));
    Ok(())
}

#[test]
fn test_unbound_argument_is_reported_with_index() -> Result<()> {
    let api: Arc<dyn ComputeApi> = Arc::new(HostApi::new());
    let selection = DeviceEnumerator::new(Arc::clone(&api)).select(DeviceClass::All, None)?;
    let context = ExecutionContext::create(api, selection.platform(), selection.devices())?;
    let queue = CommandQueue::create(&context, selection.primary(), QueueProperties::default())?;
    let program = ProgramBuilder::build(&context, &KernelSource::bundled(64), &[])?;
    let mut kernel = program.kernel(KernelVariant::Strided)?;

    let input = DeviceBuffer::allocate_for::<f32>(&context, 64, AccessDirection::ReadOnly)?;
    kernel.bind_scalar(0, 2.0)?;
    kernel.bind_buffer(1, &input)?;

    let work = WorkDecomposition::new(64, 4, 16)?;
    let err = queue.dispatch(&kernel, &work).unwrap_err();
    assert!(matches!(err, Error::ArgBindFailed { index: 2, .. }));

    let err = kernel.bind_scalar(1, 2.0).unwrap_err();
    assert!(matches!(err, Error::ArgBindFailed { index: 1, .. }));
    Ok(())
}

#[test]
fn test_missing_device_class_is_discovery_error() {
    let api: Arc<dyn ComputeApi> = Arc::new(HostApi::emulating(DeviceClass::Cpu));
    let config = PipelineConfig::for_elements(64).with_device_class(DeviceClass::Accelerator);
    let err = SaxpyPipeline::new(api, config).run_default_inputs().unwrap_err();
    assert!(matches!(err, Error::NoDeviceFound { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_vendor_filter() -> Result<()> {
    let config = PipelineConfig::for_elements(64).with_vendor("SAXPY-RUNTIME");
    host_pipeline(config).run_default_inputs()?;

    let config = PipelineConfig::for_elements(64).with_vendor("nobody");
    let err = host_pipeline(config).run_default_inputs().unwrap_err();
    assert!(matches!(err, Error::NoPlatformFound));
    Ok(())
}

#[test]
fn test_opencl_backend_without_feature() {
    if cfg!(feature = "opencl") {
        return;
    }
    let config = PipelineConfig::for_elements(64).with_backend(saxpy_runtime::BackendKind::OpenCl);
    let err = SaxpyPipeline::connect(config).err().expect("opencl feature is disabled");
    assert!(matches!(err, Error::Unsupported(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Upload then download of an untouched buffer returns the host data
    #[test]
    fn prop_transfer_round_trip(data in prop::collection::vec(any::<f32>(), 1..2048)) {
        let api: Arc<dyn ComputeApi> = Arc::new(HostApi::new());
        let selection = DeviceEnumerator::new(Arc::clone(&api)).select(DeviceClass::All, None).unwrap();
        let context = ExecutionContext::create(api, selection.platform(), selection.devices()).unwrap();
        let queue = CommandQueue::create(&context, selection.primary(), QueueProperties::default()).unwrap();

        let buffer = DeviceBuffer::allocate_for::<f32>(&context, data.len(), AccessDirection::ReadOnly).unwrap();
        queue.upload(&buffer, &data).unwrap();
        let mut back = vec![0.0f32; data.len()];
        queue.download(&buffer, &mut back, &[]).unwrap();

        let sent: Vec<u32> = data.iter().map(|v| v.to_bits()).collect();
        let received: Vec<u32> = back.iter().map(|v| v.to_bits()).collect();
        prop_assert_eq!(sent, received);
    }

    /// Both variants produce bit-identical output for the same inputs
    #[test]
    fn prop_variants_bit_identical(
        groups in 1usize..16,
        alpha in -100.0f32..100.0,
        seed in prop::collection::vec(-1.0e4f32..1.0e4, 8),
    ) {
        let n = groups * 4 * 32;
        let a: Vec<f32> = (0..n).map(|i| seed[i % seed.len()] + i as f32).collect();
        let b: Vec<f32> = (0..n).map(|i| seed[(i * 7) % seed.len()] - i as f32).collect();

        let strided = host_pipeline(PipelineConfig::for_elements(n).with_alpha(alpha)).run(&a, &b).unwrap();
        let elementwise = host_pipeline(
            PipelineConfig::for_elements(n).with_alpha(alpha).with_variant(KernelVariant::Elementwise),
        )
        .run(&a, &b)
        .unwrap();

        let bits = |values: &[f32]| values.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        prop_assert_eq!(bits(&strided.output), bits(&elementwise.output));
        prop_assert_eq!(bits(&strided.output), bits(&reference_saxpy(alpha, &a, &b)));
    }
}
