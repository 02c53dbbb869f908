//! The SAXPY dispatch pipeline
//!
//! ```text
//! select device → context → queue → allocate A, B, C → build → pick variant
//!     → upload A, B → bind → dispatch → wait → elapsed → download C (after event)
//!     → finish → teardown
//! ```
//!
//! [`SaxpyPipeline::launch`] acquires every device object and hands them to a
//! [`Session`]. Acquisition failures unwind through the guards of the objects
//! acquired so far, which drop in reverse acquisition order. A session
//! releases in the fixed order event, kernel, program, buffers, queue,
//! context, both from [`Session::teardown`] and from its `Drop`.

use std::sync::Arc;

use saxpy_tracing::performance::record_kernel_execution;

use crate::api::{AccessDirection, ComputeApi, QueueProperties};
use crate::backends;
use crate::config::PipelineConfig;
use crate::context::{CommandQueue, ExecutionContext};
use crate::device::{DeviceEnumerator, Selection};
use crate::dispatch::{KernelHandle, WorkDecomposition};
use crate::error::{Error, Result};
use crate::event::{CompletionEvent, ElapsedTime};
use crate::kernels::{KernelVariant, ARG_A, ARG_ALPHA, ARG_B, ARG_C};
use crate::memory::DeviceBuffer;
use crate::program::{KernelSource, Program, ProgramBuilder};
use crate::report::{check, status_of, ReportSink, Stage, TracingReporter};
use crate::resource::Released;

/// Runs `C = alpha * A + B` against one device runtime
pub struct SaxpyPipeline {
    api: Arc<dyn ComputeApi>,
    config: PipelineConfig,
    reporter: Arc<dyn ReportSink>,
}

impl SaxpyPipeline {
    pub fn new(api: Arc<dyn ComputeApi>, config: PipelineConfig) -> Self {
        Self {
            api,
            config,
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Open the backend named in `config`
    pub fn connect(config: PipelineConfig) -> Result<Self> {
        let api = backends::connect(config.backend, config.device_class)?;
        Ok(Self::new(api, config))
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ReportSink>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn api(&self) -> &Arc<dyn ComputeApi> {
        &self.api
    }

    /// Acquire every device object needed for one run
    #[tracing::instrument(skip_all, fields(backend = self.api.backend_name(), elements = self.config.element_count))]
    pub fn launch(&self) -> Result<Session> {
        let config = &self.config;
        let sink = self.reporter.as_ref();
        check(sink, Stage::Config, config.validate())?;

        let work = check(
            sink,
            Stage::Dispatch,
            WorkDecomposition::new(config.element_count, config.work_load, config.local_size),
        )?;

        let selection = check(
            sink,
            Stage::Discovery,
            DeviceEnumerator::new(Arc::clone(&self.api)).select(config.device_class, config.vendor.as_deref()),
        )?;
        let device = selection.primary();

        let context = check(
            sink,
            Stage::Context,
            ExecutionContext::create(Arc::clone(&self.api), selection.platform(), selection.devices()),
        )?;
        let queue = check(
            sink,
            Stage::Queue,
            CommandQueue::create(&context, device, QueueProperties { profiling: config.profiling }),
        )?;

        let allocate = |access| {
            check(
                sink,
                Stage::Allocation,
                DeviceBuffer::allocate_for::<f32>(&context, config.element_count, access),
            )
        };
        let input_a = allocate(AccessDirection::ReadOnly)?;
        let input_b = allocate(AccessDirection::ReadOnly)?;
        let output_c = allocate(AccessDirection::WriteOnly)?;

        let program = check(
            sink,
            Stage::Build,
            ProgramBuilder::build(&context, &KernelSource::bundled(config.element_count), &[device.id]),
        )?;
        let kernel = check(sink, Stage::KernelSelect, program.kernel(config.variant))?;

        Ok(Session {
            reporter: Arc::clone(&self.reporter),
            variant: config.variant,
            work,
            event: None,
            kernel,
            program,
            input_a,
            input_b,
            output_c,
            queue,
            context,
            selection,
        })
    }

    /// Compute `alpha * a + b` on the device
    pub fn run(&self, a: &[f32], b: &[f32]) -> Result<SaxpyOutcome> {
        let n = self.config.element_count;
        if a.len() != n || b.len() != n {
            return Err(Error::InvalidConfig(format!(
                "inputs hold {} and {} elements, expected {n}",
                a.len(),
                b.len()
            )));
        }

        let mut session = self.launch()?;
        let result = session.execute(self.config.alpha, a, b);
        let teardown = session.teardown();

        let mut outcome = result?;
        outcome.teardown = teardown;
        Ok(outcome)
    }

    /// Run with `A[i] = i` and `B[i] = N - i`
    pub fn run_default_inputs(&self) -> Result<SaxpyOutcome> {
        let (a, b) = default_inputs(self.config.element_count);
        self.run(&a, &b)
    }
}

/// `A[i] = i`, `B[i] = n - i`
pub fn default_inputs(n: usize) -> (Vec<f32>, Vec<f32>) {
    let a = (0..n).map(|i| i as f32).collect();
    let b = (0..n).map(|i| (n - i) as f32).collect();
    (a, b)
}

/// Host computation of `alpha * a + b`, for checking device output
pub fn reference_saxpy(alpha: f32, a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b).map(|(&a, &b)| alpha * a + b).collect()
}

/// Result of one pipeline run
#[derive(Debug)]
pub struct SaxpyOutcome {
    /// The downloaded C vector
    pub output: Vec<f32>,
    pub variant: KernelVariant,
    pub work: WorkDecomposition,
    /// Device execution time; `None` when profiling is disabled
    pub elapsed: Option<ElapsedTime>,
    pub teardown: TeardownReport,
}

/// What a teardown pass released
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Handles released by this pass
    pub released: usize,
    /// Release failures, in release order
    pub failures: Vec<Error>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Device objects of one run.
///
/// Fields are declared in release order, so dropping a session without an
/// explicit teardown releases in the same order.
pub struct Session {
    reporter: Arc<dyn ReportSink>,
    variant: KernelVariant,
    work: WorkDecomposition,
    event: Option<CompletionEvent>,
    kernel: KernelHandle,
    program: Program,
    input_a: DeviceBuffer,
    input_b: DeviceBuffer,
    output_c: DeviceBuffer,
    queue: CommandQueue,
    context: ExecutionContext,
    selection: Selection,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("variant", &self.variant)
            .field("work", &self.work)
            .field("event", &self.event)
            .field("kernel", &self.kernel)
            .field("program", &self.program)
            .field("input_a", &self.input_a)
            .field("input_b", &self.input_b)
            .field("output_c", &self.output_c)
            .field("queue", &self.queue)
            .field("context", &self.context)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn work(&self) -> &WorkDecomposition {
        &self.work
    }

    pub fn kernel(&self) -> &KernelHandle {
        &self.kernel
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Upload, dispatch, wait, time and download one SAXPY
    #[tracing::instrument(skip_all, fields(variant = %self.variant, global_size = self.work.global_size()))]
    pub fn execute(&mut self, alpha: f32, a: &[f32], b: &[f32]) -> Result<SaxpyOutcome> {
        let reporter = Arc::clone(&self.reporter);
        let sink = reporter.as_ref();

        check(sink, Stage::Upload, self.queue.upload(&self.input_a, a))?;
        check(sink, Stage::Upload, self.queue.upload(&self.input_b, b))?;
        check(sink, Stage::ArgBind, self.bind_arguments(alpha))?;

        let event = check(sink, Stage::Dispatch, self.queue.dispatch(&self.kernel, &self.work))?;
        let event: &CompletionEvent = self.event.insert(event);
        check(sink, Stage::Wait, event.wait())?;

        let elapsed = if self.queue.profiling() {
            let elapsed = check(sink, Stage::Profiling, event.elapsed())?;
            record_kernel_execution(
                self.kernel.name(),
                self.work.global_size(),
                self.work.element_count(),
                elapsed.nanos,
            );
            tracing::info!(
                kernel = %self.kernel.name(),
                elapsed_ms = elapsed.as_millis_f64(),
                "kernel execution time: {elapsed}"
            );
            Some(elapsed)
        } else {
            None
        };

        let mut output = vec![0.0f32; self.work.element_count()];
        check(sink, Stage::Download, self.queue.download(&self.output_c, &mut output, &[event]))?;
        check(sink, Stage::Download, self.queue.finish())?;

        Ok(SaxpyOutcome {
            output,
            variant: self.variant,
            work: self.work,
            elapsed,
            teardown: TeardownReport::default(),
        })
    }

    fn bind_arguments(&mut self, alpha: f32) -> Result<()> {
        self.kernel.bind_scalar(ARG_ALPHA, alpha)?;
        self.kernel.bind_buffer(ARG_A, &self.input_a)?;
        self.kernel.bind_buffer(ARG_B, &self.input_b)?;
        self.kernel.bind_buffer(ARG_C, &self.output_c)
    }

    /// Release every handle still held.
    ///
    /// Each release is attempted even when an earlier one failed; failures
    /// are reported and collected, never raised. Calling this again releases
    /// nothing.
    pub fn teardown(&mut self) -> TeardownReport {
        let reporter = Arc::clone(&self.reporter);
        let mut report = TeardownReport::default();
        let mut settle = |outcome: Result<Released>| match outcome {
            Ok(Released::Now) => report.released += 1,
            Ok(Released::Already) => {}
            Err(err) => {
                reporter.report(Stage::Teardown, status_of(&err), &err.to_string());
                report.failures.push(err);
            }
        };

        if let Some(event) = self.event.as_mut() {
            settle(event.release());
        }
        settle(self.kernel.release());
        settle(self.program.release());
        settle(self.input_a.release());
        settle(self.input_b.release());
        settle(self.output_c.release());
        settle(self.queue.release());
        settle(self.context.release());

        if report.released > 0 {
            tracing::debug!(
                released = report.released,
                failures = report.failures.len(),
                "teardown_complete"
            );
        }
        report
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}
