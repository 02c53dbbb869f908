//! # saxpy-runtime - Accelerator Dispatch Pipeline
//!
//! Host-side control program for one data-parallel operation, scaled vector
//! addition `C = alpha * A + B`, on a compute device.
//!
//! ## Architecture
//!
//! The pipeline talks to the device only through the [`ComputeApi`] trait.
//! Every handle it acquires is wrapped in an owning guard, so release happens
//! exactly once on every exit path.
//!
//! - **Device Enumerator** ([`device`]): platforms, devices by class, deterministic selection
//! - **Execution Context** ([`context`]): context and in-order profiling queue
//! - **Memory Manager** ([`memory`]): buffers with an access direction, blocking uploads,
//!   event-ordered downloads
//! - **Program Builder** ([`program`]): builds the kernel bundle, surfaces the compiler log on failure
//! - **Dispatcher** ([`dispatch`]): work decomposition, argument binding, submission
//! - **Synchronization** ([`event`]): completion events and device timing
//! - **Teardown** ([`pipeline::Session`]): ordered, idempotent release
//! - **Reporting** ([`report`]): per-stage status reports
//!
//! ## Backends
//!
//! - [`backends::host`] - in-process reference device, always available
//! - [`backends::opencl`] - OpenCL drivers via `opencl3` (feature `opencl`)
//!
//! ## Example
//!
//! ```rust
//! use saxpy_runtime::{PipelineConfig, SaxpyPipeline};
//!
//! let config = PipelineConfig::for_elements(1024);
//! let pipeline = SaxpyPipeline::connect(config)?;
//! let outcome = pipeline.run_default_inputs()?;
//!
//! // A[i] = i, B[i] = 1024 - i, alpha = 2
//! assert_eq!(outcome.output[10], 1034.0);
//! # Ok::<(), saxpy_runtime::Error>(())
//! ```

pub mod api;
pub mod backends;
pub mod config;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod kernels;
pub mod memory;
pub mod pipeline;
pub mod program;
pub mod report;
pub mod resource;
pub mod status;

// Re-export primary types
pub use api::{AccessDirection, ComputeApi, DeviceClass, Handle, KernelArg, NdRange, QueueProperties};
pub use backends::{HostApi, OpenClApi};
pub use config::{BackendKind, PipelineConfig};
pub use context::{CommandQueue, ExecutionContext};
pub use device::{Device, DeviceEnumerator, Platform, Selection};
pub use dispatch::{KernelHandle, WorkDecomposition};
pub use error::{Error, ErrorCategory, Result, TransferDirection};
pub use event::{CompletionEvent, ElapsedTime};
pub use kernels::KernelVariant;
pub use memory::DeviceBuffer;
pub use pipeline::{default_inputs, reference_saxpy, SaxpyOutcome, SaxpyPipeline, Session, TeardownReport};
pub use program::{KernelSource, Program, ProgramBuilder};
pub use report::{ReportSink, Stage, TracingReporter};
pub use resource::{Owned, Released};
pub use status::{ApiError, ApiResult};
