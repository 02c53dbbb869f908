//! OpenCL driver backend
//!
//! [`ComputeApi`] over the installed OpenCL ICD through `opencl3`. Objects
//! are kept in per-kind maps keyed by the ids handed to the pipeline;
//! releasing a handle drops the `opencl3` wrapper, which releases the driver
//! object.
//!
//! Requires the `opencl` feature. Without it [`OpenClApi::new`] reports
//! [`Error::Unsupported`].

use std::sync::Arc;

use crate::api::ComputeApi;
use crate::error::{Error, Result};

#[cfg(feature = "opencl")]
use std::collections::HashMap;
#[cfg(feature = "opencl")]
use std::ptr;

#[cfg(feature = "opencl")]
use opencl3::{
    command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE},
    context::Context,
    device::{
        Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_DEFAULT,
        CL_DEVICE_TYPE_GPU,
    },
    error_codes::ClError,
    event::Event,
    kernel::Kernel,
    memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_WRITE_ONLY},
    platform::{get_platforms, Platform},
    program::Program,
    types::{cl_device_id, cl_device_type, cl_event, cl_platform_id, CL_BLOCKING, CL_NON_BLOCKING},
};
#[cfg(feature = "opencl")]
use parking_lot::Mutex;

#[cfg(feature = "opencl")]
use crate::api::{
    AccessDirection, BufferId, ContextId, DeviceClass, DeviceId, DeviceInfo, EventId, Handle, KernelArg, KernelId,
    NdRange, PlatformId, PlatformInfo, ProfilingInfo, ProgramId, QueueId, QueueProperties,
};
#[cfg(feature = "opencl")]
use crate::status::{self, ApiError, ApiResult};

/// Connect to the OpenCL driver as a shared [`ComputeApi`]
#[cfg(feature = "opencl")]
pub(crate) fn connect() -> Result<Arc<dyn ComputeApi>> {
    Ok(Arc::new(OpenClApi::new()?))
}

#[cfg(not(feature = "opencl"))]
pub(crate) fn connect() -> Result<Arc<dyn ComputeApi>> {
    Err(Error::Unsupported(FEATURE_DISABLED.into()))
}

#[cfg(not(feature = "opencl"))]
const FEATURE_DISABLED: &str = "OpenCL backend requires the 'opencl' feature to be enabled";

#[cfg(feature = "opencl")]
fn cl_error(err: ClError) -> ApiError {
    ApiError::new(err.0, String::new())
}

#[cfg(feature = "opencl")]
fn to_cl_type(class: DeviceClass) -> cl_device_type {
    match class {
        DeviceClass::Default => CL_DEVICE_TYPE_DEFAULT,
        DeviceClass::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceClass::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceClass::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceClass::All => CL_DEVICE_TYPE_ALL,
    }
}

#[cfg(feature = "opencl")]
fn from_cl_type(device_type: cl_device_type) -> DeviceClass {
    if device_type & CL_DEVICE_TYPE_GPU != 0 {
        DeviceClass::Gpu
    } else if device_type & CL_DEVICE_TYPE_CPU != 0 {
        DeviceClass::Cpu
    } else if device_type & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceClass::Accelerator
    } else {
        DeviceClass::Default
    }
}

#[cfg(feature = "opencl")]
#[derive(Default)]
struct OpenClState {
    next_id: u64,
    platforms: HashMap<u64, cl_platform_id>,
    devices: HashMap<u64, cl_device_id>,
    contexts: HashMap<u64, Context>,
    queues: HashMap<u64, Arc<CommandQueue>>,
    buffers: HashMap<u64, Buffer<u8>>,
    programs: HashMap<u64, Program>,
    kernels: HashMap<u64, Kernel>,
    events: HashMap<u64, Arc<Event>>,
}

#[cfg(feature = "opencl")]
impl OpenClState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn intern_platform(&mut self, raw: cl_platform_id) -> PlatformId {
        if let Some((&id, _)) = self.platforms.iter().find(|(_, &p)| p == raw) {
            return PlatformId::new(id);
        }
        let id = self.allocate_id();
        self.platforms.insert(id, raw);
        PlatformId::new(id)
    }

    fn intern_device(&mut self, raw: cl_device_id) -> DeviceId {
        if let Some((&id, _)) = self.devices.iter().find(|(_, &d)| d == raw) {
            return DeviceId::new(id);
        }
        let id = self.allocate_id();
        self.devices.insert(id, raw);
        DeviceId::new(id)
    }

    fn platform(&self, platform: PlatformId) -> ApiResult<Platform> {
        self.platforms
            .get(&platform.id())
            .map(|&raw| Platform::new(raw))
            .ok_or_else(|| ApiError::new(status::INVALID_PLATFORM, format!("unknown {platform}")))
    }

    fn device(&self, device: DeviceId) -> ApiResult<cl_device_id> {
        self.devices
            .get(&device.id())
            .copied()
            .ok_or_else(|| ApiError::new(status::INVALID_DEVICE, format!("unknown {device}")))
    }

    fn devices(&self, devices: &[DeviceId]) -> ApiResult<Vec<cl_device_id>> {
        devices.iter().map(|&device| self.device(device)).collect()
    }

    fn context(&self, context: ContextId) -> ApiResult<&Context> {
        self.contexts
            .get(&context.id())
            .ok_or_else(|| ApiError::new(status::INVALID_CONTEXT, format!("unknown {context}")))
    }

    fn queue(&self, queue: QueueId) -> ApiResult<&Arc<CommandQueue>> {
        self.queues
            .get(&queue.id())
            .ok_or_else(|| ApiError::new(status::INVALID_COMMAND_QUEUE, format!("unknown {queue}")))
    }

    fn program(&self, program: ProgramId) -> ApiResult<&Program> {
        self.programs
            .get(&program.id())
            .ok_or_else(|| ApiError::new(status::INVALID_PROGRAM, format!("unknown {program}")))
    }

    fn kernel(&self, kernel: KernelId) -> ApiResult<&Kernel> {
        self.kernels
            .get(&kernel.id())
            .ok_or_else(|| ApiError::new(status::INVALID_KERNEL, format!("unknown {kernel}")))
    }

    fn event(&self, event: EventId) -> ApiResult<&Arc<Event>> {
        self.events
            .get(&event.id())
            .ok_or_else(|| ApiError::new(status::INVALID_EVENT, format!("unknown {event}")))
    }

    fn wait_list(&self, wait_for: &[EventId]) -> ApiResult<Vec<cl_event>> {
        wait_for
            .iter()
            .map(|&event| {
                self.events
                    .get(&event.id())
                    .map(|event| event.get())
                    .ok_or_else(|| ApiError::new(status::INVALID_EVENT_WAIT_LIST, format!("unknown {event}")))
            })
            .collect()
    }
}

/// [`ComputeApi`] backed by an OpenCL driver
#[cfg(feature = "opencl")]
pub struct OpenClApi {
    state: Mutex<OpenClState>,
}

// The raw ids and objects held here are opaque driver handles. OpenCL API
// calls are thread-safe (except clSetKernelArg, which runs under the mutex).
#[cfg(feature = "opencl")]
unsafe impl Send for OpenClApi {}
#[cfg(feature = "opencl")]
unsafe impl Sync for OpenClApi {}

#[cfg(feature = "opencl")]
impl OpenClApi {
    /// Connect to the installed OpenCL platforms
    pub fn new() -> Result<Self> {
        let platforms = get_platforms().map_err(|e| Error::DiscoveryFailed(cl_error(e)))?;
        if platforms.is_empty() {
            return Err(Error::NoPlatformFound);
        }

        let mut state = OpenClState::default();
        for platform in &platforms {
            state.intern_platform(platform.id());
        }
        tracing::debug!(platforms = platforms.len(), "opencl_connected");

        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Whether an OpenCL ICD with at least one platform is installed
    pub fn is_available() -> bool {
        get_platforms().map(|p| !p.is_empty()).unwrap_or(false)
    }
}

#[cfg(feature = "opencl")]
impl ComputeApi for OpenClApi {
    fn backend_name(&self) -> &'static str {
        "opencl"
    }

    fn platforms(&self) -> ApiResult<Vec<PlatformId>> {
        let platforms = get_platforms().map_err(cl_error)?;
        let mut state = self.state.lock();
        Ok(platforms.iter().map(|p| state.intern_platform(p.id())).collect())
    }

    fn platform_info(&self, platform: PlatformId) -> ApiResult<PlatformInfo> {
        let platform = self.state.lock().platform(platform)?;
        Ok(PlatformInfo {
            name: platform.name().map_err(cl_error)?,
            vendor: platform.vendor().map_err(cl_error)?,
            version: platform.version().map_err(cl_error)?,
        })
    }

    fn devices(&self, platform: PlatformId, class: DeviceClass) -> ApiResult<Vec<DeviceId>> {
        let platform = self.state.lock().platform(platform)?;
        let raw = platform.get_devices(to_cl_type(class)).map_err(cl_error)?;
        let mut state = self.state.lock();
        Ok(raw.into_iter().map(|d| state.intern_device(d)).collect())
    }

    fn device_info(&self, device: DeviceId) -> ApiResult<DeviceInfo> {
        let device = Device::new(self.state.lock().device(device)?);
        Ok(DeviceInfo {
            name: device.name().map_err(cl_error)?.trim().to_string(),
            vendor: device.vendor().map_err(cl_error)?.trim().to_string(),
            class: from_cl_type(device.dev_type().map_err(cl_error)?),
            max_work_group_size: device.max_work_group_size().map_err(cl_error)?,
            compute_units: device.max_compute_units().map_err(cl_error)?,
        })
    }

    fn create_context(&self, platform: PlatformId, devices: &[DeviceId]) -> ApiResult<ContextId> {
        let mut state = self.state.lock();
        state.platform(platform)?;
        let raw = state.devices(devices)?;
        let context = Context::from_devices(&raw, &[], None, ptr::null_mut()).map_err(cl_error)?;

        let id = state.allocate_id();
        state.contexts.insert(id, context);
        Ok(ContextId::new(id))
    }

    fn create_queue(&self, context: ContextId, device: DeviceId, properties: QueueProperties) -> ApiResult<QueueId> {
        let mut state = self.state.lock();
        let raw_device = state.device(device)?;
        let flags = if properties.profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };

        #[allow(deprecated)]
        let queue = CommandQueue::create(state.context(context)?, raw_device, flags).map_err(cl_error)?;

        let id = state.allocate_id();
        state.queues.insert(id, Arc::new(queue));
        Ok(QueueId::new(id))
    }

    fn finish(&self, queue: QueueId) -> ApiResult<()> {
        let queue = Arc::clone(self.state.lock().queue(queue)?);
        queue.finish().map_err(cl_error)
    }

    fn create_buffer(&self, context: ContextId, size_bytes: usize, access: AccessDirection) -> ApiResult<BufferId> {
        let mut state = self.state.lock();
        let flags = match access {
            AccessDirection::ReadOnly => CL_MEM_READ_ONLY,
            AccessDirection::WriteOnly => CL_MEM_WRITE_ONLY,
        };
        // SAFETY: no host pointer is supplied, the driver owns the storage.
        let buffer = unsafe { Buffer::<u8>::create(state.context(context)?, flags, size_bytes, ptr::null_mut()) }
            .map_err(cl_error)?;

        let id = state.allocate_id();
        state.buffers.insert(id, buffer);
        Ok(BufferId::new(id))
    }

    fn write_buffer(&self, queue: QueueId, buffer: BufferId, data: &[u8]) -> ApiResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let queue = state
            .queues
            .get(&queue.id())
            .ok_or_else(|| ApiError::new(status::INVALID_COMMAND_QUEUE, format!("unknown {queue}")))?;
        let target = state
            .buffers
            .get_mut(&buffer.id())
            .ok_or_else(|| ApiError::new(status::INVALID_MEM_OBJECT, format!("unknown {buffer}")))?;

        // SAFETY: blocking write; `data` outlives the call.
        unsafe { queue.enqueue_write_buffer(target, CL_BLOCKING, 0, data, &[]) }.map_err(cl_error)?;
        Ok(())
    }

    fn read_buffer(&self, queue: QueueId, buffer: BufferId, data: &mut [u8], wait_for: &[EventId]) -> ApiResult<()> {
        // Enqueue under the lock, wait without it.
        let pending = {
            let state = self.state.lock();
            let waits = state.wait_list(wait_for)?;
            let source = state
                .buffers
                .get(&buffer.id())
                .ok_or_else(|| ApiError::new(status::INVALID_MEM_OBJECT, format!("unknown {buffer}")))?;

            // SAFETY: `data` stays borrowed until the read event completes below.
            unsafe { state.queue(queue)?.enqueue_read_buffer(source, CL_NON_BLOCKING, 0, data, &waits) }
                .map_err(cl_error)?
        };
        pending.wait().map_err(cl_error)
    }

    fn create_program(&self, context: ContextId, source: &str) -> ApiResult<ProgramId> {
        let mut state = self.state.lock();
        let program = Program::create_from_source(state.context(context)?, source).map_err(cl_error)?;

        let id = state.allocate_id();
        state.programs.insert(id, program);
        Ok(ProgramId::new(id))
    }

    fn build_program(&self, program: ProgramId, devices: &[DeviceId], options: &str) -> ApiResult<()> {
        let mut guard = self.state.lock();
        let raw = guard.devices(devices)?;
        let program = guard
            .programs
            .get_mut(&program.id())
            .ok_or_else(|| ApiError::new(status::INVALID_PROGRAM, format!("unknown {program}")))?;
        program.build(&raw, options).map_err(cl_error)
    }

    fn build_log(&self, program: ProgramId, device: DeviceId) -> ApiResult<String> {
        let state = self.state.lock();
        let device = state.device(device)?;
        state.program(program)?.get_build_log(device).map_err(cl_error)
    }

    fn create_kernel(&self, program: ProgramId, entry_point: &str) -> ApiResult<KernelId> {
        let mut state = self.state.lock();
        let kernel = Kernel::create(state.program(program)?, entry_point).map_err(cl_error)?;

        let id = state.allocate_id();
        state.kernels.insert(id, kernel);
        Ok(KernelId::new(id))
    }

    fn kernel_arg_count(&self, kernel: KernelId) -> ApiResult<u32> {
        self.state.lock().kernel(kernel)?.num_args().map_err(cl_error)
    }

    fn set_kernel_arg(&self, kernel: KernelId, index: u32, arg: KernelArg) -> ApiResult<()> {
        let state = self.state.lock();
        let kernel = state.kernel(kernel)?;

        // SAFETY: argument values are copied by the driver during the call.
        match arg {
            KernelArg::Float(value) => unsafe { kernel.set_arg(index, &value) },
            KernelArg::Buffer(buffer) => {
                let mem = state
                    .buffers
                    .get(&buffer.id())
                    .ok_or_else(|| ApiError::new(status::INVALID_MEM_OBJECT, format!("unknown {buffer}")))?
                    .get();
                unsafe { kernel.set_arg(index, &mem) }
            }
        }
        .map_err(cl_error)
    }

    fn enqueue_kernel(&self, queue: QueueId, kernel: KernelId, range: &NdRange, wait_for: &[EventId]) -> ApiResult<EventId> {
        let mut state = self.state.lock();
        let waits = state.wait_list(wait_for)?;
        let local = range.local;
        let local_ptr = local.as_ref().map_or(ptr::null(), |sizes| sizes.as_ptr());

        // SAFETY: size arrays outlive the call and hold `dimensions` entries.
        let event = unsafe {
            state.queue(queue)?.enqueue_nd_range_kernel(
                state.kernel(kernel)?.get(),
                range.dimensions,
                ptr::null(),
                range.global.as_ptr(),
                local_ptr,
                &waits,
            )
        }
        .map_err(cl_error)?;

        let id = state.allocate_id();
        state.events.insert(id, Arc::new(event));
        Ok(EventId::new(id))
    }

    fn wait_for_events(&self, events: &[EventId]) -> ApiResult<()> {
        if events.is_empty() {
            return Err(ApiError::new(status::INVALID_VALUE, "empty event list"));
        }
        let pending = {
            let state = self.state.lock();
            events
                .iter()
                .map(|&event| state.event(event).map(Arc::clone))
                .collect::<ApiResult<Vec<_>>>()?
        };
        pending.iter().try_for_each(|event| event.wait().map_err(cl_error))
    }

    fn event_profiling(&self, event: EventId) -> ApiResult<ProfilingInfo> {
        let state = self.state.lock();
        let event = state.event(event)?;
        Ok(ProfilingInfo {
            queued: event.profiling_command_queued().map_err(cl_error)?,
            start: event.profiling_command_start().map_err(cl_error)?,
            end: event.profiling_command_end().map_err(cl_error)?,
        })
    }

    fn release(&self, handle: Handle) -> ApiResult<()> {
        let mut state = self.state.lock();
        let (removed, code) = match handle {
            Handle::Context(h) => (state.contexts.remove(&h.id()).is_some(), status::INVALID_CONTEXT),
            Handle::Queue(h) => (state.queues.remove(&h.id()).is_some(), status::INVALID_COMMAND_QUEUE),
            Handle::Buffer(h) => (state.buffers.remove(&h.id()).is_some(), status::INVALID_MEM_OBJECT),
            Handle::Program(h) => (state.programs.remove(&h.id()).is_some(), status::INVALID_PROGRAM),
            Handle::Kernel(h) => (state.kernels.remove(&h.id()).is_some(), status::INVALID_KERNEL),
            Handle::Event(h) => (state.events.remove(&h.id()).is_some(), status::INVALID_EVENT),
        };

        if removed {
            Ok(())
        } else {
            Err(ApiError::new(code, format!("{handle} is not live")))
        }
    }
}

/// Placeholder when the `opencl` feature is disabled
#[cfg(not(feature = "opencl"))]
pub struct OpenClApi;

#[cfg(not(feature = "opencl"))]
impl OpenClApi {
    pub fn new() -> Result<Self> {
        Err(Error::Unsupported(FEATURE_DISABLED.into()))
    }

    pub fn is_available() -> bool {
        false
    }
}
