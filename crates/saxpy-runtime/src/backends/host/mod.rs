//! Host reference device
//!
//! An in-process [`ComputeApi`] exposing one platform with one device. It
//! keeps the same object model and status codes as an OpenCL driver so the
//! pipeline can be exercised end to end without an accelerator.
//!
//! # Architecture
//!
//! ```text
//! HostApi
//! ├── HostState   - contexts, queues, buffers, programs, kernels, events
//! ├── compiler    - OpenCL C subset front end, build logs
//! └── executor    - native entry points, work-groups run on rayon
//! ```
//!
//! Commands complete at submission: writes and reads copy immediately and a
//! kernel has finished by the time `enqueue_kernel` returns, with its
//! timestamps taken from a monotonic clock.

mod compiler;
mod executor;

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::api::{
    AccessDirection, BufferId, ComputeApi, ContextId, DeviceClass, DeviceId, DeviceInfo, EventId, Handle,
    KernelArg, KernelId, NdRange, PlatformId, PlatformInfo, ProfilingInfo, ProgramId, QueueId, QueueProperties,
};
use crate::status::{self, ApiError, ApiResult};
use compiler::{CompileError, CompiledSource, Param, ParamKind};
use executor::{Launch, NativeKernel, ARG_A, ARG_ALPHA, ARG_B, ARG_C};

/// The single platform exposed by [`HostApi`]
pub const PLATFORM: PlatformId = PlatformId::new(1);
/// The single device of [`PLATFORM`]
pub const DEVICE: DeviceId = DeviceId::new(1);

/// Largest work-group the host device accepts
pub const MAX_WORK_GROUP_SIZE: usize = 1024;

struct ContextRecord {
    devices: Vec<DeviceId>,
}

struct QueueRecord {
    profiling: bool,
}

struct BufferRecord {
    len_bytes: usize,
    // u32 storage keeps the f32 view aligned
    words: Vec<u32>,
}

impl BufferRecord {
    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..self.len_bytes]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.words)[..self.len_bytes]
    }

    fn floats(&self) -> &[f32] {
        &bytemuck::cast_slice::<u32, f32>(&self.words)[..self.len_bytes / 4]
    }
}

enum BuildState {
    NotBuilt,
    Built(CompiledSource),
    Failed,
}

struct ProgramRecord {
    context: ContextId,
    source: String,
    state: BuildState,
    logs: HashMap<DeviceId, String>,
}

struct KernelRecord {
    name: String,
    native: NativeKernel,
    params: Vec<Param>,
    args: Vec<Option<KernelArg>>,
}

struct EventRecord {
    profiling: Option<ProfilingInfo>,
}

#[derive(Default)]
struct HostState {
    next_id: u64,
    contexts: HashMap<u64, ContextRecord>,
    queues: HashMap<u64, QueueRecord>,
    buffers: HashMap<u64, BufferRecord>,
    programs: HashMap<u64, ProgramRecord>,
    kernels: HashMap<u64, KernelRecord>,
    events: HashMap<u64, EventRecord>,
}

impl HostState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn queue(&self, queue: QueueId) -> ApiResult<&QueueRecord> {
        self.queues
            .get(&queue.id())
            .ok_or_else(|| ApiError::new(status::INVALID_COMMAND_QUEUE, format!("unknown {queue}")))
    }

    fn buffer(&self, buffer: BufferId) -> ApiResult<&BufferRecord> {
        self.buffers
            .get(&buffer.id())
            .ok_or_else(|| ApiError::new(status::INVALID_MEM_OBJECT, format!("unknown {buffer}")))
    }

    fn program(&self, program: ProgramId) -> ApiResult<&ProgramRecord> {
        self.programs
            .get(&program.id())
            .ok_or_else(|| ApiError::new(status::INVALID_PROGRAM, format!("unknown {program}")))
    }

    fn check_wait_list(&self, wait_for: &[EventId]) -> ApiResult<()> {
        match wait_for.iter().find(|event| !self.events.contains_key(&event.id())) {
            Some(event) => Err(ApiError::new(status::INVALID_EVENT_WAIT_LIST, format!("unknown {event}"))),
            None => Ok(()),
        }
    }
}

/// In-process reference implementation of [`ComputeApi`]
pub struct HostApi {
    class: DeviceClass,
    state: Mutex<HostState>,
    epoch: Instant,
}

impl HostApi {
    /// A host device reporting itself as a CPU
    pub fn new() -> Self {
        Self::emulating(DeviceClass::Cpu)
    }

    /// A host device reporting itself as `class`, so that selection by class
    /// can be exercised
    pub fn emulating(class: DeviceClass) -> Self {
        let class = match class {
            DeviceClass::Default | DeviceClass::All => DeviceClass::Cpu,
            concrete => concrete,
        };
        Self {
            class,
            state: Mutex::new(HostState::default()),
            epoch: Instant::now(),
        }
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn check_platform(platform: PlatformId) -> ApiResult<()> {
        if platform == PLATFORM {
            Ok(())
        } else {
            Err(ApiError::new(status::INVALID_PLATFORM, format!("unknown {platform}")))
        }
    }

    fn check_device(device: DeviceId) -> ApiResult<()> {
        if device == DEVICE {
            Ok(())
        } else {
            Err(ApiError::new(status::INVALID_DEVICE, format!("unknown {device}")))
        }
    }
}

impl Default for HostApi {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeApi for HostApi {
    fn backend_name(&self) -> &'static str {
        "host"
    }

    fn platforms(&self) -> ApiResult<Vec<PlatformId>> {
        Ok(vec![PLATFORM])
    }

    fn platform_info(&self, platform: PlatformId) -> ApiResult<PlatformInfo> {
        Self::check_platform(platform)?;
        Ok(PlatformInfo {
            name: "Host Reference Platform".to_string(),
            vendor: "saxpy-runtime".to_string(),
            version: format!("OpenCL 1.2 saxpy-runtime {}", env!("CARGO_PKG_VERSION")),
        })
    }

    fn devices(&self, platform: PlatformId, class: DeviceClass) -> ApiResult<Vec<DeviceId>> {
        Self::check_platform(platform)?;
        if class.admits(self.class) {
            Ok(vec![DEVICE])
        } else {
            Err(ApiError::new(status::DEVICE_NOT_FOUND, format!("no {class} device")))
        }
    }

    fn device_info(&self, device: DeviceId) -> ApiResult<DeviceInfo> {
        Self::check_device(device)?;
        Ok(DeviceInfo {
            name: "Host Reference Device".to_string(),
            vendor: "saxpy-runtime".to_string(),
            class: self.class,
            max_work_group_size: MAX_WORK_GROUP_SIZE,
            compute_units: rayon::current_num_threads() as u32,
        })
    }

    fn create_context(&self, platform: PlatformId, devices: &[DeviceId]) -> ApiResult<ContextId> {
        Self::check_platform(platform)?;
        if devices.is_empty() {
            return Err(ApiError::new(status::INVALID_VALUE, "empty device list"));
        }
        devices.iter().try_for_each(|&device| Self::check_device(device))?;

        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.contexts.insert(
            id,
            ContextRecord {
                devices: devices.to_vec(),
            },
        );
        Ok(ContextId::new(id))
    }

    fn create_queue(&self, context: ContextId, device: DeviceId, properties: QueueProperties) -> ApiResult<QueueId> {
        let mut state = self.state.lock();
        let record = state
            .contexts
            .get(&context.id())
            .ok_or_else(|| ApiError::new(status::INVALID_CONTEXT, format!("unknown {context}")))?;
        if !record.devices.contains(&device) {
            return Err(ApiError::new(status::INVALID_DEVICE, format!("{device} is not part of {context}")));
        }

        let id = state.allocate_id();
        state.queues.insert(
            id,
            QueueRecord {
                profiling: properties.profiling,
            },
        );
        Ok(QueueId::new(id))
    }

    fn finish(&self, queue: QueueId) -> ApiResult<()> {
        self.state.lock().queue(queue).map(|_| ())
    }

    fn create_buffer(&self, context: ContextId, size_bytes: usize, access: AccessDirection) -> ApiResult<BufferId> {
        if size_bytes == 0 {
            return Err(ApiError::new(status::INVALID_BUFFER_SIZE, "size must be non-zero"));
        }

        let mut state = self.state.lock();
        if !state.contexts.contains_key(&context.id()) {
            return Err(ApiError::new(status::INVALID_CONTEXT, format!("unknown {context}")));
        }

        let len_words = size_bytes.div_ceil(4);
        let mut words = Vec::new();
        words.try_reserve_exact(len_words).map_err(|e| {
            ApiError::new(status::MEM_OBJECT_ALLOCATION_FAILURE, format!("{size_bytes} bytes: {e}"))
        })?;
        words.resize(len_words, 0u32);

        let id = state.allocate_id();
        state.buffers.insert(
            id,
            BufferRecord {
                len_bytes: size_bytes,
                words,
            },
        );
        tracing::trace!(buffer = id, size_bytes, %access, "host_buffer_created");
        Ok(BufferId::new(id))
    }

    fn write_buffer(&self, queue: QueueId, buffer: BufferId, data: &[u8]) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.queue(queue)?;
        let record = state
            .buffers
            .get_mut(&buffer.id())
            .ok_or_else(|| ApiError::new(status::INVALID_MEM_OBJECT, format!("unknown {buffer}")))?;

        if data.len() > record.len_bytes {
            return Err(ApiError::new(
                status::INVALID_VALUE,
                format!("{} bytes do not fit in {}-byte {buffer}", data.len(), record.len_bytes),
            ));
        }
        record.bytes_mut()[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, queue: QueueId, buffer: BufferId, data: &mut [u8], wait_for: &[EventId]) -> ApiResult<()> {
        let state = self.state.lock();
        state.queue(queue)?;
        state.check_wait_list(wait_for)?;
        let record = state.buffer(buffer)?;

        if data.len() > record.len_bytes {
            return Err(ApiError::new(
                status::INVALID_VALUE,
                format!("{} bytes requested from {}-byte {buffer}", data.len(), record.len_bytes),
            ));
        }
        data.copy_from_slice(&record.bytes()[..data.len()]);
        Ok(())
    }

    fn create_program(&self, context: ContextId, source: &str) -> ApiResult<ProgramId> {
        if source.trim().is_empty() {
            return Err(ApiError::new(status::INVALID_VALUE, "empty program source"));
        }

        let mut state = self.state.lock();
        if !state.contexts.contains_key(&context.id()) {
            return Err(ApiError::new(status::INVALID_CONTEXT, format!("unknown {context}")));
        }

        let id = state.allocate_id();
        state.programs.insert(
            id,
            ProgramRecord {
                context,
                source: source.to_string(),
                state: BuildState::NotBuilt,
                logs: HashMap::new(),
            },
        );
        Ok(ProgramId::new(id))
    }

    fn build_program(&self, program: ProgramId, devices: &[DeviceId], options: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        let context = state.program(program)?.context;
        let context_devices = state
            .contexts
            .get(&context.id())
            .map(|record| record.devices.clone())
            .ok_or_else(|| ApiError::new(status::INVALID_CONTEXT, format!("{program} outlived {context}")))?;
        if let Some(device) = devices.iter().find(|device| !context_devices.contains(device)) {
            return Err(ApiError::new(status::INVALID_DEVICE, format!("{device} is not part of {context}")));
        }

        let record = state
            .programs
            .get_mut(&program.id())
            .ok_or_else(|| ApiError::new(status::INVALID_PROGRAM, format!("unknown {program}")))?;

        let (outcome, log) = match compiler::compile(&record.source, options) {
            Ok(compiled) => {
                tracing::debug!(
                    %program,
                    entry_points = compiled.entry_points.len(),
                    options,
                    "host_program_built"
                );
                record.state = BuildState::Built(compiled);
                (Ok(()), String::new())
            }
            Err(CompileError::InvalidOptions(reason)) => {
                record.state = BuildState::Failed;
                let log = format!("error: {reason}\n");
                (Err(ApiError::new(status::INVALID_BUILD_OPTIONS, reason)), log)
            }
            Err(CompileError::Source(diagnostics)) => {
                record.state = BuildState::Failed;
                let log = compiler::render_log(&diagnostics);
                let detail = format!("{} error(s)", diagnostics.len());
                (Err(ApiError::new(status::BUILD_PROGRAM_FAILURE, detail)), log)
            }
        };

        let targets = if devices.is_empty() { context_devices } else { devices.to_vec() };
        for device in targets {
            record.logs.insert(device, log.clone());
        }
        outcome
    }

    fn build_log(&self, program: ProgramId, device: DeviceId) -> ApiResult<String> {
        let state = self.state.lock();
        let record = state.program(program)?;
        Self::check_device(device)?;
        Ok(record.logs.get(&device).cloned().unwrap_or_default())
    }

    fn create_kernel(&self, program: ProgramId, entry_point: &str) -> ApiResult<KernelId> {
        let mut state = self.state.lock();
        let record = state.program(program)?;

        let BuildState::Built(compiled) = &record.state else {
            return Err(ApiError::new(
                status::INVALID_PROGRAM_EXECUTABLE,
                format!("{program} has no successfully built executable"),
            ));
        };
        let entry = compiled
            .entry_point(entry_point)
            .ok_or_else(|| ApiError::new(status::INVALID_KERNEL_NAME, format!("'{entry_point}' not found in {program}")))?;
        let native =
            NativeKernel::resolve(entry, compiled).map_err(|reason| ApiError::new(status::INVALID_KERNEL_NAME, reason))?;

        let kernel = KernelRecord {
            name: entry.name.clone(),
            native,
            params: entry.params.clone(),
            args: vec![None; entry.params.len()],
        };

        let id = state.allocate_id();
        state.kernels.insert(id, kernel);
        Ok(KernelId::new(id))
    }

    fn kernel_arg_count(&self, kernel: KernelId) -> ApiResult<u32> {
        let state = self.state.lock();
        state
            .kernels
            .get(&kernel.id())
            .map(|record| record.params.len() as u32)
            .ok_or_else(|| ApiError::new(status::INVALID_KERNEL, format!("unknown {kernel}")))
    }

    fn set_kernel_arg(&self, kernel: KernelId, index: u32, arg: KernelArg) -> ApiResult<()> {
        let mut state = self.state.lock();
        if let KernelArg::Buffer(buffer) = arg {
            state.buffer(buffer)?;
        }

        let record = state
            .kernels
            .get_mut(&kernel.id())
            .ok_or_else(|| ApiError::new(status::INVALID_KERNEL, format!("unknown {kernel}")))?;
        let param = record.params.get(index as usize).ok_or_else(|| {
            ApiError::new(
                status::INVALID_ARG_INDEX,
                format!("'{}' declares {} parameters", record.name, record.params.len()),
            )
        })?;

        match (param.kind, arg) {
            (ParamKind::Scalar, KernelArg::Float(_)) if param.ty == "float" => {}
            (ParamKind::Scalar, KernelArg::Float(_)) => {
                return Err(ApiError::new(
                    status::INVALID_ARG_VALUE,
                    format!("parameter '{}' is {}, not float", param.name, param.ty),
                ))
            }
            (ParamKind::ReadOnlyBuffer | ParamKind::Buffer, KernelArg::Buffer(_)) => {}
            _ => {
                return Err(ApiError::new(
                    status::INVALID_ARG_SIZE,
                    format!("{}-byte value for parameter '{}'", arg.size_bytes(), param.name),
                ))
            }
        }

        record.args[index as usize] = Some(arg);
        Ok(())
    }

    fn enqueue_kernel(&self, queue: QueueId, kernel: KernelId, range: &NdRange, wait_for: &[EventId]) -> ApiResult<EventId> {
        let queued = self.now_ns();
        let mut state = self.state.lock();
        let profiling = state.queue(queue)?.profiling;
        state.check_wait_list(wait_for)?;

        let record = state
            .kernels
            .get(&kernel.id())
            .ok_or_else(|| ApiError::new(status::INVALID_KERNEL, format!("unknown {kernel}")))?;

        if range.dimensions != 1 {
            return Err(ApiError::new(
                status::INVALID_WORK_DIMENSION,
                format!("host device runs one-dimensional ranges, got {}", range.dimensions),
            ));
        }
        let global_size = range.global[0];
        if global_size == 0 {
            return Err(ApiError::new(status::INVALID_GLOBAL_WORK_SIZE, "global size is zero"));
        }
        let local_size = match range.local {
            Some([local, ..]) if local == 0 || global_size % local != 0 => {
                return Err(ApiError::new(
                    status::INVALID_WORK_GROUP_SIZE,
                    format!("global size {global_size} is not a multiple of local size {local}"),
                ));
            }
            Some([local, ..]) if local > MAX_WORK_GROUP_SIZE => {
                return Err(ApiError::new(
                    status::INVALID_WORK_GROUP_SIZE,
                    format!("local size {local} exceeds device maximum {MAX_WORK_GROUP_SIZE}"),
                ));
            }
            Some([local, ..]) => local,
            None => default_local_size(global_size),
        };

        let args = record
            .args
            .iter()
            .enumerate()
            .map(|(index, arg)| {
                arg.ok_or_else(|| {
                    ApiError::new(status::INVALID_KERNEL_ARGS, format!("argument {index} of '{}' is not set", record.name))
                })
            })
            .collect::<ApiResult<Vec<_>>>()?;

        let (KernelArg::Float(alpha), KernelArg::Buffer(a), KernelArg::Buffer(b), KernelArg::Buffer(c)) =
            (args[ARG_ALPHA], args[ARG_A], args[ARG_B], args[ARG_C])
        else {
            return Err(ApiError::new(status::INVALID_KERNEL_ARGS, "argument kinds do not match the signature"));
        };
        let native = record.native;
        let name = record.name.clone();

        // Output storage is taken out of the map for the launch; inputs that
        // alias it read a snapshot.
        let mut output = std::mem::take(
            &mut state
                .buffers
                .get_mut(&c.id())
                .ok_or_else(|| ApiError::new(status::INVALID_MEM_OBJECT, format!("unknown {c}")))?
                .words,
        );
        let snapshot: Vec<f32> = if a == c || b == c {
            bytemuck::cast_slice::<u32, f32>(&output).to_vec()
        } else {
            Vec::new()
        };

        let start = self.now_ns();
        let outcome = match (operand(&state, a, c, &snapshot), operand(&state, b, c, &snapshot)) {
            (Ok(a), Ok(b)) => {
                let output_len = state.buffer(c).map_or(0, |r| r.len_bytes / 4);
                executor::execute(
                    native,
                    Launch {
                        alpha,
                        a,
                        b,
                        c: &mut bytemuck::cast_slice_mut::<u32, f32>(&mut output)[..output_len],
                        global_size,
                        local_size,
                    },
                )
                .map_err(|reason| ApiError::new(status::OUT_OF_RESOURCES, reason))
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        let end = self.now_ns();

        if let Some(record) = state.buffers.get_mut(&c.id()) {
            record.words = output;
        }
        outcome?;

        tracing::trace!(kernel = %name, global_size, local_size, device_ns = end - start, "host_kernel_executed");

        let id = state.allocate_id();
        state.events.insert(
            id,
            EventRecord {
                profiling: profiling.then_some(ProfilingInfo { queued, start, end }),
            },
        );
        Ok(EventId::new(id))
    }

    fn wait_for_events(&self, events: &[EventId]) -> ApiResult<()> {
        if events.is_empty() {
            return Err(ApiError::new(status::INVALID_VALUE, "empty event list"));
        }
        let state = self.state.lock();
        match events.iter().find(|event| !state.events.contains_key(&event.id())) {
            Some(event) => Err(ApiError::new(status::INVALID_EVENT, format!("unknown {event}"))),
            None => Ok(()),
        }
    }

    fn event_profiling(&self, event: EventId) -> ApiResult<ProfilingInfo> {
        let state = self.state.lock();
        let record = state
            .events
            .get(&event.id())
            .ok_or_else(|| ApiError::new(status::INVALID_EVENT, format!("unknown {event}")))?;
        record.profiling.ok_or_else(|| {
            ApiError::new(
                status::PROFILING_INFO_NOT_AVAILABLE,
                "queue was created without profiling",
            )
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

/// Read view of an input operand; an input aliasing the output reads the
/// pre-launch snapshot
fn operand<'s>(state: &'s HostState, buffer: BufferId, output: BufferId, snapshot: &'s [f32]) -> ApiResult<&'s [f32]> {
    if buffer == output {
        Ok(snapshot)
    } else {
        state.buffer(buffer).map(BufferRecord::floats)
    }
}

/// Largest power of two dividing `global_size`, capped at the device maximum
fn default_local_size(global_size: usize) -> usize {
    let largest_pow2_divisor = 1usize << global_size.trailing_zeros();
    largest_pow2_divisor.min(MAX_WORK_GROUP_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{build_options, kernel_bundle, KernelVariant};

    struct Fixture {
        api: HostApi,
        context: ContextId,
        queue: QueueId,
    }

    fn fixture(profiling: bool) -> Fixture {
        let api = HostApi::new();
        let context = api.create_context(PLATFORM, &[DEVICE]).unwrap();
        let queue = api.create_queue(context, DEVICE, QueueProperties { profiling }).unwrap();
        Fixture { api, context, queue }
    }

    fn floats(values: &[f32]) -> &[u8] {
        bytemuck::cast_slice(values)
    }

    #[test]
    fn buffer_round_trip() {
        let f = fixture(false);
        let buffer = f.api.create_buffer(f.context, 10, AccessDirection::ReadOnly).unwrap();
        let data: Vec<u8> = (0..10).collect();
        f.api.write_buffer(f.queue, buffer, &data).unwrap();

        let mut back = vec![0u8; 10];
        f.api.read_buffer(f.queue, buffer, &mut back, &[]).unwrap();
        assert_eq!(back, data);

        let err = f.api.write_buffer(f.queue, buffer, &[0u8; 11]).unwrap_err();
        assert_eq!(err.code, status::INVALID_VALUE);
    }

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let f = fixture(false);
        let err = f.api.create_buffer(f.context, 0, AccessDirection::WriteOnly).unwrap_err();
        assert_eq!(err.code, status::INVALID_BUFFER_SIZE);
    }

    #[test]
    fn failed_build_keeps_log() {
        let f = fixture(false);
        let program = f.api.create_program(f.context, "__kernel void k(float a) { a = b; }").unwrap();
        let err = f.api.build_program(program, &[DEVICE], "").unwrap_err();
        assert_eq!(err.code, status::BUILD_PROGRAM_FAILURE);

        let log = f.api.build_log(program, DEVICE).unwrap();
        assert!(log.contains("use of undeclared identifier 'b'"));
        assert!(log.ends_with("1 error generated.\n"));

        let err = f.api.create_kernel(program, "k").unwrap_err();
        assert_eq!(err.code, status::INVALID_PROGRAM_EXECUTABLE);
    }

    #[test]
    fn bad_options_are_invalid_build_options() {
        let f = fixture(false);
        let program = f.api.create_program(f.context, &kernel_bundle()).unwrap();
        let err = f.api.build_program(program, &[DEVICE], "--fast").unwrap_err();
        assert_eq!(err.code, status::INVALID_BUILD_OPTIONS);
        assert!(!f.api.build_log(program, DEVICE).unwrap().is_empty());
    }

    fn built_kernel(f: &Fixture, variant: KernelVariant, n: usize) -> KernelId {
        let program = f.api.create_program(f.context, &kernel_bundle()).unwrap();
        f.api.build_program(program, &[DEVICE], &build_options(n)).unwrap();
        f.api.create_kernel(program, variant.entry_point()).unwrap()
    }

    #[test]
    fn kernel_argument_validation() {
        let f = fixture(false);
        let kernel = built_kernel(&f, KernelVariant::Elementwise, 16);
        let buffer = f.api.create_buffer(f.context, 64, AccessDirection::ReadOnly).unwrap();

        assert_eq!(f.api.kernel_arg_count(kernel).unwrap(), 4);
        assert_eq!(
            f.api.set_kernel_arg(kernel, 4, KernelArg::Float(1.0)).unwrap_err().code,
            status::INVALID_ARG_INDEX
        );
        assert_eq!(
            f.api.set_kernel_arg(kernel, 0, KernelArg::Buffer(buffer)).unwrap_err().code,
            status::INVALID_ARG_SIZE
        );
        assert_eq!(
            f.api.set_kernel_arg(kernel, 1, KernelArg::Buffer(BufferId::new(999))).unwrap_err().code,
            status::INVALID_MEM_OBJECT
        );

        f.api.set_kernel_arg(kernel, 0, KernelArg::Float(2.0)).unwrap();
        let err = f
            .api
            .enqueue_kernel(f.queue, kernel, &NdRange::linear(16, 16), &[])
            .unwrap_err();
        assert_eq!(err.code, status::INVALID_KERNEL_ARGS);
    }

    #[test]
    fn runs_saxpy_with_profiling() {
        let f = fixture(true);
        let n = 256;
        let kernel = built_kernel(&f, KernelVariant::Strided, n);

        let a: Vec<f32> = (0..n).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..n).map(|i| (n - i) as f32).collect();
        let bytes = n * 4;
        let buf_a = f.api.create_buffer(f.context, bytes, AccessDirection::ReadOnly).unwrap();
        let buf_b = f.api.create_buffer(f.context, bytes, AccessDirection::ReadOnly).unwrap();
        let buf_c = f.api.create_buffer(f.context, bytes, AccessDirection::WriteOnly).unwrap();
        f.api.write_buffer(f.queue, buf_a, floats(&a)).unwrap();
        f.api.write_buffer(f.queue, buf_b, floats(&b)).unwrap();

        for (index, arg) in [
            KernelArg::Float(2.0),
            KernelArg::Buffer(buf_a),
            KernelArg::Buffer(buf_b),
            KernelArg::Buffer(buf_c),
        ]
        .into_iter()
        .enumerate()
        {
            f.api.set_kernel_arg(kernel, index as u32, arg).unwrap();
        }

        let event = f.api.enqueue_kernel(f.queue, kernel, &NdRange::linear(n / 4, 32), &[]).unwrap();
        f.api.wait_for_events(&[event]).unwrap();

        let mut c = vec![0.0f32; n];
        f.api
            .read_buffer(f.queue, buf_c, bytemuck::cast_slice_mut(&mut c), &[event])
            .unwrap();
        assert!(c.iter().enumerate().all(|(i, &v)| v == (i + n) as f32));

        let timing = f.api.event_profiling(event).unwrap();
        assert!(timing.queued <= timing.start && timing.start <= timing.end);
    }

    #[test]
    fn indivisible_range_is_invalid_work_group_size() {
        let f = fixture(false);
        let kernel = built_kernel(&f, KernelVariant::Strided, 100);
        let err = f
            .api
            .enqueue_kernel(f.queue, kernel, &NdRange::linear(100, 32), &[])
            .unwrap_err();
        assert_eq!(err.code, status::INVALID_WORK_GROUP_SIZE);
    }

    #[test]
    fn profiling_requires_profiling_queue() {
        let f = fixture(false);
        let kernel = built_kernel(&f, KernelVariant::Elementwise, 32);
        let buffer = f.api.create_buffer(f.context, 128, AccessDirection::WriteOnly).unwrap();
        f.api.set_kernel_arg(kernel, 0, KernelArg::Float(1.0)).unwrap();
        for index in 1..4 {
            f.api.set_kernel_arg(kernel, index, KernelArg::Buffer(buffer)).unwrap();
        }
        let event = f.api.enqueue_kernel(f.queue, kernel, &NdRange::linear(32, 32), &[]).unwrap();
        let err = f.api.event_profiling(event).unwrap_err();
        assert_eq!(err.code, status::PROFILING_INFO_NOT_AVAILABLE);
    }

    #[test]
    fn double_release_is_an_error() {
        let f = fixture(false);
        f.api.release(f.queue.into()).unwrap();
        let err = f.api.release(f.queue.into()).unwrap_err();
        assert_eq!(err.code, status::INVALID_COMMAND_QUEUE);
    }

    #[test]
    fn devices_filter_by_class() {
        let api = HostApi::emulating(DeviceClass::Gpu);
        assert_eq!(api.devices(PLATFORM, DeviceClass::Gpu).unwrap(), vec![DEVICE]);
        let err = api.devices(PLATFORM, DeviceClass::Cpu).unwrap_err();
        assert_eq!(err.code, status::DEVICE_NOT_FOUND);
    }

    #[test]
    fn default_local_size_divides_global() {
        assert_eq!(default_local_size(96), 32);
        assert_eq!(default_local_size(1 << 20), MAX_WORK_GROUP_SIZE);
        assert_eq!(default_local_size(7), 1);
    }
}
