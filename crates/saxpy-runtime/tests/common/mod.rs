//! Shared helpers for the integration tests
//!
//! [`CountingApi`] wraps the host device, records every handle it hands out
//! and every release call it receives, and can be told to fail one stage.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use saxpy_runtime::api::{
    BufferId, ContextId, DeviceId, DeviceInfo, EventId, KernelId, PlatformId, PlatformInfo, ProfilingInfo,
    ProgramId, QueueId,
};
use saxpy_runtime::status::{self, ApiError, ApiResult};
use saxpy_runtime::{AccessDirection, ComputeApi, DeviceClass, Handle, HostApi, KernelArg, NdRange, QueueProperties};

/// Stage at which [`CountingApi`] injects a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    Queue,
    /// Fail the n-th buffer allocation (1-based)
    Buffer(usize),
    Build,
    Enqueue,
    Download,
    /// Every buffer release reports an error after releasing
    ReleaseBuffers,
}

#[derive(Default)]
struct Ledger {
    acquired: Vec<Handle>,
    releases: Vec<Handle>,
    buffers_created: usize,
    /// `wait_for` list of every `read_buffer` call, in call order
    read_waits: Vec<Vec<EventId>>,
}

pub struct CountingApi {
    inner: HostApi,
    fault: Fault,
    ledger: Mutex<Ledger>,
}

impl CountingApi {
    pub fn new(fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            inner: HostApi::emulating(DeviceClass::Gpu),
            fault,
            ledger: Mutex::new(Ledger::default()),
        })
    }

    fn acquired<H: Into<Handle> + Copy>(&self, result: ApiResult<H>) -> ApiResult<H> {
        if let Ok(handle) = &result {
            self.ledger.lock().acquired.push((*handle).into());
        }
        result
    }

    /// Every handle handed out, in acquisition order
    pub fn acquisitions(&self) -> Vec<Handle> {
        self.ledger.lock().acquired.clone()
    }

    /// Every release call, in call order
    pub fn releases(&self) -> Vec<Handle> {
        self.ledger.lock().releases.clone()
    }

    /// Wait list passed to each `read_buffer` call
    pub fn read_waits(&self) -> Vec<Vec<EventId>> {
        self.ledger.lock().read_waits.clone()
    }

    /// Events handed out by `enqueue_kernel`
    pub fn events(&self) -> Vec<EventId> {
        self.acquisitions()
            .into_iter()
            .filter_map(|handle| match handle {
                Handle::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    /// Release calls received per handle
    pub fn release_counts(&self) -> HashMap<Handle, usize> {
        let mut counts = HashMap::new();
        for handle in self.ledger.lock().releases.iter() {
            *counts.entry(*handle).or_insert(0) += 1;
        }
        counts
    }

    /// Panics unless every acquired handle was released exactly once and
    /// nothing else was released
    pub fn assert_released_exactly_once(&self) {
        let acquired = self.acquisitions();
        let counts = self.release_counts();
        for handle in &acquired {
            assert_eq!(counts.get(handle), Some(&1), "{handle} release count");
        }
        assert_eq!(counts.len(), acquired.len(), "released handles that were never acquired");
    }
}

/// Short kind name of a handle, for order assertions
pub fn kind(handle: &Handle) -> &'static str {
    match handle {
        Handle::Context(_) => "context",
        Handle::Queue(_) => "queue",
        Handle::Buffer(_) => "buffer",
        Handle::Program(_) => "program",
        Handle::Kernel(_) => "kernel",
        Handle::Event(_) => "event",
    }
}

fn injected(code: i32) -> ApiError {
    ApiError::new(code, "injected fault")
}

impl ComputeApi for CountingApi {
    fn backend_name(&self) -> &'static str {
        "counting"
    }

    fn platforms(&self) -> ApiResult<Vec<PlatformId>> {
        self.inner.platforms()
    }

    fn platform_info(&self, platform: PlatformId) -> ApiResult<PlatformInfo> {
        self.inner.platform_info(platform)
    }

    fn devices(&self, platform: PlatformId, class: DeviceClass) -> ApiResult<Vec<DeviceId>> {
        self.inner.devices(platform, class)
    }

    fn device_info(&self, device: DeviceId) -> ApiResult<DeviceInfo> {
        self.inner.device_info(device)
    }

    fn create_context(&self, platform: PlatformId, devices: &[DeviceId]) -> ApiResult<ContextId> {
        self.acquired(self.inner.create_context(platform, devices))
    }

    fn create_queue(&self, context: ContextId, device: DeviceId, properties: QueueProperties) -> ApiResult<QueueId> {
        if self.fault == Fault::Queue {
            return Err(injected(status::OUT_OF_HOST_MEMORY));
        }
        self.acquired(self.inner.create_queue(context, device, properties))
    }

    fn finish(&self, queue: QueueId) -> ApiResult<()> {
        self.inner.finish(queue)
    }

    fn create_buffer(&self, context: ContextId, size_bytes: usize, access: AccessDirection) -> ApiResult<BufferId> {
        let nth = {
            let mut ledger = self.ledger.lock();
            ledger.buffers_created += 1;
            ledger.buffers_created
        };
        if self.fault == Fault::Buffer(nth) {
            return Err(injected(status::MEM_OBJECT_ALLOCATION_FAILURE));
        }
        self.acquired(self.inner.create_buffer(context, size_bytes, access))
    }

    fn write_buffer(&self, queue: QueueId, buffer: BufferId, data: &[u8]) -> ApiResult<()> {
        self.inner.write_buffer(queue, buffer, data)
    }

    fn read_buffer(&self, queue: QueueId, buffer: BufferId, data: &mut [u8], wait_for: &[EventId]) -> ApiResult<()> {
        self.ledger.lock().read_waits.push(wait_for.to_vec());
        if self.fault == Fault::Download {
            return Err(injected(status::OUT_OF_RESOURCES));
        }
        self.inner.read_buffer(queue, buffer, data, wait_for)
    }

    fn create_program(&self, context: ContextId, source: &str) -> ApiResult<ProgramId> {
        self.acquired(self.inner.create_program(context, source))
    }

    fn build_program(&self, program: ProgramId, devices: &[DeviceId], options: &str) -> ApiResult<()> {
        if self.fault == Fault::Build {
            return self.inner.build_program(program, devices, "--injected-fault");
        }
        self.inner.build_program(program, devices, options)
    }

    fn build_log(&self, program: ProgramId, device: DeviceId) -> ApiResult<String> {
        self.inner.build_log(program, device)
    }

    fn create_kernel(&self, program: ProgramId, entry_point: &str) -> ApiResult<KernelId> {
        self.acquired(self.inner.create_kernel(program, entry_point))
    }

    fn kernel_arg_count(&self, kernel: KernelId) -> ApiResult<u32> {
        self.inner.kernel_arg_count(kernel)
    }

    fn set_kernel_arg(&self, kernel: KernelId, index: u32, arg: KernelArg) -> ApiResult<()> {
        self.inner.set_kernel_arg(kernel, index, arg)
    }

    fn enqueue_kernel(&self, queue: QueueId, kernel: KernelId, range: &NdRange, wait_for: &[EventId]) -> ApiResult<EventId> {
        if self.fault == Fault::Enqueue {
            return Err(injected(status::OUT_OF_RESOURCES));
        }
        self.acquired(self.inner.enqueue_kernel(queue, kernel, range, wait_for))
    }

    fn wait_for_events(&self, events: &[EventId]) -> ApiResult<()> {
        self.inner.wait_for_events(events)
    }

    fn event_profiling(&self, event: EventId) -> ApiResult<ProfilingInfo> {
        self.inner.event_profiling(event)
    }

    fn release(&self, handle: Handle) -> ApiResult<()> {
        self.ledger.lock().releases.push(handle);
        let outcome = self.inner.release(handle);
        match handle {
            Handle::Buffer(_) if self.fault == Fault::ReleaseBuffers => Err(injected(status::INVALID_MEM_OBJECT)),
            _ => outcome,
        }
    }
}
