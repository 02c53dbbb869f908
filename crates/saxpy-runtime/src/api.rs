//! Device runtime interface
//!
//! [`ComputeApi`] is the seam between the pipeline and whatever actually owns
//! the accelerator. It mirrors the shape of a vendor compute runtime: handles
//! are opaque ids, every call returns a status, and every acquired handle has
//! a matching [`ComputeApi::release`].
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ device / context / memory / program /        │
//! │ dispatch / event   (typed, owning wrappers)  │
//! └──────────────────────┬───────────────────────┘
//!                        │ Arc<dyn ComputeApi>
//!            ┌───────────┴───────────┐
//!            ▼                       ▼
//!     ┌─────────────┐         ┌─────────────┐
//!     │   HostApi   │         │  OpenClApi  │
//!     │ (reference) │         │  (opencl3)  │
//!     └─────────────┘         └─────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::status::ApiResult;

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            /// Create a handle from a raw id
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the raw id
            pub const fn id(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

raw_handle!(
    /// A platform exposed by the runtime (not owned, never released)
    PlatformId,
    "platform"
);
raw_handle!(
    /// A device exposed by a platform (not owned, never released)
    DeviceId,
    "device"
);
raw_handle!(
    /// A context grouping a platform and its devices
    ContextId,
    "context"
);
raw_handle!(
    /// An in-order command queue against one device
    QueueId,
    "queue"
);
raw_handle!(
    /// A device-resident buffer
    BufferId,
    "buffer"
);
raw_handle!(
    /// A program object built from source
    ProgramId,
    "program"
);
raw_handle!(
    /// One entry point extracted from a program
    KernelId,
    "kernel"
);
raw_handle!(
    /// Completion event of an enqueued command
    EventId,
    "event"
);

/// Any handle that must be released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    Context(ContextId),
    Queue(QueueId),
    Buffer(BufferId),
    Program(ProgramId),
    Kernel(KernelId),
    Event(EventId),
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Context(h) => h.fmt(f),
            Handle::Queue(h) => h.fmt(f),
            Handle::Buffer(h) => h.fmt(f),
            Handle::Program(h) => h.fmt(f),
            Handle::Kernel(h) => h.fmt(f),
            Handle::Event(h) => h.fmt(f),
        }
    }
}

macro_rules! into_handle {
    ($($raw:ident => $variant:ident),+ $(,)?) => {
        $(
            impl From<$raw> for Handle {
                fn from(raw: $raw) -> Self {
                    Handle::$variant(raw)
                }
            }
        )+
    };
}

into_handle!(
    ContextId => Context,
    QueueId => Queue,
    BufferId => Buffer,
    ProgramId => Program,
    KernelId => Kernel,
    EventId => Event,
);

/// Class of device requested from a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// The platform's default device
    Default,
    Cpu,
    Gpu,
    Accelerator,
    /// Any device
    All,
}

impl DeviceClass {
    /// Whether a device of class `actual` satisfies a request for `self`.
    ///
    /// `Default` matches whatever the platform lists first, so it is handled
    /// by the enumerator rather than here and matches every class.
    pub fn admits(self, actual: DeviceClass) -> bool {
        match self {
            DeviceClass::All | DeviceClass::Default => true,
            requested => requested == actual,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Default => "default",
            DeviceClass::Cpu => "cpu",
            DeviceClass::Gpu => "gpu",
            DeviceClass::Accelerator => "accelerator",
            DeviceClass::All => "all",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(DeviceClass::Default),
            "cpu" => Ok(DeviceClass::Cpu),
            "gpu" => Ok(DeviceClass::Gpu),
            "accelerator" | "acc" => Ok(DeviceClass::Accelerator),
            "all" | "any" => Ok(DeviceClass::All),
            other => Err(format!("unknown device class '{other}'")),
        }
    }
}

/// Intended device-side usage of a buffer.
///
/// Declared at allocation and not enforced by the API; writing a read-only
/// buffer from a kernel is undefined behavior the caller avoids by convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDirection {
    ReadOnly,
    WriteOnly,
}

impl fmt::Display for AccessDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessDirection::ReadOnly => f.write_str("read-only"),
            AccessDirection::WriteOnly => f.write_str("write-only"),
        }
    }
}

/// Value bound to one kernel argument slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    /// A `float` passed by value
    Float(f32),
    /// A `__global` pointer
    Buffer(BufferId),
}

impl KernelArg {
    /// Size in bytes of the argument as the device sees it
    pub fn size_bytes(&self) -> usize {
        match self {
            KernelArg::Float(_) => std::mem::size_of::<f32>(),
            KernelArg::Buffer(_) => std::mem::size_of::<u64>(),
        }
    }
}

/// Properties requested when creating a command queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueProperties {
    /// Record queued/start/end timestamps on every command
    pub profiling: bool,
}

/// Index space of one kernel launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    /// Number of used dimensions (1..=3)
    pub dimensions: u32,
    /// Total work-items per dimension
    pub global: [usize; 3],
    /// Work-items per group per dimension; `None` lets the device choose
    pub local: Option<[usize; 3]>,
}

impl NdRange {
    /// One-dimensional range
    pub const fn linear(global: usize, local: usize) -> Self {
        Self {
            dimensions: 1,
            global: [global, 1, 1],
            local: Some([local, 1, 1]),
        }
    }

    /// Total number of work-items
    pub fn total_work_items(&self) -> usize {
        self.global[..self.dimensions as usize].iter().product()
    }
}

/// Timestamps of a completed command, in device nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilingInfo {
    pub queued: u64,
    pub start: u64,
    pub end: u64,
}

/// Platform identification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

/// Device identification and limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub class: DeviceClass,
    pub max_work_group_size: usize,
    pub compute_units: u32,
}

/// A device runtime.
///
/// Implementations must be usable from behind `Arc<dyn ComputeApi>`; all
/// methods take `&self` and do their own locking.
///
/// Handles returned by `create_*` and `enqueue_kernel` are owned by the
/// caller until passed to [`ComputeApi::release`]. Releasing a handle twice
/// is a caller bug; implementations report it as an invalid-handle status.
pub trait ComputeApi: Send + Sync {
    /// Short backend name used in logs (e.g. `"host"`, `"opencl"`)
    fn backend_name(&self) -> &'static str;

    // ============================================================================================
    // Discovery
    // ============================================================================================

    /// Platforms available on this host
    fn platforms(&self) -> ApiResult<Vec<PlatformId>>;

    fn platform_info(&self, platform: PlatformId) -> ApiResult<PlatformInfo>;

    /// Devices of `platform` admitted by `class`
    fn devices(&self, platform: PlatformId, class: DeviceClass) -> ApiResult<Vec<DeviceId>>;

    fn device_info(&self, device: DeviceId) -> ApiResult<DeviceInfo>;

    // ============================================================================================
    // Context and queue
    // ============================================================================================

    fn create_context(&self, platform: PlatformId, devices: &[DeviceId]) -> ApiResult<ContextId>;

    fn create_queue(&self, context: ContextId, device: DeviceId, properties: QueueProperties) -> ApiResult<QueueId>;

    /// Block until every command submitted to `queue` has completed
    fn finish(&self, queue: QueueId) -> ApiResult<()>;

    // ============================================================================================
    // Memory
    // ============================================================================================

    fn create_buffer(&self, context: ContextId, size_bytes: usize, access: AccessDirection) -> ApiResult<BufferId>;

    /// Blocking host-to-device copy into the start of `buffer`
    fn write_buffer(&self, queue: QueueId, buffer: BufferId, data: &[u8]) -> ApiResult<()>;

    /// Blocking device-to-host copy from the start of `buffer`, started only
    /// after every event in `wait_for` has completed
    fn read_buffer(&self, queue: QueueId, buffer: BufferId, data: &mut [u8], wait_for: &[EventId]) -> ApiResult<()>;

    // ============================================================================================
    // Programs and kernels
    // ============================================================================================

    fn create_program(&self, context: ContextId, source: &str) -> ApiResult<ProgramId>;

    /// Compile and link `program` for `devices`
    fn build_program(&self, program: ProgramId, devices: &[DeviceId], options: &str) -> ApiResult<()>;

    /// Compiler output of the last build of `program` for `device`
    fn build_log(&self, program: ProgramId, device: DeviceId) -> ApiResult<String>;

    fn create_kernel(&self, program: ProgramId, entry_point: &str) -> ApiResult<KernelId>;

    /// Number of declared parameters of the entry point
    fn kernel_arg_count(&self, kernel: KernelId) -> ApiResult<u32>;

    fn set_kernel_arg(&self, kernel: KernelId, index: u32, arg: KernelArg) -> ApiResult<()>;

    // ============================================================================================
    // Execution and synchronization
    // ============================================================================================

    /// Submit `kernel` over `range`; returns the completion event
    fn enqueue_kernel(&self, queue: QueueId, kernel: KernelId, range: &NdRange, wait_for: &[EventId]) -> ApiResult<EventId>;

    /// Block until every event has completed
    fn wait_for_events(&self, events: &[EventId]) -> ApiResult<()>;

    /// Timestamps of a completed command on a profiling-enabled queue
    fn event_profiling(&self, event: EventId) -> ApiResult<ProfilingInfo>;

    // ============================================================================================
    // Release
    // ============================================================================================

    fn release(&self, handle: Handle) -> ApiResult<()>;
}
