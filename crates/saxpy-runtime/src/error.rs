//! Error types for pipeline operations

use std::fmt;

use crate::api::{AccessDirection, DeviceClass, Handle};
use crate::status::ApiError;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Direction of a host/device copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
}

impl TransferDirection {
    /// Short tag used in transfer events
    pub fn tag(self) -> &'static str {
        match self {
            TransferDirection::HostToDevice => "H2D",
            TransferDirection::DeviceToHost => "D2H",
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::HostToDevice => f.write_str("upload"),
            TransferDirection::DeviceToHost => f.write_str("download"),
        }
    }
}

/// Errors that can occur while running the pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The runtime lists no platforms
    #[error("no compute platform found")]
    NoPlatformFound,

    /// No device of the requested class on the selected platform
    #[error("no {class} device found on platform '{platform}'")]
    NoDeviceFound { class: DeviceClass, platform: String },

    /// Platform or device query failed
    #[error("device discovery failed: {0}")]
    DiscoveryFailed(ApiError),

    #[error("context creation failed: {0}")]
    ContextCreationFailed(ApiError),

    #[error("command queue creation failed: {0}")]
    QueueCreationFailed(ApiError),

    #[error("{access} buffer allocation of {size_bytes} bytes failed: {source}")]
    BufferAllocationFailed {
        size_bytes: usize,
        access: AccessDirection,
        source: ApiError,
    },

    #[error("{direction} of {bytes} bytes failed: {reason}")]
    TransferFailed {
        direction: TransferDirection,
        bytes: usize,
        reason: String,
    },

    /// Compilation failed; `log` holds the compiler diagnostics
    #[error("program build failed with status {code}:\n{log}")]
    BuildFailed { code: i32, log: String },

    #[error("kernel entry point '{name}' unavailable: {source}")]
    KernelNotFound { name: String, source: ApiError },

    #[error("binding kernel argument {index} failed: {reason}")]
    ArgBindFailed { index: u32, reason: String },

    #[error("dispatch of global size {global_size} / local size {local_size} failed: {reason}")]
    DispatchFailed {
        global_size: usize,
        local_size: usize,
        reason: String,
    },

    /// Waiting on an event or reading its timestamps failed
    #[error("{operation} failed: {source}")]
    SyncFailed { operation: &'static str, source: ApiError },

    /// Releasing a handle failed (never fatal)
    #[error("releasing {handle} failed: {source}")]
    ReleaseFailed { handle: Handle, source: ApiError },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Coarse classification of [`Error`] used for reporting and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Discovery,
    Allocation,
    Transfer,
    Build,
    ArgBind,
    Dispatch,
    Sync,
    Release,
    Config,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Discovery => "discovery",
            ErrorCategory::Allocation => "allocation",
            ErrorCategory::Transfer => "transfer",
            ErrorCategory::Build => "build",
            ErrorCategory::ArgBind => "arg-bind",
            ErrorCategory::Dispatch => "dispatch",
            ErrorCategory::Sync => "sync",
            ErrorCategory::Release => "release",
            ErrorCategory::Config => "config",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NoPlatformFound | Error::NoDeviceFound { .. } | Error::DiscoveryFailed(_) => {
                ErrorCategory::Discovery
            }
            Error::ContextCreationFailed(_)
            | Error::QueueCreationFailed(_)
            | Error::BufferAllocationFailed { .. } => ErrorCategory::Allocation,
            Error::TransferFailed { .. } => ErrorCategory::Transfer,
            Error::BuildFailed { .. } | Error::KernelNotFound { .. } => ErrorCategory::Build,
            Error::ArgBindFailed { .. } => ErrorCategory::ArgBind,
            Error::DispatchFailed { .. } => ErrorCategory::Dispatch,
            Error::SyncFailed { .. } => ErrorCategory::Sync,
            Error::ReleaseFailed { .. } => ErrorCategory::Release,
            Error::InvalidConfig(_) | Error::Unsupported(_) => ErrorCategory::Config,
        }
    }

    /// Everything except a failed release aborts the pipeline
    pub fn is_fatal(&self) -> bool {
        self.category() != ErrorCategory::Release
    }

    /// Process exit code for a run that ended with this error
    pub fn exit_code(&self) -> u8 {
        match self.category() {
            ErrorCategory::Discovery => 2,
            ErrorCategory::Allocation => 3,
            ErrorCategory::Transfer => 4,
            ErrorCategory::Build => 5,
            ErrorCategory::ArgBind => 6,
            ErrorCategory::Dispatch => 7,
            ErrorCategory::Sync => 8,
            ErrorCategory::Release => 0,
            ErrorCategory::Config => 64,
        }
    }

    /// Device status code carried by the error, if any
    pub fn status_code(&self) -> Option<i32> {
        match self {
            Error::DiscoveryFailed(e) | Error::ContextCreationFailed(e) | Error::QueueCreationFailed(e) => {
                Some(e.code)
            }
            Error::BufferAllocationFailed { source, .. }
            | Error::KernelNotFound { source, .. }
            | Error::SyncFailed { source, .. }
            | Error::ReleaseFailed { source, .. } => Some(source.code),
            Error::BuildFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn dispatch(global_size: usize, local_size: usize, reason: impl Into<String>) -> Self {
        Self::DispatchFailed {
            global_size,
            local_size,
            reason: reason.into(),
        }
    }

    pub(crate) fn transfer(direction: TransferDirection, bytes: usize, reason: impl fmt::Display) -> Self {
        Self::TransferFailed {
            direction,
            bytes,
            reason: reason.to_string(),
        }
    }
}
