//! Device status codes
//!
//! Numeric codes follow the OpenCL numbering so that the OpenCL backend can
//! pass driver codes straight through and the host backend reports the same
//! codes a real driver would for the same misuse.

use std::fmt;

pub const SUCCESS: i32 = 0;
pub const DEVICE_NOT_FOUND: i32 = -1;
pub const MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
pub const OUT_OF_RESOURCES: i32 = -5;
pub const OUT_OF_HOST_MEMORY: i32 = -6;
pub const PROFILING_INFO_NOT_AVAILABLE: i32 = -7;
pub const BUILD_PROGRAM_FAILURE: i32 = -11;
pub const INVALID_VALUE: i32 = -30;
pub const INVALID_DEVICE_TYPE: i32 = -31;
pub const INVALID_PLATFORM: i32 = -32;
pub const INVALID_DEVICE: i32 = -33;
pub const INVALID_CONTEXT: i32 = -34;
pub const INVALID_QUEUE_PROPERTIES: i32 = -35;
pub const INVALID_COMMAND_QUEUE: i32 = -36;
pub const INVALID_MEM_OBJECT: i32 = -38;
pub const INVALID_BUILD_OPTIONS: i32 = -43;
pub const INVALID_PROGRAM: i32 = -44;
pub const INVALID_PROGRAM_EXECUTABLE: i32 = -45;
pub const INVALID_KERNEL_NAME: i32 = -46;
pub const INVALID_KERNEL: i32 = -48;
pub const INVALID_ARG_INDEX: i32 = -49;
pub const INVALID_ARG_VALUE: i32 = -50;
pub const INVALID_ARG_SIZE: i32 = -51;
pub const INVALID_KERNEL_ARGS: i32 = -52;
pub const INVALID_WORK_DIMENSION: i32 = -53;
pub const INVALID_WORK_GROUP_SIZE: i32 = -54;
pub const INVALID_EVENT_WAIT_LIST: i32 = -57;
pub const INVALID_EVENT: i32 = -58;
pub const INVALID_BUFFER_SIZE: i32 = -61;
pub const INVALID_GLOBAL_WORK_SIZE: i32 = -63;
pub const PLATFORM_NOT_FOUND: i32 = -1001;
/// A host-side check failed before any device call was made
pub const PIPELINE_CHECK_FAILED: i32 = -9999;

/// Symbolic name for a status code.
pub fn name(code: i32) -> &'static str {
    match code {
        SUCCESS => "CL_SUCCESS",
        DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
        MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
        OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
        PROFILING_INFO_NOT_AVAILABLE => "CL_PROFILING_INFO_NOT_AVAILABLE",
        BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
        INVALID_VALUE => "CL_INVALID_VALUE",
        INVALID_DEVICE_TYPE => "CL_INVALID_DEVICE_TYPE",
        INVALID_PLATFORM => "CL_INVALID_PLATFORM",
        INVALID_DEVICE => "CL_INVALID_DEVICE",
        INVALID_CONTEXT => "CL_INVALID_CONTEXT",
        INVALID_QUEUE_PROPERTIES => "CL_INVALID_QUEUE_PROPERTIES",
        INVALID_COMMAND_QUEUE => "CL_INVALID_COMMAND_QUEUE",
        INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
        INVALID_BUILD_OPTIONS => "CL_INVALID_BUILD_OPTIONS",
        INVALID_PROGRAM => "CL_INVALID_PROGRAM",
        INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
        INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
        INVALID_KERNEL => "CL_INVALID_KERNEL",
        INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
        INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
        INVALID_ARG_SIZE => "CL_INVALID_ARG_SIZE",
        INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
        INVALID_WORK_DIMENSION => "CL_INVALID_WORK_DIMENSION",
        INVALID_WORK_GROUP_SIZE => "CL_INVALID_WORK_GROUP_SIZE",
        INVALID_EVENT_WAIT_LIST => "CL_INVALID_EVENT_WAIT_LIST",
        INVALID_EVENT => "CL_INVALID_EVENT",
        INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
        INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
        PLATFORM_NOT_FOUND => "CL_PLATFORM_NOT_FOUND_KHR",
        PIPELINE_CHECK_FAILED => "PIPELINE_CHECK_FAILED",
        _ => "CL_UNKNOWN_ERROR",
    }
}

/// Error returned by a [`crate::api::ComputeApi`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Device status code (never [`SUCCESS`])
    pub code: i32,
    /// Backend-supplied detail, may be empty
    pub detail: String,
}

impl ApiError {
    /// Create an error with a status code and detail text
    pub fn new(code: i32, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    /// Symbolic name of the status code
    pub fn name(&self) -> &'static str {
        name(self.code)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{} ({})", self.name(), self.code)
        } else {
            write!(f, "{} ({}): {}", self.name(), self.code, self.detail)
        }
    }
}

impl std::error::Error for ApiError {}

/// Result type for raw device calls
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_known_codes() {
        assert_eq!(name(BUILD_PROGRAM_FAILURE), "CL_BUILD_PROGRAM_FAILURE");
        assert_eq!(name(INVALID_WORK_GROUP_SIZE), "CL_INVALID_WORK_GROUP_SIZE");
        assert_eq!(name(-12345), "CL_UNKNOWN_ERROR");
        assert_eq!(name(PIPELINE_CHECK_FAILED), "PIPELINE_CHECK_FAILED");
    }

    #[test]
    fn display_includes_code_and_detail() {
        let err = ApiError::new(INVALID_ARG_INDEX, "slot 7 of 4");
        assert_eq!(err.to_string(), "CL_INVALID_ARG_INDEX (-49): slot 7 of 4");

        let bare = ApiError::new(INVALID_EVENT, "");
        assert_eq!(bare.to_string(), "CL_INVALID_EVENT (-58)");
    }
}
