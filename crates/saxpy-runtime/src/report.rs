//! Stage status reporting
//!
//! Every pipeline stage hands its outcome to a [`ReportSink`] as a status
//! code plus a message. The sink decides how to surface it; aborting is done
//! by the pipeline returning the error, never by the sink.

use std::fmt;

use crate::error::{Error, Result};
use crate::status;

/// Pipeline stage a report refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Config,
    Discovery,
    Context,
    Queue,
    Allocation,
    Upload,
    Build,
    KernelSelect,
    ArgBind,
    Dispatch,
    Wait,
    Profiling,
    Download,
    Teardown,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Discovery => "discovery",
            Stage::Context => "context",
            Stage::Queue => "queue",
            Stage::Allocation => "allocation",
            Stage::Upload => "upload",
            Stage::Build => "build",
            Stage::KernelSelect => "kernel-select",
            Stage::ArgBind => "arg-bind",
            Stage::Dispatch => "dispatch",
            Stage::Wait => "wait",
            Stage::Profiling => "profiling",
            Stage::Download => "download",
            Stage::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives the status of each stage
pub trait ReportSink: Send + Sync {
    /// `status` is [`status::SUCCESS`] for a completed stage
    fn report(&self, stage: Stage, status: i32, message: &str);
}

/// Reports through `tracing`: successes at debug, teardown failures at warn,
/// everything else at error
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ReportSink for TracingReporter {
    fn report(&self, stage: Stage, code: i32, message: &str) {
        if code == status::SUCCESS {
            tracing::debug!(stage = %stage, message, "stage_ok");
        } else if stage == Stage::Teardown {
            tracing::warn!(stage = %stage, code, status = status::name(code), message, "stage_failed");
        } else {
            tracing::error!(stage = %stage, code, status = status::name(code), message, "stage_failed");
        }
    }
}

/// Status code reported for `err`
pub fn status_of(err: &Error) -> i32 {
    err.status_code().unwrap_or(status::PIPELINE_CHECK_FAILED)
}

/// Report `result` for `stage` and pass it through unchanged
pub fn check<T>(sink: &dyn ReportSink, stage: Stage, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => sink.report(stage, status::SUCCESS, stage.as_str()),
        Err(err) => sink.report(stage, status_of(err), &err.to_string()),
    }
    result
}
