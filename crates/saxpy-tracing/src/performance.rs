//! Performance-focused tracing utilities
//!
//! Timing guards and standard event shapes for host/device transfers, kernel
//! executions and handle releases.
//!
//! ## Example
//!
//! ```rust
//! use saxpy_tracing::performance::{record_transfer, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("upload", Some(100));
//! // ... do work ...
//! drop(span); // Logs only if duration > 100μs
//!
//! record_transfer(4096, "H2D", 250);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::Level;

static PERF_ENABLED: AtomicBool = AtomicBool::new(true);

// u64::MAX encodes "no global threshold".
static PERF_THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Apply process-wide performance tracing settings.
///
/// Called by [`crate::init_global_tracing`]; spans created afterwards use the
/// global threshold when they do not carry their own.
pub fn configure(enabled: bool, threshold_us: Option<u64>) {
    PERF_ENABLED.store(enabled, Ordering::Relaxed);
    PERF_THRESHOLD_US.store(threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Whether performance spans currently emit completion events.
pub fn is_enabled() -> bool {
    PERF_ENABLED.load(Ordering::Relaxed)
}

fn global_threshold() -> Option<u64> {
    match PERF_THRESHOLD_US.load(Ordering::Relaxed) {
        u64::MAX => None,
        threshold => Some(threshold),
    }
}

/// RAII guard that measures its own lifetime and logs it on drop.
///
/// Nothing is logged when performance tracing is disabled or when the
/// duration stays below the threshold.
///
/// ```rust
/// use saxpy_tracing::performance::PerformanceSpan;
///
/// {
///     let _span = PerformanceSpan::new("program_build", Some(1000));
///     // ... operation code ...
/// } // logged only if duration > 1000μs
/// ```
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Create a debug-level span with an optional threshold in microseconds.
    pub fn new(span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, span_name, threshold_us)
    }

    /// Create a span at the given level.
    pub fn with_level(level: Level, span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = span_name.into();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };

        Self {
            name,
            threshold_us: threshold_us.or_else(global_threshold),
            start_time: Instant::now(),
            span,
        }
    }

    /// Name the span was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Elapsed time since creation.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Enter this span's context.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        if !is_enabled() {
            return;
        }

        let elapsed_us = self.elapsed_us();
        if self.threshold_us.is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record a host/device transfer with bandwidth.
///
/// `direction` is `"H2D"` for uploads and `"D2H"` for downloads.
pub fn record_transfer(bytes: usize, direction: &str, duration_us: u64) {
    let bandwidth_mbps = if duration_us > 0 {
        (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
    } else {
        0.0
    };

    tracing::debug!(
        event = "transfer",
        bytes = bytes,
        mb = bytes as f64 / (1024.0 * 1024.0),
        direction = direction,
        duration_us = duration_us,
        bandwidth_mbps = bandwidth_mbps,
        "data_transfer"
    );
}

/// Record a completed kernel execution as timed by the device.
///
/// `device_ns` is the end-minus-start profiling interval reported by the
/// completion event.
pub fn record_kernel_execution(kernel: &str, work_items: usize, elements: usize, device_ns: u64) {
    let elements_per_sec = if device_ns > 0 {
        elements as f64 / (device_ns as f64 / 1_000_000_000.0)
    } else {
        0.0
    };

    tracing::debug!(
        event = "kernel",
        kernel = kernel,
        work_items = work_items,
        elements = elements,
        device_ns = device_ns,
        device_ms = device_ns as f64 / 1_000_000.0,
        elements_per_sec = elements_per_sec,
        "kernel_execution"
    );
}

/// Record the release of a device handle.
pub fn record_release(handle: &str, succeeded: bool) {
    tracing::trace!(event = "release", handle = handle, succeeded = succeeded, "handle_release");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_reports_elapsed_time() {
        let span = PerformanceSpan::new("sleep", None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(span.elapsed_us() >= 2_000);
        assert_eq!(span.name(), "sleep");
    }

    #[test]
    fn span_levels_do_not_panic() {
        for level in [Level::TRACE, Level::DEBUG, Level::INFO, Level::WARN, Level::ERROR] {
            let _span = PerformanceSpan::with_level(level, "level", Some(0));
        }
    }

    #[test]
    fn event_helpers_accept_zero_durations() {
        record_transfer(4096, "H2D", 0);
        record_kernel_execution("saxpy_strided", 256, 1024, 0);
        record_release("kernel#3", true);
    }
}
