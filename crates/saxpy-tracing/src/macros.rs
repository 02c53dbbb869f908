//! Convenience macros for performance tracing

/// Create a [`crate::performance::PerformanceSpan`] guard, optionally with
/// fields recorded on an enclosing debug span.
///
/// ```rust
/// use saxpy_tracing::perf_span;
///
/// {
///     let _span = perf_span!("upload", bytes = 4096);
///     // ... operation code ...
/// } // logs duration when dropped
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let _span = tracing::debug_span!(
            "perf",
            name = $name,
            $($field = $value),+
        ).entered();
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}

/// Run a block and return `(result, duration_us)`.
///
/// ```rust
/// use saxpy_tracing::timed_block;
///
/// let (sum, duration_us) = timed_block!("sum", { (1..=100).sum::<i32>() });
/// assert_eq!(sum, 5050);
/// # let _ = duration_us;
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(
            operation = $name,
            duration_us = duration_us,
            duration_ms = duration_us as f64 / 1000.0,
            "timed_block_complete"
        );
        (result, duration_us)
    }};
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    #[test]
    fn perf_span_with_fields() {
        let _span = perf_span!("dispatch", work_items = 256, local_size = 32);
    }

    #[test]
    fn timed_block_measures() {
        let (result, duration_us) = timed_block!("sleep", {
            thread::sleep(Duration::from_millis(5));
            7
        });
        assert_eq!(result, 7);
        assert!(duration_us >= 5_000);
    }

    #[test]
    fn timed_block_passes_errors_through() {
        let (result, _) = timed_block!("failing", { Result::<u8, &str>::Err("nope") });
        assert_eq!(result, Err("nope"));
    }
}
