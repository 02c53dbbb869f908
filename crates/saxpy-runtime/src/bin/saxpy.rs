//! Runs one SAXPY on the configured device.
//!
//! Configuration comes from `SAXPY_*` environment variables (see
//! [`PipelineConfig::from_env`]), logging from `SAXPY_TRACING_*`.

use std::process::ExitCode;

use saxpy_runtime::{default_inputs, reference_saxpy, PipelineConfig, SaxpyPipeline};
use saxpy_tracing::{init_global_tracing, TracingConfig};

fn main() -> ExitCode {
    if let Err(err) = init_global_tracing(&TracingConfig::from_env()) {
        eprintln!("saxpy: {err}");
    }

    let config = PipelineConfig::from_env();
    tracing::info!(
        elements = config.element_count,
        alpha = config.alpha,
        work_load = config.work_load,
        local_size = config.local_size,
        variant = %config.variant,
        backend = %config.backend,
        "starting"
    );

    let (a, b) = default_inputs(config.element_count);
    let outcome = SaxpyPipeline::connect(config.clone()).and_then(|pipeline| pipeline.run(&a, &b));

    match outcome {
        Ok(outcome) => {
            let expected = reference_saxpy(config.alpha, &a, &b);
            let mismatches = outcome
                .output
                .iter()
                .zip(&expected)
                .filter(|(got, want)| got.to_bits() != want.to_bits())
                .count();
            if mismatches > 0 {
                tracing::warn!(mismatches, "device output differs from host reference");
            }
            tracing::info!(
                released = outcome.teardown.released,
                release_failures = outcome.teardown.failures.len(),
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(category = %err.category(), "{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
