//! Kernel program builder
//!
//! A program is compiled once from a source text that may hold several entry
//! points. Individual kernels are then extracted by [`KernelVariant`] tag, or
//! by name for sources that are not the bundled variants.
//!
//! A failed build always carries the compiler log of every target device.
//! When the runtime returns no log, the error says so instead of carrying
//! only the status code.

use std::sync::Arc;

use saxpy_tracing::perf_span;

use crate::api::{ComputeApi, DeviceId, ProgramId};
use crate::context::ExecutionContext;
use crate::dispatch::KernelHandle;
use crate::error::{Error, Result};
use crate::kernels::{build_options, kernel_bundle, KernelVariant};
use crate::resource::{Owned, Released};
use crate::status::ApiError;

/// Source text and compiler options for one program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    pub text: String,
    pub options: String,
}

impl KernelSource {
    pub fn new(text: impl Into<String>, options: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: options.into(),
        }
    }

    /// Every [`KernelVariant`] unit, built for `element_count` elements
    pub fn bundled(element_count: usize) -> Self {
        Self::new(kernel_bundle(), build_options(element_count))
    }
}

/// Compiles [`KernelSource`]s into [`Program`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgramBuilder;

impl ProgramBuilder {
    /// Compile `source` for `devices` (all context devices when empty).
    #[tracing::instrument(skip_all, fields(context = %context.raw(), options = %source.options))]
    pub fn build(context: &ExecutionContext, source: &KernelSource, devices: &[DeviceId]) -> Result<Program> {
        let api = Arc::clone(context.api());
        let _span = perf_span!("program_build", source_bytes = source.text.len());

        let raw = api
            .create_program(context.raw(), &source.text)
            .map_err(|err| Error::BuildFailed {
                code: err.code,
                log: format!("program creation failed: {err}"),
            })?;
        let mut owned = Owned::new(Arc::clone(&api), raw);

        let targets = if devices.is_empty() { context.devices() } else { devices };
        if let Err(err) = api.build_program(raw, targets, &source.options) {
            let log = collect_build_log(api.as_ref(), raw, targets);
            tracing::warn!(program = %raw, code = err.code, status = err.name(), "program_build_failed");
            if let Err(release_err) = owned.release() {
                tracing::warn!(error = %release_err, "releasing failed program");
            }
            return Err(Error::BuildFailed { code: err.code, log });
        }

        tracing::debug!(program = %raw, devices = targets.len(), "program_built");
        Ok(Program { owned })
    }
}

/// Gather the compiler output of every target device.
///
/// Never returns an empty string.
fn collect_build_log(api: &dyn ComputeApi, program: ProgramId, devices: &[DeviceId]) -> String {
    let mut sections = Vec::with_capacity(devices.len());
    for &device in devices {
        let text = match api.build_log(program, device) {
            Ok(log) if !log.trim().is_empty() => log.trim_end().to_string(),
            Ok(_) => "compiler returned an empty build log".to_string(),
            Err(err) => format!("build log unavailable: {err}"),
        };
        sections.push(if devices.len() == 1 { text } else { format!("[{device}]\n{text}") });
    }

    if sections.is_empty() {
        return "no target devices to retrieve a build log from".to_string();
    }
    sections.join("\n")
}

/// A successfully built program
#[derive(Debug)]
pub struct Program {
    owned: Owned<ProgramId>,
}

impl Program {
    pub fn raw(&self) -> ProgramId {
        self.owned.raw()
    }

    /// Instantiate the entry point of `variant`
    pub fn kernel(&self, variant: KernelVariant) -> Result<KernelHandle> {
        self.kernel_by_name(variant.entry_point())
    }

    /// Instantiate an entry point by exact name.
    ///
    /// The host reference device only instantiates entry points whose body
    /// is one of the bundled SAXPY variants; others fail with
    /// [`Error::KernelNotFound`].
    #[tracing::instrument(skip(self), fields(program = %self.raw()))]
    pub fn kernel_by_name(&self, name: &str) -> Result<KernelHandle> {
        let api = Arc::clone(self.owned.api());
        let not_found = |source: ApiError| Error::KernelNotFound {
            name: name.to_string(),
            source,
        };

        let raw = api.create_kernel(self.raw(), name).map_err(not_found)?;
        let owned = Owned::new(Arc::clone(&api), raw);
        let arg_count = api.kernel_arg_count(raw).map_err(not_found)?;

        tracing::debug!(kernel = %raw, arg_count, "kernel_created");
        Ok(KernelHandle::new(owned, name, arg_count))
    }

    pub fn release(&mut self) -> Result<Released> {
        self.owned.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DeviceClass;
    use crate::backends::HostApi;
    use crate::device::DeviceEnumerator;
    use crate::status;

    fn context() -> ExecutionContext {
        let api: Arc<dyn ComputeApi> = Arc::new(HostApi::new());
        let selection = DeviceEnumerator::new(Arc::clone(&api)).select(DeviceClass::All, None).unwrap();
        ExecutionContext::create(api, selection.platform(), selection.devices()).unwrap()
    }

    #[test]
    fn builds_bundle_and_extracts_both_variants() {
        let context = context();
        let program = ProgramBuilder::build(&context, &KernelSource::bundled(1024), &[]).unwrap();

        for variant in KernelVariant::ALL {
            let kernel = program.kernel(variant).unwrap();
            assert_eq!(kernel.name(), variant.entry_point());
            assert_eq!(kernel.arg_count(), 4);
        }
    }

    #[test]
    fn malformed_source_surfaces_log() {
        let context = context();
        let source = KernelSource::new("__kernel void broken(float alpha) { alpha = beta }", "");
        let err = ProgramBuilder::build(&context, &source, &[]).unwrap_err();

        match err {
            Error::BuildFailed { code, log } => {
                assert_eq!(code, status::BUILD_PROGRAM_FAILURE);
                assert!(log.contains("error:"), "log was: {log}");
                assert!(log.contains("beta"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn strided_variant_needs_element_count() {
        let context = context();
        let source = KernelSource::new(KernelVariant::Strided.unit_source(), "");
        let err = ProgramBuilder::build(&context, &source, &[]).unwrap_err();
        assert!(err.to_string().contains("SAXPY_ELEMENT_COUNT must be defined"));
    }

    #[test]
    fn unknown_entry_point_is_kernel_not_found() {
        let context = context();
        let program = ProgramBuilder::build(&context, &KernelSource::bundled(64), &[]).unwrap();
        let err = program.kernel_by_name("saxpy_kernel3").unwrap_err();
        assert!(matches!(err, Error::KernelNotFound { ref name, .. } if name == "saxpy_kernel3"));
    }

    #[test]
    fn foreign_body_is_not_run_as_saxpy() {
        let context = context();
        let source = KernelSource::new(
            "__kernel void saxpy_strided(const float alpha, __global const float *a, __global const float *b, __global float *c)\n{\n    const size_t i = get_global_id(0);\n    c[i] = a[i] - b[i];\n}\n",
            "-D SAXPY_ELEMENT_COUNT=64",
        );
        let program = ProgramBuilder::build(&context, &source, &[]).unwrap();

        match program.kernel(KernelVariant::Strided).unwrap_err() {
            Error::KernelNotFound { name, source } => {
                assert_eq!(name, "saxpy_strided");
                assert_eq!(source.code, status::INVALID_KERNEL_NAME);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_log_is_never_silent() {
        let api = HostApi::new();
        let context = api.create_context(crate::backends::host::PLATFORM, &[crate::backends::host::DEVICE]).unwrap();
        let program = api.create_program(context, "__kernel void k(float a) { }").unwrap();

        let log = collect_build_log(&api, program, &[crate::backends::host::DEVICE]);
        assert_eq!(log, "compiler returned an empty build log");
        assert!(!collect_build_log(&api, program, &[]).is_empty());
    }
}
