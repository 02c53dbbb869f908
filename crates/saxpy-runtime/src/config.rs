//! Pipeline configuration

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::api::DeviceClass;
use crate::error::{Error, Result};
use crate::kernels::KernelVariant;

/// Device runtime the pipeline runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process reference device
    #[default]
    Host,
    /// OpenCL drivers (requires the `opencl` feature)
    OpenCl,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Host => f.write_str("host"),
            BackendKind::OpenCl => f.write_str("opencl"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" | "cpu-reference" => Ok(BackendKind::Host),
            "opencl" | "cl" => Ok(BackendKind::OpenCl),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Problem size, launch shape and device selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Elements in each of A, B and C
    pub element_count: usize,
    /// Scalar multiplier applied to A
    pub alpha: f32,
    /// Elements processed per work-item
    pub work_load: usize,
    /// Work-items per work-group
    pub local_size: usize,
    pub device_class: DeviceClass,
    /// Case-insensitive substring of the platform vendor; `None` takes the
    /// first platform
    pub vendor: Option<String>,
    pub variant: KernelVariant,
    /// Record device timestamps for the dispatch
    pub profiling: bool,
    pub backend: BackendKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            element_count: 1024 * 1024 * 64,
            alpha: 2.0,
            work_load: 4,
            local_size: 32,
            device_class: DeviceClass::Gpu,
            vendor: None,
            variant: KernelVariant::Strided,
            profiling: true,
            backend: BackendKind::Host,
        }
    }
}

impl PipelineConfig {
    /// Defaults with a different problem size
    pub fn for_elements(element_count: usize) -> Self {
        Self {
            element_count,
            ..Self::default()
        }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Select `variant`; the elementwise variant forces one element per
    /// work-item
    pub fn with_variant(mut self, variant: KernelVariant) -> Self {
        self.variant = variant;
        if variant == KernelVariant::Elementwise {
            self.work_load = 1;
        }
        self
    }

    pub fn with_work_load(mut self, work_load: usize) -> Self {
        self.work_load = work_load;
        self
    }

    pub fn with_local_size(mut self, local_size: usize) -> Self {
        self.local_size = local_size;
        self
    }

    pub fn with_device_class(mut self, device_class: DeviceClass) -> Self {
        self.device_class = device_class;
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Defaults overlaid with environment values.
    ///
    /// # Environment Variables
    ///
    /// - `SAXPY_ELEMENT_COUNT` - elements per vector
    /// - `SAXPY_ALPHA` - scalar multiplier
    /// - `SAXPY_WORK_LOAD` - elements per work-item
    /// - `SAXPY_LOCAL_SIZE` - work-items per group
    /// - `SAXPY_DEVICE_CLASS` - `default`, `cpu`, `gpu`, `accelerator` or `all`
    /// - `SAXPY_VENDOR` - platform vendor filter
    /// - `SAXPY_VARIANT` - `elementwise` or `strided`
    /// - `SAXPY_PROFILING` - `true`/`false`
    /// - `SAXPY_BACKEND` - `host` or `opencl`
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(value) = env_parsed("SAXPY_ELEMENT_COUNT") {
            config.element_count = value;
        }
        if let Some(value) = env_parsed("SAXPY_ALPHA") {
            config.alpha = value;
        }
        if let Some(value) = env_parsed("SAXPY_WORK_LOAD") {
            config.work_load = value;
        }
        if let Some(value) = env_parsed("SAXPY_LOCAL_SIZE") {
            config.local_size = value;
        }
        if let Some(value) = env_parsed("SAXPY_DEVICE_CLASS") {
            config.device_class = value;
        }
        if let Ok(vendor) = env::var("SAXPY_VENDOR") {
            if !vendor.trim().is_empty() {
                config.vendor = Some(vendor.trim().to_string());
            }
        }
        if let Some(value) = env_parsed::<KernelVariant>("SAXPY_VARIANT") {
            config.variant = value;
        }
        if let Ok(profiling) = env::var("SAXPY_PROFILING") {
            config.profiling = profiling.eq_ignore_ascii_case("true")
                || profiling == "1"
                || profiling.eq_ignore_ascii_case("yes");
        }
        if let Some(value) = env_parsed("SAXPY_BACKEND") {
            config.backend = value;
        }

        config
    }

    /// Reject configurations that cannot produce a complete result
    pub fn validate(&self) -> Result<()> {
        if self.element_count == 0 {
            return Err(Error::InvalidConfig("element_count must be non-zero".into()));
        }
        if self.work_load == 0 {
            return Err(Error::InvalidConfig("work_load must be non-zero".into()));
        }
        if self.local_size == 0 {
            return Err(Error::InvalidConfig("local_size must be non-zero".into()));
        }
        if self.element_count % self.work_load != 0 {
            return Err(Error::InvalidConfig(format!(
                "element_count {} is not a multiple of work_load {}",
                self.element_count, self.work_load
            )));
        }
        if self.variant == KernelVariant::Elementwise && self.work_load != 1 {
            return Err(Error::InvalidConfig(format!(
                "the elementwise variant writes one element per work-item, work_load must be 1 (got {})",
                self.work_load
            )));
        }
        if !self.alpha.is_finite() {
            return Err(Error::InvalidConfig(format!("alpha must be finite (got {})", self.alpha)));
        }
        Ok(())
    }

    /// Total bytes of one vector
    pub fn vector_bytes(&self) -> usize {
        self.element_count.saturating_mul(std::mem::size_of::<f32>())
    }
}

fn env_parsed<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, value = %raw, error = %err, "ignoring unparsable environment value");
            None
        }
    }
}
