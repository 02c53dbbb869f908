//! SAXPY kernel variants
//!
//! Each variant is a self-contained OpenCL C unit. The program built by the
//! pipeline contains every unit, and a [`KernelVariant`] tag picks the entry
//! point to instantiate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Preprocessor symbol carrying the element count into kernel source
pub const ELEMENT_COUNT_DEFINE: &str = "SAXPY_ELEMENT_COUNT";

/// Argument slots shared by every variant:
/// `(float alpha, const float *a, const float *b, float *c)`
pub const ARG_ALPHA: u32 = 0;
pub const ARG_A: u32 = 1;
pub const ARG_B: u32 = 2;
pub const ARG_C: u32 = 3;

const ELEMENTWISE_SOURCE: &str = include_str!("../kernels/saxpy_elementwise.cl");
const STRIDED_SOURCE: &str = include_str!("../kernels/saxpy_strided.cl");

/// Strategy for mapping work-items onto output elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelVariant {
    /// One work-item per element; requires `global_size == element_count`
    Elementwise,
    /// Each work-item handles `element_count / global_size` elements spaced
    /// `global_size` apart
    Strided,
}

impl KernelVariant {
    pub const ALL: [KernelVariant; 2] = [KernelVariant::Elementwise, KernelVariant::Strided];

    /// Entry point name inside the compiled program
    pub fn entry_point(self) -> &'static str {
        match self {
            KernelVariant::Elementwise => "saxpy_elementwise",
            KernelVariant::Strided => "saxpy_strided",
        }
    }

    /// OpenCL C source of this variant alone
    pub fn unit_source(self) -> &'static str {
        match self {
            KernelVariant::Elementwise => ELEMENTWISE_SOURCE,
            KernelVariant::Strided => STRIDED_SOURCE,
        }
    }

    /// Look a variant up by its entry point name
    pub fn from_entry_point(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|variant| variant.entry_point() == name)
    }
}

impl fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelVariant::Elementwise => f.write_str("elementwise"),
            KernelVariant::Strided => f.write_str("strided"),
        }
    }
}

impl FromStr for KernelVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "elementwise" | "saxpy_elementwise" => Ok(KernelVariant::Elementwise),
            "strided" | "saxpy_strided" => Ok(KernelVariant::Strided),
            other => Err(format!("unknown kernel variant '{other}'")),
        }
    }
}

/// Source text holding every variant's unit
pub fn kernel_bundle() -> String {
    KernelVariant::ALL
        .iter()
        .map(|variant| variant.unit_source())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build options defining the element count for the strided loop bound
pub fn build_options(element_count: usize) -> String {
    format!("-D {ELEMENT_COUNT_DEFINE}={element_count}")
}
