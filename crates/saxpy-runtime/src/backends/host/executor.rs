//! Native execution of SAXPY entry points
//!
//! The host device has no code generator. An entry point runs only when its
//! body has the same shape as one of the bundled variants, whatever it is
//! named; any other body is refused when the kernel is created.
//!
//! A launch walks `global_size / local_size` work-groups on the rayon pool.
//! Each work-group runs its work-items in order, and each work-item writes
//! exactly the elements its variant assigns to it. Output is split between
//! groups by ownership, so no element is written by two groups.

use std::iter::StepBy;
use std::ops::Range;

use rayon::prelude::*;

use super::compiler::{compile, eval_integer, CompiledSource, EntryPoint, ParamKind};
use crate::kernels::{self, build_options, kernel_bundle, KernelVariant, ELEMENT_COUNT_DEFINE};

pub(crate) const ARG_ALPHA: usize = kernels::ARG_ALPHA as usize;
pub(crate) const ARG_A: usize = kernels::ARG_A as usize;
pub(crate) const ARG_B: usize = kernels::ARG_B as usize;
pub(crate) const ARG_C: usize = kernels::ARG_C as usize;

/// An entry point the host device can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NativeKernel {
    /// Work-item `g` writes element `g`
    Elementwise,
    /// Work-item `g` writes `g, g + G, g + 2G, ...` below `element_count`
    Strided { element_count: usize },
}

impl NativeKernel {
    /// Bind a compiled entry point to its native implementation
    pub fn resolve(entry: &EntryPoint, compiled: &CompiledSource) -> Result<Self, String> {
        let variant = recognise(entry)?;

        check_signature(entry)?;

        match variant {
            KernelVariant::Elementwise => Ok(NativeKernel::Elementwise),
            KernelVariant::Strided => {
                let element_count = compiled
                    .define(ELEMENT_COUNT_DEFINE)
                    .and_then(eval_integer)
                    .ok_or_else(|| format!("{ELEMENT_COUNT_DEFINE} is not an integer constant"))?;
                Ok(NativeKernel::Strided { element_count })
            }
        }
    }

    /// Elements work-item `global_id` writes, in the order it writes them
    pub fn writes(self, global_id: usize, global_size: usize) -> StepBy<Range<usize>> {
        let end = match self {
            NativeKernel::Elementwise => global_id + 1,
            NativeKernel::Strided { element_count } => element_count,
        };
        (global_id..end).step_by(global_size.max(1))
    }

    /// One past the highest element a launch of `global_size` writes
    fn coverage(self, global_size: usize) -> usize {
        match self {
            NativeKernel::Elementwise => global_size,
            NativeKernel::Strided { element_count } => element_count,
        }
    }

    /// Work-item that owns output element `index`
    fn owner(self, index: usize, global_size: usize) -> usize {
        match self {
            NativeKernel::Elementwise => index,
            NativeKernel::Strided { .. } => index % global_size,
        }
    }
}

/// Find the bundled variant whose body `entry` reproduces
fn recognise(entry: &EntryPoint) -> Result<KernelVariant, String> {
    let bundled = compile(&kernel_bundle(), &build_options(1))
        .map_err(|err| format!("bundled kernels do not compile: {err:?}"))?;

    KernelVariant::ALL
        .into_iter()
        .find(|variant| {
            bundled
                .entry_point(variant.entry_point())
                .is_some_and(|known| known.shape == entry.shape)
        })
        .ok_or_else(|| {
            format!(
                "no host implementation for entry point '{}': the host device only runs the bundled SAXPY bodies",
                entry.name
            )
        })
}

fn check_signature(entry: &EntryPoint) -> Result<(), String> {
    let mismatch = || {
        format!(
            "entry point '{}' must take (float, __global float *, __global float *, __global float *)",
            entry.name
        )
    };

    if entry.params.len() != 4 || entry.params.iter().any(|p| p.ty != "float") {
        return Err(mismatch());
    }

    let kinds: Vec<ParamKind> = entry.params.iter().map(|p| p.kind).collect();
    let input = |kind: ParamKind| matches!(kind, ParamKind::ReadOnlyBuffer | ParamKind::Buffer);
    if kinds[ARG_ALPHA] != ParamKind::Scalar || !input(kinds[ARG_A]) || !input(kinds[ARG_B]) || kinds[ARG_C] != ParamKind::Buffer {
        return Err(mismatch());
    }

    Ok(())
}

/// Operands and geometry of one launch
pub(crate) struct Launch<'a> {
    pub alpha: f32,
    pub a: &'a [f32],
    pub b: &'a [f32],
    pub c: &'a mut [f32],
    pub global_size: usize,
    pub local_size: usize,
}

/// Run `kernel` over the launch's index space.
///
/// Fails without writing anything if a work-item would index past the end of
/// a buffer, or if the local size does not divide the global size.
pub(crate) fn execute(kernel: NativeKernel, launch: Launch<'_>) -> Result<(), String> {
    let Launch {
        alpha,
        a,
        b,
        c,
        global_size,
        local_size,
    } = launch;

    if global_size == 0 || local_size == 0 || global_size % local_size != 0 {
        return Err(format!(
            "global size {global_size} is not a non-zero multiple of local size {local_size}"
        ));
    }

    let covered = kernel.coverage(global_size);
    let shortest = a.len().min(b.len()).min(c.len());
    if covered > shortest {
        return Err(format!(
            "work-item {} indexes element {} of a {shortest}-element buffer",
            kernel.owner(covered - 1, global_size),
            covered - 1
        ));
    }

    // Element i belongs to work-item i % G, so to group (i / L) % groups.
    // Group k therefore owns output tiles k, k + groups, k + 2 * groups, ...
    let group_count = global_size / local_size;
    let mut owned: Vec<Vec<&mut [f32]>> = (0..group_count).map(|_| Vec::new()).collect();
    for (tile, out) in c.chunks_mut(local_size).enumerate() {
        owned[tile % group_count].push(out);
    }

    owned.into_par_iter().enumerate().for_each(|(group, mut tiles)| {
        for local_id in 0..local_size {
            let global_id = group * local_size + local_id;
            for index in kernel.writes(global_id, global_size) {
                let step = index / local_size / group_count;
                if let Some(slot) = tiles.get_mut(step).and_then(|tile| tile.get_mut(index % local_size)) {
                    *slot = alpha * a[index] + b[index];
                }
            }
        }
    });

    Ok(())
}
