//! Work decomposition, argument binding and kernel submission
//!
//! For `N` elements and a work load of `W` elements per work-item the launch
//! uses `global_size = N / W` work-items in groups of `local_size`. Work-item
//! `i` of the strided variant touches elements `i, i + global_size,
//! i + 2 * global_size, ...`, so at every step adjacent work-items read
//! adjacent elements.
//!
//! A decomposition whose global size is not a multiple of its local size is
//! rejected here, before anything reaches the device.

use serde::Serialize;

use crate::api::{KernelArg, KernelId, NdRange};
use crate::context::CommandQueue;
use crate::error::{Error, Result};
use crate::event::CompletionEvent;
use crate::memory::DeviceBuffer;
use crate::resource::{Owned, Released};

/// Global and local sizes of a one-dimensional launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkDecomposition {
    element_count: usize,
    work_load: usize,
    global_size: usize,
    local_size: usize,
}

impl WorkDecomposition {
    pub fn new(element_count: usize, work_load: usize, local_size: usize) -> Result<Self> {
        if work_load == 0 || local_size == 0 {
            return Err(Error::dispatch(
                element_count,
                local_size,
                format!("work load ({work_load}) and local size ({local_size}) must be non-zero"),
            ));
        }
        if element_count == 0 || element_count % work_load != 0 {
            return Err(Error::dispatch(
                element_count,
                local_size,
                format!("element count {element_count} is not a non-zero multiple of work load {work_load}"),
            ));
        }

        let global_size = element_count / work_load;
        if global_size % local_size != 0 {
            return Err(Error::dispatch(
                global_size,
                local_size,
                format!("global size {global_size} is not evenly divisible by local size {local_size}"),
            ));
        }

        Ok(Self {
            element_count,
            work_load,
            global_size,
            local_size,
        })
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Elements processed by each work-item
    pub fn elements_per_item(&self) -> usize {
        self.work_load
    }

    pub fn global_size(&self) -> usize {
        self.global_size
    }

    pub fn local_size(&self) -> usize {
        self.local_size
    }

    /// Distance between consecutive elements of one work-item
    pub fn stride(&self) -> usize {
        self.global_size
    }

    pub fn group_count(&self) -> usize {
        self.global_size / self.local_size
    }

    pub fn nd_range(&self) -> NdRange {
        NdRange::linear(self.global_size, self.local_size)
    }
}

/// One entry point of a built program, with its argument slots
#[derive(Debug)]
pub struct KernelHandle {
    owned: Owned<KernelId>,
    name: String,
    bound: Vec<bool>,
}

impl KernelHandle {
    pub(crate) fn new(owned: Owned<KernelId>, name: &str, arg_count: u32) -> Self {
        Self {
            owned,
            name: name.to_string(),
            bound: vec![false; arg_count as usize],
        }
    }

    pub fn raw(&self) -> KernelId {
        self.owned.raw()
    }

    /// Entry point name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_count(&self) -> u32 {
        self.bound.len() as u32
    }

    pub fn bind_scalar(&mut self, index: u32, value: f32) -> Result<()> {
        self.bind(index, KernelArg::Float(value))
    }

    pub fn bind_buffer(&mut self, index: u32, buffer: &DeviceBuffer) -> Result<()> {
        self.bind(index, KernelArg::Buffer(buffer.raw()))
    }

    fn bind(&mut self, index: u32, arg: KernelArg) -> Result<()> {
        self.owned
            .api()
            .set_kernel_arg(self.raw(), index, arg)
            .map_err(|source| Error::ArgBindFailed {
                index,
                reason: source.to_string(),
            })?;

        if let Some(slot) = self.bound.get_mut(index as usize) {
            *slot = true;
        }
        tracing::trace!(kernel = %self.name, index, ?arg, "kernel_arg_bound");
        Ok(())
    }

    /// First argument slot that has not been bound
    pub fn first_unbound(&self) -> Option<u32> {
        self.bound.iter().position(|bound| !bound).map(|index| index as u32)
    }

    pub fn release(&mut self) -> Result<Released> {
        self.owned.release()
    }
}

impl CommandQueue {
    /// Submit `kernel` over `work` and return its completion event.
    ///
    /// Submission does not wait for the kernel to finish.
    #[tracing::instrument(
        skip_all,
        fields(kernel = %kernel.name(), global_size = work.global_size(), local_size = work.local_size())
    )]
    pub fn dispatch(&self, kernel: &KernelHandle, work: &WorkDecomposition) -> Result<CompletionEvent> {
        if let Some(index) = kernel.first_unbound() {
            return Err(Error::ArgBindFailed {
                index,
                reason: format!("argument {index} of '{}' was never bound", kernel.name()),
            });
        }

        let raw = self
            .api()
            .enqueue_kernel(self.raw(), kernel.raw(), &work.nd_range(), &[])
            .map_err(|source| Error::dispatch(work.global_size(), work.local_size(), source.to_string()))?;

        tracing::debug!(event = %raw, groups = work.group_count(), "kernel_enqueued");
        Ok(CompletionEvent::new(Owned::new(std::sync::Arc::clone(self.api()), raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposes_default_workload() {
        let work = WorkDecomposition::new(1024 * 1024 * 64, 4, 32).unwrap();
        assert_eq!(work.global_size(), 16 * 1024 * 1024);
        assert_eq!(work.stride(), work.global_size());
        assert_eq!(work.elements_per_item(), 4);
        assert_eq!(work.group_count(), 512 * 1024);
        assert_eq!(work.nd_range(), NdRange::linear(16 * 1024 * 1024, 32));
    }

    #[test]
    fn rejects_indivisible_local_size() {
        let err = WorkDecomposition::new(1000, 4, 32).unwrap_err();
        match err {
            Error::DispatchFailed {
                global_size,
                local_size,
                ..
            } => {
                assert_eq!(global_size, 250);
                assert_eq!(local_size, 32);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_partial_work_load() {
        assert!(matches!(
            WorkDecomposition::new(1026, 4, 1),
            Err(Error::DispatchFailed { .. })
        ));
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(WorkDecomposition::new(0, 1, 1).is_err());
        assert!(WorkDecomposition::new(64, 0, 1).is_err());
        assert!(WorkDecomposition::new(64, 1, 0).is_err());
    }

    #[test]
    fn one_element_per_item() {
        let work = WorkDecomposition::new(256, 1, 64).unwrap();
        assert_eq!(work.global_size(), 256);
        assert_eq!(work.group_count(), 4);
    }
}
