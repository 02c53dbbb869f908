//! Device memory management
//!
//! Buffers are allocated with a declared [`AccessDirection`] and moved
//! between host and device through a [`CommandQueue`]:
//!
//! - uploads are blocking and return once the data is on the device
//! - downloads wait on the completion events passed to them, so the read is
//!   ordered after the dispatch that produced the data

use bytemuck::Pod;
use saxpy_tracing::performance::record_transfer;
use saxpy_tracing::timed_block;

use crate::api::{AccessDirection, BufferId, EventId};
use crate::context::{CommandQueue, ExecutionContext};
use crate::error::{Error, Result, TransferDirection};
use crate::event::CompletionEvent;
use crate::resource::{Owned, Released};

/// A device-resident buffer
#[derive(Debug)]
pub struct DeviceBuffer {
    owned: Owned<BufferId>,
    size_bytes: usize,
    access: AccessDirection,
}

impl DeviceBuffer {
    /// Allocate `size_bytes` on the context's devices.
    ///
    /// `access` states how kernels use the buffer. It is passed to the
    /// runtime but not checked against kernel usage.
    #[tracing::instrument(skip(context), fields(context = %context.raw()))]
    pub fn allocate(context: &ExecutionContext, size_bytes: usize, access: AccessDirection) -> Result<Self> {
        let api = std::sync::Arc::clone(context.api());
        let raw = api
            .create_buffer(context.raw(), size_bytes, access)
            .map_err(|source| Error::BufferAllocationFailed {
                size_bytes,
                access,
                source,
            })?;

        tracing::debug!(buffer = %raw, "buffer_allocated");
        Ok(Self {
            owned: Owned::new(api, raw),
            size_bytes,
            access,
        })
    }

    /// Allocate room for `len` values of `T`
    pub fn allocate_for<T: Pod>(context: &ExecutionContext, len: usize, access: AccessDirection) -> Result<Self> {
        let size_bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| Error::InvalidConfig(format!("{len} elements overflow the address space")))?;
        Self::allocate(context, size_bytes, access)
    }

    pub fn raw(&self) -> BufferId {
        self.owned.raw()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn access(&self) -> AccessDirection {
        self.access
    }

    pub fn release(&mut self) -> Result<Released> {
        self.owned.release()
    }
}

impl CommandQueue {
    /// Blocking copy of `data` into the start of `buffer`
    #[tracing::instrument(skip_all, fields(buffer = %buffer.raw()))]
    pub fn upload<T: Pod>(&self, buffer: &DeviceBuffer, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let direction = TransferDirection::HostToDevice;
        check_fits(direction, bytes.len(), buffer)?;

        let (outcome, duration_us) = timed_block!("upload", { self.api().write_buffer(self.raw(), buffer.raw(), bytes) });
        outcome.map_err(|source| Error::transfer(direction, bytes.len(), source))?;

        record_transfer(bytes.len(), direction.tag(), duration_us);
        Ok(())
    }

    /// Copy the start of `buffer` into `data` once every event in `wait_for`
    /// has completed
    #[tracing::instrument(skip_all, fields(buffer = %buffer.raw(), wait_for = wait_for.len()))]
    pub fn download<T: Pod>(&self, buffer: &DeviceBuffer, data: &mut [T], wait_for: &[&CompletionEvent]) -> Result<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
        let len = bytes.len();
        let direction = TransferDirection::DeviceToHost;
        check_fits(direction, len, buffer)?;

        let events: Vec<EventId> = wait_for.iter().map(|event| event.raw()).collect();
        let (outcome, duration_us) =
            timed_block!("download", { self.api().read_buffer(self.raw(), buffer.raw(), bytes, &events) });
        outcome.map_err(|source| Error::transfer(direction, len, source))?;

        record_transfer(len, direction.tag(), duration_us);
        Ok(())
    }
}

fn check_fits(direction: TransferDirection, len: usize, buffer: &DeviceBuffer) -> Result<()> {
    if len > buffer.size_bytes() {
        return Err(Error::transfer(
            direction,
            len,
            format!("{} holds only {} bytes", buffer.raw(), buffer.size_bytes()),
        ));
    }
    Ok(())
}
