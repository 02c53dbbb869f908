//! Scoped ownership of device handles
//!
//! Every handle the pipeline acquires is wrapped in an [`Owned`] guard. The
//! guard releases its handle exactly once: either through an explicit
//! [`Owned::release`] (used by the ordered teardown) or on drop, which covers
//! every early-return path.

use std::fmt;
use std::sync::Arc;

use saxpy_tracing::performance::record_release;

use crate::api::{ComputeApi, Handle};
use crate::error::{Error, Result};

/// Outcome of asking a guard to release its handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// The handle was released by this call
    Now,
    /// The handle had already been released earlier
    Already,
}

/// Owning guard around one device handle
pub struct Owned<H>
where
    H: Copy + Into<Handle> + fmt::Display,
{
    api: Arc<dyn ComputeApi>,
    raw: H,
    released: bool,
}

impl<H> Owned<H>
where
    H: Copy + Into<Handle> + fmt::Display,
{
    pub(crate) fn new(api: Arc<dyn ComputeApi>, raw: H) -> Self {
        tracing::trace!(handle = %raw, "handle_acquired");
        Self {
            api,
            raw,
            released: false,
        }
    }

    /// The raw handle
    pub fn raw(&self) -> H {
        self.raw
    }

    /// The runtime that issued the handle
    pub fn api(&self) -> &Arc<dyn ComputeApi> {
        &self.api
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the handle if it is still held.
    ///
    /// The guard is marked released before the runtime call, so a failed
    /// release is reported once and never retried.
    pub fn release(&mut self) -> Result<Released> {
        if self.released {
            return Ok(Released::Already);
        }
        self.released = true;

        let handle: Handle = self.raw.into();
        let outcome = self.api.release(handle);
        record_release(&handle.to_string(), outcome.is_ok());
        outcome
            .map(|()| Released::Now)
            .map_err(|source| Error::ReleaseFailed { handle, source })
    }
}

impl<H> Drop for Owned<H>
where
    H: Copy + Into<Handle> + fmt::Display,
{
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(error = %err, "release on drop failed");
        }
    }
}

impl<H> fmt::Debug for Owned<H>
where
    H: Copy + Into<Handle> + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned")
            .field("handle", &self.raw.to_string())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AccessDirection, DeviceClass};
    use crate::backends::HostApi;

    fn context(api: &Arc<dyn ComputeApi>) -> crate::api::ContextId {
        let platform = api.platforms().unwrap()[0];
        let devices = api.devices(platform, DeviceClass::All).unwrap();
        api.create_context(platform, &devices).unwrap()
    }

    #[test]
    fn explicit_release_is_idempotent() {
        let api: Arc<dyn ComputeApi> = Arc::new(HostApi::new());
        let ctx = context(&api);
        let buffer = api.create_buffer(ctx, 64, AccessDirection::ReadOnly).unwrap();

        let mut owned = Owned::new(Arc::clone(&api), buffer);
        assert_eq!(owned.release().unwrap(), Released::Now);
        assert_eq!(owned.release().unwrap(), Released::Already);
        assert!(owned.is_released());

        api.release(ctx.into()).unwrap();
    }

    #[test]
    fn drop_releases_handle() {
        let api: Arc<dyn ComputeApi> = Arc::new(HostApi::new());
        let ctx = context(&api);
        {
            let _owned = Owned::new(Arc::clone(&api), ctx);
        }
        // A second release of the same context is rejected by the runtime.
        assert!(api.release(ctx.into()).is_err());
    }

    #[test]
    fn failed_release_is_not_retried() {
        let api: Arc<dyn ComputeApi> = Arc::new(HostApi::new());
        let ctx = context(&api);
        api.release(ctx.into()).unwrap();

        let mut owned = Owned::new(Arc::clone(&api), ctx);
        assert!(matches!(owned.release(), Err(Error::ReleaseFailed { .. })));
        assert_eq!(owned.release().unwrap(), Released::Already);
    }
}
