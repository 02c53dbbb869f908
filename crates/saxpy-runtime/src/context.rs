//! Execution context and command queue

use std::sync::Arc;

use crate::api::{ComputeApi, ContextId, DeviceId, PlatformId, QueueId, QueueProperties};
use crate::device::{Device, Platform};
use crate::error::{Error, Result};
use crate::resource::{Owned, Released};

/// A platform bound to one or more devices.
///
/// Must outlive every queue, buffer and program created from it; the pipeline
/// releases it last.
#[derive(Debug)]
pub struct ExecutionContext {
    owned: Owned<ContextId>,
    platform: PlatformId,
    devices: Vec<DeviceId>,
}

impl ExecutionContext {
    #[tracing::instrument(skip_all, fields(platform = %platform.info.name, devices = devices.len()))]
    pub fn create(api: Arc<dyn ComputeApi>, platform: &Platform, devices: &[Device]) -> Result<Self> {
        let device_ids: Vec<DeviceId> = devices.iter().map(|device| device.id).collect();
        let raw = api
            .create_context(platform.id, &device_ids)
            .map_err(Error::ContextCreationFailed)?;

        tracing::debug!(context = %raw, "context_created");
        Ok(Self {
            owned: Owned::new(api, raw),
            platform: platform.id,
            devices: device_ids,
        })
    }

    pub fn raw(&self) -> ContextId {
        self.owned.raw()
    }

    pub fn api(&self) -> &Arc<dyn ComputeApi> {
        self.owned.api()
    }

    pub fn platform(&self) -> PlatformId {
        self.platform
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn release(&mut self) -> Result<Released> {
        self.owned.release()
    }
}

/// In-order submission channel to one device.
///
/// Transfers live in [`crate::memory`] and kernel submission in
/// [`crate::dispatch`].
#[derive(Debug)]
pub struct CommandQueue {
    owned: Owned<QueueId>,
    device: DeviceId,
    properties: QueueProperties,
}

impl CommandQueue {
    #[tracing::instrument(skip_all, fields(device = %device.info.name, profiling = properties.profiling))]
    pub fn create(context: &ExecutionContext, device: &Device, properties: QueueProperties) -> Result<Self> {
        let api = Arc::clone(context.api());
        let raw = api
            .create_queue(context.raw(), device.id, properties)
            .map_err(Error::QueueCreationFailed)?;

        tracing::debug!(queue = %raw, "queue_created");
        Ok(Self {
            owned: Owned::new(api, raw),
            device: device.id,
            properties,
        })
    }

    pub fn raw(&self) -> QueueId {
        self.owned.raw()
    }

    pub fn api(&self) -> &Arc<dyn ComputeApi> {
        self.owned.api()
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn profiling(&self) -> bool {
        self.properties.profiling
    }

    /// Block until everything submitted so far has completed
    pub fn finish(&self) -> Result<()> {
        self.api().finish(self.raw()).map_err(|source| Error::SyncFailed {
            operation: "queue finish",
            source,
        })
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

    #[test]
    fn creates_profiling_queue() {
        let api: Arc<dyn ComputeApi> = Arc::new(HostApi::new());
        let selection = DeviceEnumerator::new(Arc::clone(&api)).select(DeviceClass::Cpu, None).unwrap();

        let context = ExecutionContext::create(api, selection.platform(), selection.devices()).unwrap();
        let queue = CommandQueue::create(&context, selection.primary(), QueueProperties { profiling: true }).unwrap();

        assert!(queue.profiling());
        assert_eq!(context.devices(), selection.device_ids().as_slice());
        queue.finish().unwrap();
    }

    #[test]
    fn context_without_devices_fails() {
        let api: Arc<dyn ComputeApi> = Arc::new(HostApi::new());
        let platform = DeviceEnumerator::new(Arc::clone(&api)).platforms().unwrap().remove(0);
        let err = ExecutionContext::create(api, &platform, &[]).unwrap_err();
        assert!(matches!(err, Error::ContextCreationFailed(_)));
        assert!(err.is_fatal());
    }
}
