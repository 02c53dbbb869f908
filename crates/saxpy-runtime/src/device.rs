//! Device enumeration
//!
//! Discovers platforms and filters their devices by class. Selection is
//! deterministic: the first platform (optionally the first whose vendor
//! matches a filter) and the first admitted device.

use std::sync::Arc;

use crate::api::{ComputeApi, DeviceClass, DeviceId, DeviceInfo, PlatformId, PlatformInfo};
use crate::error::{Error, Result};
use crate::status;

/// A platform and its identification
#[derive(Debug, Clone)]
pub struct Platform {
    pub id: PlatformId,
    pub info: PlatformInfo,
}

/// A device and its identification
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub info: DeviceInfo,
}

/// Result of [`DeviceEnumerator::select`].
///
/// Only the enumerator builds one, so it always holds at least one device.
#[derive(Debug, Clone)]
pub struct Selection {
    platform: Platform,
    primary: Device,
    /// Every admitted device of the platform, in runtime order
    devices: Vec<Device>,
}

impl Selection {
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// The device work is submitted to (the first admitted one)
    pub fn primary(&self) -> &Device {
        &self.primary
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|device| device.id).collect()
    }
}

/// Platform and device discovery over a [`ComputeApi`]
pub struct DeviceEnumerator {
    api: Arc<dyn ComputeApi>,
}

impl DeviceEnumerator {
    pub fn new(api: Arc<dyn ComputeApi>) -> Self {
        Self { api }
    }

    /// All platforms, or [`Error::NoPlatformFound`] if there are none
    #[tracing::instrument(skip(self), fields(backend = self.api.backend_name()))]
    pub fn platforms(&self) -> Result<Vec<Platform>> {
        let ids = self.api.platforms().map_err(Error::DiscoveryFailed)?;
        if ids.is_empty() {
            return Err(Error::NoPlatformFound);
        }

        let platforms = ids
            .into_iter()
            .map(|id| {
                let info = self.api.platform_info(id).map_err(Error::DiscoveryFailed)?;
                Ok(Platform { id, info })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(count = platforms.len(), "platforms_enumerated");
        Ok(platforms)
    }

    /// Devices of `platform` admitted by `class`, or [`Error::NoDeviceFound`]
    #[tracing::instrument(skip(self, platform), fields(platform = %platform.info.name, class = %class))]
    pub fn devices(&self, platform: &Platform, class: DeviceClass) -> Result<Vec<Device>> {
        let ids = match self.api.devices(platform.id, class) {
            Ok(ids) => ids,
            Err(err) if err.code == status::DEVICE_NOT_FOUND => Vec::new(),
            Err(err) => return Err(Error::DiscoveryFailed(err)),
        };

        let devices = ids
            .into_iter()
            .map(|id| {
                let info = self.api.device_info(id).map_err(Error::DiscoveryFailed)?;
                Ok(Device { id, info })
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|device| class.admits(device.info.class))
            .collect::<Vec<_>>();

        if devices.is_empty() {
            return Err(Error::NoDeviceFound {
                class,
                platform: platform.info.name.clone(),
            });
        }

        tracing::debug!(count = devices.len(), "devices_enumerated");
        Ok(devices)
    }

    /// Pick a platform and its devices.
    ///
    /// With a `vendor` filter the first platform whose vendor contains the
    /// filter (case-insensitive) is used; without one, the first platform.
    pub fn select(&self, class: DeviceClass, vendor: Option<&str>) -> Result<Selection> {
        let platforms = self.platforms()?;

        let platform = match vendor {
            Some(filter) => {
                let needle = filter.to_ascii_lowercase();
                platforms
                    .into_iter()
                    .find(|p| p.info.vendor.to_ascii_lowercase().contains(&needle))
                    .ok_or(Error::NoPlatformFound)?
            }
            None => platforms.into_iter().next().ok_or(Error::NoPlatformFound)?,
        };

        let devices = self.devices(&platform, class)?;
        let primary = devices.first().cloned().ok_or_else(|| Error::NoDeviceFound {
            class,
            platform: platform.info.name.clone(),
        })?;

        tracing::info!(
            platform = %platform.info.name,
            vendor = %platform.info.vendor,
            device = %primary.info.name,
            class = %primary.info.class,
            max_work_group_size = primary.info.max_work_group_size,
            compute_units = primary.info.compute_units,
            "device_selected"
        );

        Ok(Selection {
            platform,
            primary,
            devices,
        })
    }
}
