//! Device runtimes implementing [`ComputeApi`]
//!
//! - `host` - in-process reference device (always available)
//! - `opencl` - OpenCL drivers through `opencl3` (`opencl` feature)

pub mod host;
pub mod opencl;

use std::sync::Arc;

pub use host::HostApi;
pub use opencl::OpenClApi;

use crate::api::{ComputeApi, DeviceClass};
use crate::config::BackendKind;
use crate::error::Result;

/// Open the runtime named by `kind`.
///
/// The host device reports itself as `class` so that device selection by
/// class behaves the same on both runtimes.
pub fn connect(kind: BackendKind, class: DeviceClass) -> Result<Arc<dyn ComputeApi>> {
    let api: Arc<dyn ComputeApi> = match kind {
        BackendKind::Host => Arc::new(HostApi::emulating(class)),
        BackendKind::OpenCl => opencl::connect()?,
    };
    tracing::debug!(backend = api.backend_name(), "backend_connected");
    Ok(api)
}
