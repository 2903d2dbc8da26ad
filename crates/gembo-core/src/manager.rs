//! Buffer object manager

use crate::bo::BufferObject;
use crate::device::{CreateRequest, Device};
use crate::domain::{CreateFlags, Domains};
use crate::drm::DrmDevice;
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Factory for buffer objects on one device connection.
///
/// The manager only holds the device connection. Objects it creates keep
/// their own reference to the connection, so dropping the manager never
/// invalidates or destroys outstanding objects.
pub struct BoManager {
    device: Arc<dyn Device>,
}

impl BoManager {
    /// Create a manager over an existing device connection
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self { device }
    }

    /// Open a DRM device node and create a manager over it
    pub fn open_drm(path: impl AsRef<Path>) -> Result<Self> {
        let device = DrmDevice::open(path)?;
        Ok(Self::new(Arc::new(device)))
    }

    /// Get the device connection
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Allocate a new buffer object, or open an existing one when `name`
    /// is nonzero.
    ///
    /// When opening by name the device reports the authoritative size and
    /// `size` is ignored.
    pub fn create_or_open(
        &self,
        size: u64,
        alignment: u64,
        domains: Domains,
        flags: CreateFlags,
        name: u32,
    ) -> Result<BufferObject> {
        if name != 0 {
            let (handle, actual) = self
                .device
                .gem_open(name)
                .map_err(|errno| Error::open_failed(name, errno))?;
            if actual != size {
                debug!(name, requested = size, actual, "size taken from named object");
            }
            debug!(name, handle, size = actual, "opened buffer object");
            return Ok(BufferObject::new(
                self.device.clone(),
                handle,
                name,
                actual,
                alignment,
                domains,
                flags,
            ));
        }

        let req = CreateRequest {
            size,
            alignment,
            domains,
            flags,
        };
        let handle = self.device.gem_create(&req).map_err(|errno| {
            warn!(size, alignment, domains = domains.bits(), %errno, "failed to allocate buffer object");
            Error::AllocationFailed {
                size,
                alignment,
                domains,
                errno,
            }
        })?;
        debug!(handle, size, alignment, domains = domains.bits(), "allocated buffer object");

        Ok(BufferObject::new(
            self.device.clone(),
            handle,
            0,
            size,
            alignment,
            domains,
            flags,
        ))
    }

    /// Allocate a new buffer object
    pub fn create(
        &self,
        size: u64,
        alignment: u64,
        domains: Domains,
        flags: CreateFlags,
    ) -> Result<BufferObject> {
        self.create_or_open(size, alignment, domains, flags, 0)
    }

    /// Open a buffer object by global name
    pub fn open(&self, name: u32) -> Result<BufferObject> {
        if name == 0 {
            return Err(Error::NotFound {
                name,
                errno: nix::errno::Errno::ENOENT,
            });
        }
        self.create_or_open(0, 0, Domains::empty(), CreateFlags::empty(), name)
    }
}

impl std::fmt::Debug for BoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoManager").finish_non_exhaustive()
    }
}
