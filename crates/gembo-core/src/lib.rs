//! gembo - Reference-counted GEM buffer objects

pub mod bo;
pub mod device;
pub mod domain;
pub mod drm;
pub mod error;
pub mod guard;
pub mod manager;
pub mod shm;

#[cfg(test)]
mod mock;

pub use bo::{BufferObject, Released};
pub use device::{CreateRequest, Device, DeviceResult};
pub use domain::{AccessMode, CreateFlags, Domains};
pub use drm::{DrmDevice, DEFAULT_DRM_DEVICE};
pub use error::{Error, Result};
pub use guard::MapGuard;
pub use manager::BoManager;
pub use shm::{ShmDevice, DEFAULT_NAMESPACE};
