//! Device backend interface
//!
//! A [`Device`] is the kernel memory manager as seen from user space. Buffer
//! objects never talk to the kernel directly; every lifecycle and mapping
//! operation is dispatched through the device their manager was built with.

use crate::domain::{CreateFlags, Domains};
use nix::errno::Errno;
use std::ptr::NonNull;

/// Result of a raw device call. The error is the kernel status code.
pub type DeviceResult<T> = std::result::Result<T, Errno>;

/// Parameters of a fresh allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateRequest {
    pub size: u64,
    pub alignment: u64,
    pub domains: Domains,
    pub flags: CreateFlags,
}

/// Kernel-side buffer object operations.
///
/// Handles are process-local; names are global and survive across
/// processes that share the same backend.
pub trait Device: Send + Sync {
    /// Open an object by global name, returning its handle and size.
    fn gem_open(&self, name: u32) -> DeviceResult<(u32, u64)>;

    /// Allocate a new object, returning its handle.
    fn gem_create(&self, req: &CreateRequest) -> DeviceResult<u32>;

    /// Release a handle.
    fn gem_close(&self, handle: u32) -> DeviceResult<()>;

    /// Publish a global name for a handle.
    fn gem_flink(&self, handle: u32) -> DeviceResult<u32>;

    /// Query the offset to pass to [`Device::map_region`] for a handle.
    fn gem_mmap_offset(&self, handle: u32, size: u64) -> DeviceResult<u64>;

    /// Map `len` bytes at `offset` read/write, shared with the device.
    fn map_region(&self, offset: u64, len: usize) -> DeviceResult<NonNull<u8>>;

    /// Tear down a mapping returned by [`Device::map_region`].
    ///
    /// # Safety
    ///
    /// `ptr` and `len` must come from a single successful `map_region` call
    /// and no reference into the region may outlive this call.
    unsafe fn unmap_region(&self, ptr: NonNull<u8>, len: usize);

    /// Declare the domains the object must be coherent for on next access.
    fn gem_set_domain(&self, handle: u32, read: Domains, write: Domains) -> DeviceResult<()>;

    /// Wait for pending GPU work on the object. `EBUSY` means try again.
    fn gem_wait_idle(&self, handle: u32) -> DeviceResult<()>;
}
