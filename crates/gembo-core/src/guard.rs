//! RAII mapping guard

use crate::bo::BufferObject;
use crate::domain::AccessMode;
use crate::{Error, Result};
use std::ptr::NonNull;

/// Holds one map of a buffer object; unmaps on drop.
///
/// The mapped bytes are shared with the GPU and with every other mapper of
/// the same object, in this process or another. Nothing orders those
/// accesses, which is why the slice views are `unsafe`.
pub struct MapGuard<'a> {
    bo: &'a BufferObject,
    ptr: NonNull<u8>,
    len: usize,
    mode: AccessMode,
}

impl<'a> MapGuard<'a> {
    pub(crate) fn new(bo: &'a BufferObject, ptr: NonNull<u8>, len: usize, mode: AccessMode) -> Self {
        Self { bo, ptr, len, mode }
    }

    /// The mapped buffer object
    pub fn buffer(&self) -> &BufferObject {
        self.bo
    }

    /// Get access mode
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// View the mapping as bytes.
    ///
    /// # Safety
    ///
    /// No one else (GPU, other mappers, other processes) may write the
    /// region while the slice is alive.
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    /// View the mapping as mutable bytes, requires ReadWrite mode.
    ///
    /// # Safety
    ///
    /// No one else (GPU, other mappers, other processes) may access the
    /// region while the slice is alive.
    pub unsafe fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        if self.mode == AccessMode::ReadOnly {
            return Err(Error::ReadOnly);
        }
        Ok(std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len))
    }
}

impl Drop for MapGuard<'_> {
    fn drop(&mut self) {
        self.bo.unmap();
    }
}
