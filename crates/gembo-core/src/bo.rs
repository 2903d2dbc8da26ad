//! Buffer object handle and mapping state

use crate::device::Device;
use crate::domain::{AccessMode, CreateFlags, Domains};
use crate::guard::MapGuard;
use crate::{Error, Result};
use nix::errno::Errno;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace, warn};

/// Outcome of [`BufferObject::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// Other references remain; the object is still alive.
    Alive,
    /// That was the last reference; the kernel handle has been closed.
    Destroyed,
}

/// A live virtual-memory mapping
#[derive(Clone, Copy)]
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

/// Mapping refcount and the cached pointer.
///
/// `mapping` is `Some` iff `count > 0`.
#[derive(Default)]
struct MapState {
    count: u32,
    mapping: Option<Mapping>,
}

struct BoInner {
    device: Arc<dyn Device>,
    handle: u32,
    name: AtomicU32,
    size: u64,
    alignment: u64,
    domains: Domains,
    flags: CreateFlags,
    map: Mutex<MapState>,
}

// Safety: the mapped pointer is only read or replaced under the `map` lock,
// and the region it points at is process-wide shared memory.
unsafe impl Send for BoInner {}
unsafe impl Sync for BoInner {}

impl BoInner {
    fn lock_map(&self) -> MutexGuard<'_, MapState> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BoInner {
    fn drop(&mut self) {
        let state = self.map.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(m) = state.mapping.take() {
            trace!(handle = self.handle, count = state.count, "unmapping on final release");
            // SAFETY: the last reference is gone, so no guard or pointer
            // handed out by this object can still be in use.
            unsafe { self.device.unmap_region(m.ptr, m.len) };
            state.count = 0;
        }

        if self.handle == 0 {
            return;
        }
        if let Err(errno) = self.device.gem_close(self.handle) {
            warn!(handle = self.handle, %errno, "failed to close buffer object");
        } else {
            debug!(handle = self.handle, "closed buffer object");
        }
    }
}

/// Reference-counted handle to a kernel buffer object.
///
/// Each `BufferObject` value owns one reference. [`acquire`](Self::acquire)
/// (or `clone`) adds a reference; [`release`](Self::release) or dropping the
/// value gives it back. The last release unmaps any active mapping and then
/// closes the kernel handle.
///
/// Handles are `Send + Sync`: the reference count is atomic and the mapping
/// state is lock-protected. Accesses to the mapped bytes themselves are not
/// synchronized.
#[derive(Clone)]
pub struct BufferObject {
    inner: Arc<BoInner>,
}

impl BufferObject {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        device: Arc<dyn Device>,
        handle: u32,
        name: u32,
        size: u64,
        alignment: u64,
        domains: Domains,
        flags: CreateFlags,
    ) -> Self {
        Self {
            inner: Arc::new(BoInner {
                device,
                handle,
                name: AtomicU32::new(name),
                size,
                alignment,
                domains,
                flags,
                map: Mutex::new(MapState::default()),
            }),
        }
    }

    /// Kernel handle (process local)
    pub fn handle(&self) -> u32 {
        self.inner.handle
    }

    /// Global name, 0 if the object was never opened or exported by name
    pub fn global_name(&self) -> u32 {
        self.inner.name.load(Ordering::Acquire)
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// Alignment in bytes
    pub fn alignment(&self) -> u64 {
        self.inner.alignment
    }

    pub fn domains(&self) -> Domains {
        self.inner.domains
    }

    pub fn flags(&self) -> CreateFlags {
        self.inner.flags
    }

    /// Current number of references
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Current number of outstanding maps
    pub fn map_count(&self) -> u32 {
        self.inner.lock_map().count
    }

    /// Whether the object is currently mapped
    pub fn is_mapped(&self) -> bool {
        self.map_count() > 0
    }

    /// Mapped address, `None` unless mapped
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.inner.lock_map().mapping.map(|m| m.ptr)
    }

    /// Add a reference
    pub fn acquire(&self) -> BufferObject {
        self.clone()
    }

    /// Give back this reference.
    ///
    /// Exactly one of the concurrent releasers of the last references
    /// observes [`Released::Destroyed`].
    pub fn release(self) -> Released {
        let handle = self.inner.handle;
        match Arc::into_inner(self.inner) {
            Some(inner) => {
                drop(inner);
                Released::Destroyed
            }
            None => {
                trace!(handle, "released reference");
                Released::Alive
            }
        }
    }

    /// Map the object into this process.
    ///
    /// Nested calls only bump the map count; the device is asked for a
    /// mapping on the first one. `for_write` does not restrict access: once
    /// mapped, the region is always readable and writable.
    ///
    /// On failure the map count is left unchanged.
    pub fn map(&self, for_write: bool) -> Result<()> {
        self.map_inner(for_write).map(|_| ())
    }

    fn map_inner(&self, for_write: bool) -> Result<Mapping> {
        let inner = &*self.inner;
        let mut state = inner.lock_map();
        if let Some(m) = state.mapping {
            state.count += 1;
            trace!(handle = inner.handle, count = state.count, "nested map");
            return Ok(m);
        }

        if inner.handle == 0 {
            return Err(Error::InvalidHandle);
        }

        let offset = inner
            .device
            .gem_mmap_offset(inner.handle, inner.size)
            .map_err(|errno| {
                error!(handle = inner.handle, %errno, "mmap offset query failed");
                Error::Device {
                    op: "mmap offset",
                    handle: inner.handle,
                    errno,
                }
            })?;

        let len = usize::try_from(inner.size).map_err(|_| Error::MapFailed {
            handle: inner.handle,
            errno: Errno::EOVERFLOW,
        })?;
        let ptr = inner.device.map_region(offset, len).map_err(|errno| {
            error!(handle = inner.handle, offset, %errno, "mmap failed");
            Error::MapFailed {
                handle: inner.handle,
                errno,
            }
        })?;

        let m = Mapping { ptr, len };
        state.count = 1;
        state.mapping = Some(m);
        trace!(handle = inner.handle, for_write, "mapped");
        Ok(m)
    }

    /// Drop one map. The last one tears the mapping down.
    ///
    /// # Panics
    ///
    /// Panics if the object is not mapped.
    pub fn unmap(&self) {
        let inner = &*self.inner;
        let mut state = inner.lock_map();
        assert!(
            state.count > 0,
            "unmap of buffer object {} without a matching map",
            inner.handle
        );
        state.count -= 1;
        if state.count > 0 {
            return;
        }
        if let Some(m) = state.mapping.take() {
            // SAFETY: the count reached zero, so every map has been paired
            // with an unmap and callers no longer hold the pointer.
            unsafe { inner.device.unmap_region(m.ptr, m.len) };
            trace!(handle = inner.handle, "unmapped");
        }
    }

    /// Map for the lifetime of the returned guard
    pub fn mapping(&self, mode: AccessMode) -> Result<MapGuard<'_>> {
        let m = self.map_inner(mode.is_write())?;
        Ok(MapGuard::new(self, m.ptr, m.len, mode))
    }

    /// Block until the GPU is done with the object
    pub fn wait_idle(&self) -> Result<()> {
        let handle = self.inner.handle;
        loop {
            match self.inner.device.gem_wait_idle(handle) {
                Ok(()) => return Ok(()),
                Err(Errno::EBUSY) => {
                    trace!(handle, "device busy, retrying wait");
                    std::hint::spin_loop();
                }
                Err(errno) => {
                    return Err(Error::Device {
                        op: "wait idle",
                        handle,
                        errno,
                    })
                }
            }
        }
    }

    /// Tell the device which domains the object must be coherent for
    pub fn set_domain(&self, read_domains: Domains, write_domain: Domains) -> Result<()> {
        let handle = self.inner.handle;
        self.inner
            .device
            .gem_set_domain(handle, read_domains, write_domain)
            .map_err(|errno| Error::Device {
                op: "set domain",
                handle,
                errno,
            })
    }

    /// Give the object a global name other processes can open.
    ///
    /// Returns the existing name if it already has one.
    pub fn export_name(&self) -> Result<u32> {
        let current = self.global_name();
        if current != 0 {
            return Ok(current);
        }
        let handle = self.inner.handle;
        let name = self
            .inner
            .device
            .gem_flink(handle)
            .map_err(|errno| Error::Device {
                op: "flink",
                handle,
                errno,
            })?;
        // Flink of the same handle yields the same name, so a racing
        // exporter stores an identical value.
        self.inner.name.store(name, Ordering::Release);
        debug!(handle, name, "exported buffer object");
        Ok(name)
    }
}

impl std::fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferObject")
            .field("handle", &self.handle())
            .field("name", &self.global_name())
            .field("size", &self.size())
            .field("domains", &self.domains())
            .field("map_count", &self.map_count())
            .finish()
    }
}
