//! POSIX shared memory device backend
//!
//! Emulates GEM on hosts without a GPU: every buffer object is a named
//! shared memory region, and exporting an object publishes the region's key
//! as its global name. Any process using the same namespace can open it.
//!
//! Unlike GEM, a name does not keep the object alive. The creating handle
//! owns the region and unlinks it on close: handles already opened elsewhere
//! keep their mapping, but the name stops resolving.

use crate::device::{CreateRequest, Device, DeviceResult};
use crate::domain::Domains;
use nix::errno::Errno;
use shared_memory::{Shmem, ShmemConf, ShmemError};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Default namespace for region names
pub const DEFAULT_NAMESPACE: &str = "/gembo";

const PAGE_SHIFT: u32 = 12;

/// Region key sequence, shared by every device in the process
static NEXT_KEY: AtomicU32 = AtomicU32::new(1);

/// Distinct keys one process can hand out
const KEY_SPACE: u32 = 0xffff;

/// OS status behind a shared_memory failure
fn errno_of(e: &ShmemError, fallback: Errno) -> Errno {
    match e {
        ShmemError::MappingIdExists | ShmemError::LinkExists => Errno::EEXIST,
        ShmemError::MapCreateFailed(code)
        | ShmemError::MapOpenFailed(code)
        | ShmemError::UnknownOsError(code) => Errno::from_raw(*code as i32),
        _ => fallback,
    }
}

/// Key for a sequence number. Carries the low pid bits so processes
/// sharing a namespace rarely collide. Never 0.
fn key_for(seq: u32) -> u32 {
    ((std::process::id() & 0xffff) << 16) | (seq % KEY_SPACE + 1)
}

/// Shared memory region wrapper
pub struct SharedMemory {
    inner: Shmem,
    name: String,
    size: usize,
}

// Safety: the mapping is process-wide and Shmem holds no thread-affine state
unsafe impl Send for SharedMemory {}

impl SharedMemory {
    /// Create a new shared memory region
    pub fn create(name: &str, size: usize) -> std::result::Result<Self, Errno> {
        let shmem = ShmemConf::new()
            .size(size)
            .os_id(name)
            .create()
            .map_err(|e| {
                debug!(name, error = %e, "shm create failed");
                errno_of(&e, Errno::ENOMEM)
            })?;

        Ok(Self {
            inner: shmem,
            name: name.to_string(),
            size,
        })
    }

    /// Open an existing shared memory region
    pub fn open(name: &str) -> std::result::Result<Self, Errno> {
        let shmem = ShmemConf::new().os_id(name).open().map_err(|e| {
            debug!(name, error = %e, "shm open failed");
            errno_of(&e, Errno::ENOENT)
        })?;

        let size = shmem.len();

        Ok(Self {
            inner: shmem,
            name: name.to_string(),
            size,
        })
    }

    /// Get the name of the shared memory region
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the size of the shared memory region
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether dropping this region unlinks it
    pub fn is_owner(&self) -> bool {
        self.inner.is_owner()
    }

    /// Get a mutable raw pointer to the shared memory
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_ptr()
    }
}

struct ShmObject {
    region: SharedMemory,
    key: u32,
    read_domains: Domains,
    write_domain: Domains,
}

/// Software GEM device over POSIX shared memory
pub struct ShmDevice {
    namespace: String,
    next_handle: AtomicU32,
    objects: Mutex<HashMap<u32, ShmObject>>,
}

impl Default for ShmDevice {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl ShmDevice {
    /// Create a device whose regions are named `<namespace>_<key>`
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            next_handle: AtomicU32::new(1),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of open handles
    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Domains last declared for a handle
    pub fn domains(&self, handle: u32) -> Option<(Domains, Domains)> {
        self.objects()
            .get(&handle)
            .map(|o| (o.read_domains, o.write_domain))
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<u32, ShmObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn region_name(&self, key: u32) -> String {
        format!("{}_{:08x}", self.namespace, key)
    }

    /// Create a region under the next free key.
    ///
    /// Keys still held by a live region, after the sequence wraps or from a
    /// process with the same low pid bits, are skipped.
    fn create_region(&self, size: usize) -> DeviceResult<(SharedMemory, u32)> {
        for _ in 0..KEY_SPACE {
            let key = key_for(NEXT_KEY.fetch_add(1, Ordering::Relaxed));
            match SharedMemory::create(&self.region_name(key), size) {
                Ok(region) => return Ok((region, key)),
                Err(Errno::EEXIST) => continue,
                Err(errno) => return Err(errno),
            }
        }
        Err(Errno::EEXIST)
    }

    fn insert(&self, region: SharedMemory, key: u32, domains: Domains) -> u32 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.objects().insert(
            handle,
            ShmObject {
                region,
                key,
                read_domains: domains,
                write_domain: Domains::empty(),
            },
        );
        handle
    }
}

impl Device for ShmDevice {
    fn gem_open(&self, name: u32) -> DeviceResult<(u32, u64)> {
        let region = SharedMemory::open(&self.region_name(name))?;
        let size = region.size() as u64;
        Ok((self.insert(region, name, Domains::CPU), size))
    }

    fn gem_create(&self, req: &CreateRequest) -> DeviceResult<u32> {
        let size = usize::try_from(req.size).map_err(|_| Errno::E2BIG)?;
        if size == 0 {
            return Err(Errno::EINVAL);
        }
        if req.alignment != 0 && !req.alignment.is_power_of_two() {
            return Err(Errno::EINVAL);
        }
        let (region, key) = self.create_region(size)?;
        Ok(self.insert(region, key, req.domains))
    }

    fn gem_close(&self, handle: u32) -> DeviceResult<()> {
        let object = self.objects().remove(&handle).ok_or(Errno::EINVAL)?;
        debug!(
            handle,
            region = object.region.name(),
            owner = object.region.is_owner(),
            "released shm object"
        );
        Ok(())
    }

    fn gem_flink(&self, handle: u32) -> DeviceResult<u32> {
        self.objects().get(&handle).map(|o| o.key).ok_or(Errno::ENOENT)
    }

    fn gem_mmap_offset(&self, handle: u32, size: u64) -> DeviceResult<u64> {
        let objects = self.objects();
        let object = objects.get(&handle).ok_or(Errno::ENOENT)?;
        if size > object.region.size() as u64 {
            return Err(Errno::EINVAL);
        }
        Ok(u64::from(handle) << PAGE_SHIFT)
    }

    fn map_region(&self, offset: u64, len: usize) -> DeviceResult<NonNull<u8>> {
        let handle = u32::try_from(offset >> PAGE_SHIFT).map_err(|_| Errno::EINVAL)?;
        let objects = self.objects();
        let object = objects.get(&handle).ok_or(Errno::EINVAL)?;
        if len > object.region.size() {
            return Err(Errno::EINVAL);
        }
        NonNull::new(object.region.as_mut_ptr()).ok_or(Errno::EFAULT)
    }

    unsafe fn unmap_region(&self, _ptr: NonNull<u8>, _len: usize) {
        // The region stays mapped until its handle is closed.
    }

    fn gem_set_domain(&self, handle: u32, read: Domains, write: Domains) -> DeviceResult<()> {
        let mut objects = self.objects();
        let object = objects.get_mut(&handle).ok_or(Errno::ENOENT)?;
        object.read_domains = read;
        object.write_domain = write;
        Ok(())
    }

    fn gem_wait_idle(&self, handle: u32) -> DeviceResult<()> {
        // No GPU behind this device, so every object is idle.
        if self.objects().contains_key(&handle) {
            Ok(())
        } else {
            Err(Errno::ENOENT)
        }
    }
}
