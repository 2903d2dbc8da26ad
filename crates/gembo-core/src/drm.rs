//! Radeon DRM/GEM device backend

use crate::device::{CreateRequest, Device, DeviceResult};
use crate::domain::Domains;
use crate::{Error, Result};
use nix::errno::Errno;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;
use tracing::debug;

/// Default DRM device node
pub const DEFAULT_DRM_DEVICE: &str = "/dev/dri/card0";

/// Kernel ABI structures and ioctl wrappers
mod abi {
    pub const DRM_IOCTL_BASE: u8 = b'd';
    pub const DRM_COMMAND_BASE: u8 = 0x40;

    pub const DRM_GEM_CLOSE: u8 = 0x09;
    pub const DRM_GEM_FLINK: u8 = 0x0a;
    pub const DRM_GEM_OPEN: u8 = 0x0b;

    pub const DRM_RADEON_GEM_CREATE: u8 = 0x1d;
    pub const DRM_RADEON_GEM_MMAP: u8 = 0x1e;
    pub const DRM_RADEON_GEM_SET_DOMAIN: u8 = 0x23;
    pub const DRM_RADEON_GEM_WAIT_IDLE: u8 = 0x24;

    #[repr(C)]
    #[derive(Default)]
    pub struct DrmGemClose {
        pub handle: u32,
        pub pad: u32,
    }

    #[repr(C)]
    #[derive(Default)]
    pub struct DrmGemFlink {
        pub handle: u32,
        pub name: u32,
    }

    #[repr(C)]
    #[derive(Default)]
    pub struct DrmGemOpen {
        pub name: u32,
        pub handle: u32,
        pub size: u64,
    }

    #[repr(C)]
    #[derive(Default)]
    pub struct RadeonGemCreate {
        pub size: u64,
        pub alignment: u64,
        pub handle: u32,
        pub initial_domain: u32,
        pub flags: u32,
    }

    #[repr(C)]
    #[derive(Default)]
    pub struct RadeonGemMmap {
        pub handle: u32,
        pub pad: u32,
        pub offset: u64,
        pub size: u64,
        pub addr_ptr: u64,
    }

    #[repr(C)]
    #[derive(Default)]
    pub struct RadeonGemSetDomain {
        pub handle: u32,
        pub read_domains: u32,
        pub write_domain: u32,
    }

    #[repr(C)]
    #[derive(Default)]
    pub struct RadeonGemWaitIdle {
        pub handle: u32,
        pub pad: u32,
    }

    nix::ioctl_write_ptr!(gem_close, DRM_IOCTL_BASE, DRM_GEM_CLOSE, DrmGemClose);
    nix::ioctl_readwrite!(gem_flink, DRM_IOCTL_BASE, DRM_GEM_FLINK, DrmGemFlink);
    nix::ioctl_readwrite!(gem_open, DRM_IOCTL_BASE, DRM_GEM_OPEN, DrmGemOpen);

    // Driver commands are issued read/write, as libdrm's command helpers do.
    nix::ioctl_readwrite!(
        radeon_gem_create,
        DRM_IOCTL_BASE,
        DRM_COMMAND_BASE + DRM_RADEON_GEM_CREATE,
        RadeonGemCreate
    );
    nix::ioctl_readwrite!(
        radeon_gem_mmap,
        DRM_IOCTL_BASE,
        DRM_COMMAND_BASE + DRM_RADEON_GEM_MMAP,
        RadeonGemMmap
    );
    nix::ioctl_readwrite!(
        radeon_gem_set_domain,
        DRM_IOCTL_BASE,
        DRM_COMMAND_BASE + DRM_RADEON_GEM_SET_DOMAIN,
        RadeonGemSetDomain
    );
    nix::ioctl_readwrite!(
        radeon_gem_wait_idle,
        DRM_IOCTL_BASE,
        DRM_COMMAND_BASE + DRM_RADEON_GEM_WAIT_IDLE,
        RadeonGemWaitIdle
    );
}

/// Restart an ioctl interrupted by a signal
fn restart<F>(mut f: F) -> DeviceResult<()>
where
    F: FnMut() -> nix::Result<nix::libc::c_int>,
{
    loop {
        match f() {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            Err(errno) => return Err(errno),
        }
    }
}

/// Connection to a radeon DRM device node
pub struct DrmDevice {
    file: File,
}

impl DrmDevice {
    /// Open a DRM device node
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::DeviceOpen {
                path: path.display().to_string(),
                source,
            })?;
        debug!(path = %path.display(), "opened DRM device");
        Ok(Self { file })
    }

    /// Wrap an already opened device file
    pub fn from_file(file: File) -> Self {
        Self { file }
    }

    fn fd(&self) -> nix::libc::c_int {
        self.file.as_raw_fd()
    }
}

impl Device for DrmDevice {
    fn gem_open(&self, name: u32) -> DeviceResult<(u32, u64)> {
        let mut args = abi::DrmGemOpen {
            name,
            ..Default::default()
        };
        // SAFETY: `args` is a live, correctly laid out ioctl argument.
        restart(|| unsafe { abi::gem_open(self.fd(), &mut args) })?;
        Ok((args.handle, args.size))
    }

    fn gem_create(&self, req: &CreateRequest) -> DeviceResult<u32> {
        let mut args = abi::RadeonGemCreate {
            size: req.size,
            alignment: req.alignment,
            handle: 0,
            initial_domain: req.domains.bits(),
            flags: req.flags.bits(),
        };
        // SAFETY: as above.
        restart(|| unsafe { abi::radeon_gem_create(self.fd(), &mut args) })?;
        Ok(args.handle)
    }

    fn gem_close(&self, handle: u32) -> DeviceResult<()> {
        let args = abi::DrmGemClose { handle, pad: 0 };
        // SAFETY: as above.
        restart(|| unsafe { abi::gem_close(self.fd(), &args) })
    }

    fn gem_flink(&self, handle: u32) -> DeviceResult<u32> {
        let mut args = abi::DrmGemFlink { handle, name: 0 };
        // SAFETY: as above.
        restart(|| unsafe { abi::gem_flink(self.fd(), &mut args) })?;
        Ok(args.name)
    }

    fn gem_mmap_offset(&self, handle: u32, size: u64) -> DeviceResult<u64> {
        let mut args = abi::RadeonGemMmap {
            handle,
            size,
            ..Default::default()
        };
        // SAFETY: as above.
        restart(|| unsafe { abi::radeon_gem_mmap(self.fd(), &mut args) })?;
        Ok(args.addr_ptr)
    }

    fn map_region(&self, offset: u64, len: usize) -> DeviceResult<NonNull<u8>> {
        let len = NonZeroUsize::new(len).ok_or(Errno::EINVAL)?;
        let offset = nix::libc::off_t::try_from(offset).map_err(|_| Errno::EOVERFLOW)?;
        // SAFETY: a fresh shared mapping of the device file at a kernel
        // provided offset; it does not alias any Rust-owned memory.
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &self.file,
                offset,
            )?
        };
        Ok(ptr.cast())
    }

    unsafe fn unmap_region(&self, ptr: NonNull<u8>, len: usize) {
        if let Err(errno) = munmap(ptr.cast(), len) {
            debug!(%errno, "munmap failed");
        }
    }

    fn gem_set_domain(&self, handle: u32, read: Domains, write: Domains) -> DeviceResult<()> {
        let mut args = abi::RadeonGemSetDomain {
            handle,
            read_domains: read.bits(),
            write_domain: write.bits(),
        };
        // SAFETY: as above.
        restart(|| unsafe { abi::radeon_gem_set_domain(self.fd(), &mut args) })
    }

    fn gem_wait_idle(&self, handle: u32) -> DeviceResult<()> {
        let mut args = abi::RadeonGemWaitIdle { handle, pad: 0 };
        // SAFETY: as above.
        restart(|| unsafe { abi::radeon_gem_wait_idle(self.fd(), &mut args) })
    }
}
