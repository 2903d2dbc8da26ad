//! Memory domain and allocation flag definitions

use bitflags::bitflags;

bitflags! {
    /// Memory pools a buffer object's backing store may occupy
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Domains: u32 {
        /// Host memory
        const CPU = 0x1;
        /// Host memory reachable by the GPU through the GART
        const GTT = 0x2;
        /// Device-local memory
        const VRAM = 0x4;
    }
}

bitflags! {
    /// Allocation hints passed to the kernel on creation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CreateFlags: u32 {
        const NO_BACKING_STORE = 1 << 0;
        const GTT_UC = 1 << 1;
        const GTT_WC = 1 << 2;
        /// Object is always CPU accessible
        const CPU_ACCESS = 1 << 3;
        /// Object is never CPU accessible
        const NO_CPU_ACCESS = 1 << 4;
    }
}

/// Access mode for a scoped mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    /// Whether the mapping was requested for writing
    pub fn is_write(self) -> bool {
        self == AccessMode::ReadWrite
    }
}
