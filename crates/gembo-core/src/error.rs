//! Error types for gembo

use crate::domain::Domains;
use nix::errno::Errno;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to open device {path}: {source}")]
    DeviceOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "allocation failed: size {size} bytes, alignment {alignment} bytes, domains {domains:?}: {errno}"
    )]
    AllocationFailed {
        size: u64,
        alignment: u64,
        domains: Domains,
        errno: Errno,
    },

    #[error("no buffer object with global name {name}: {errno}")]
    NotFound { name: u32, errno: Errno },

    #[error("access to global name {name} denied: {errno}")]
    PermissionDenied { name: u32, errno: Errno },

    #[error("device {op} failed on handle {handle}: {errno}")]
    Device {
        op: &'static str,
        handle: u32,
        errno: Errno,
    },

    #[error("mapping handle {handle} failed: {errno}")]
    MapFailed { handle: u32, errno: Errno },

    #[error("buffer object has no kernel handle")]
    InvalidHandle,

    #[error("access denied: mapping is read-only")]
    ReadOnly,
}

impl Error {
    /// Classify a failed open-by-name.
    pub(crate) fn open_failed(name: u32, errno: Errno) -> Self {
        match errno {
            Errno::EACCES | Errno::EPERM => Error::PermissionDenied { name, errno },
            _ => Error::NotFound { name, errno },
        }
    }

    /// Raw device status code, if the error came from the device.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::AllocationFailed { errno, .. }
            | Error::NotFound { errno, .. }
            | Error::PermissionDenied { errno, .. }
            | Error::Device { errno, .. }
            | Error::MapFailed { errno, .. } => Some(*errno),
            Error::DeviceOpen { source, .. } => source.raw_os_error().map(Errno::from_raw),
            Error::InvalidHandle | Error::ReadOnly => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
