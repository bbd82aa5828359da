//! # ETNA Error Handling
//!
//! Error types for the submission stack.
//!
//! Kernel round trips fail with a raw [`Errno`]. The layer that issued the
//! request wraps it in the [`Error`] variant naming the operation, so callers
//! can tell an allocation failure from a rejected submission without
//! decoding errno values themselves.

use core::fmt;

// =============================================================================
// RESULT TYPES
// =============================================================================

/// ETNA Result type alias
pub type Result<T> = core::result::Result<T, Error>;

/// Result of a single kernel round trip
pub type KernelResult<T> = core::result::Result<T, Errno>;

// =============================================================================
// ERRNO
// =============================================================================

/// Raw error code returned by the kernel driver
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Errno(pub i32);

impl Errno {
    /// Operation not permitted
    pub const EPERM: Self = Self(libc::EPERM);
    /// No such entry (unknown handle or name)
    pub const ENOENT: Self = Self(libc::ENOENT);
    /// Interrupted system call
    pub const EINTR: Self = Self(libc::EINTR);
    /// Bad file descriptor
    pub const EBADF: Self = Self(libc::EBADF);
    /// Try again
    pub const EAGAIN: Self = Self(libc::EAGAIN);
    /// Out of memory
    pub const ENOMEM: Self = Self(libc::ENOMEM);
    /// Resource busy
    pub const EBUSY: Self = Self(libc::EBUSY);
    /// No such device
    pub const ENODEV: Self = Self(libc::ENODEV);
    /// Invalid argument
    pub const EINVAL: Self = Self(libc::EINVAL);
    /// Timer expired
    pub const ETIMEDOUT: Self = Self(libc::ETIMEDOUT);

    /// Read the calling thread's `errno`
    pub fn last() -> Self {
        Self(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
    }

    /// Raw value
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Whether the kernel gave up waiting
    #[inline]
    pub const fn is_timeout(self) -> bool {
        self.0 == libc::ETIMEDOUT
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Errno({})", self.0)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0))
    }
}

impl From<std::io::Error> for Errno {
    fn from(e: std::io::Error) -> Self {
        Self(e.raw_os_error().unwrap_or(libc::EIO))
    }
}

// =============================================================================
// ERROR ENUM
// =============================================================================

/// ETNA unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Buffer Object Errors
    // =========================================================================
    /// Kernel rejected a buffer allocation
    AllocationFailed(Errno),
    /// Kernel rejected a name or descriptor import
    ImportFailed(Errno),
    /// Mapping offset query or mmap failed
    MapFailed(Errno),
    /// Flink or PRIME export failed
    ExportFailed(Errno),
    /// CPU prepare/finish request failed
    CpuAccessFailed(Errno),
    /// Access outside the bounds of a buffer
    OutOfBounds,

    // =========================================================================
    // Command Submission Errors
    // =========================================================================
    /// Kernel rejected a submission
    SubmitFailed(Errno),
    /// Fence or CPU wait hit its deadline
    WaitTimeout,
    /// Fence wait failed for a reason other than timeout
    WaitFailed(Errno),
    /// A reservation can never fit in one command buffer
    CapacityExceeded {
        /// Words requested
        requested: u32,
        /// Words usable in an empty buffer
        available: u32,
    },

    // =========================================================================
    // Pipe Errors
    // =========================================================================
    /// Unknown parameter id
    InvalidParameter,
    /// Parameter query round trip failed
    QueryFailed(Errno),
    /// The kernel reports no GPU behind the requested core
    GpuNotFound,
}

impl Error {
    /// Kernel error code carried by this error, if any
    pub fn errno(&self) -> Option<Errno> {
        match *self {
            Self::AllocationFailed(e)
            | Self::ImportFailed(e)
            | Self::MapFailed(e)
            | Self::ExportFailed(e)
            | Self::CpuAccessFailed(e)
            | Self::SubmitFailed(e)
            | Self::WaitFailed(e)
            | Self::QueryFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Buffer objects
            Self::AllocationFailed(e) => write!(f, "buffer allocation failed: {}", e),
            Self::ImportFailed(e) => write!(f, "buffer import failed: {}", e),
            Self::MapFailed(e) => write!(f, "buffer mapping failed: {}", e),
            Self::ExportFailed(e) => write!(f, "buffer export failed: {}", e),
            Self::CpuAccessFailed(e) => write!(f, "CPU access request failed: {}", e),
            Self::OutOfBounds => write!(f, "access out of buffer bounds"),

            // Command
            Self::SubmitFailed(e) => write!(f, "submission failed: {}", e),
            Self::WaitTimeout => write!(f, "wait timed out"),
            Self::WaitFailed(e) => write!(f, "wait failed: {}", e),
            Self::CapacityExceeded {
                requested,
                available,
            } => write!(
                f,
                "reservation of {} words exceeds stream capacity of {} words",
                requested, available
            ),

            // Pipe
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::QueryFailed(e) => write!(f, "parameter query failed: {}", e),
            Self::GpuNotFound => write!(f, "GPU core not found"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_carried() {
        let err = Error::SubmitFailed(Errno::EINVAL);
        assert_eq!(err.errno(), Some(Errno::EINVAL));
        assert_eq!(Error::WaitTimeout.errno(), None);
    }

    #[test]
    fn test_timeout_errno() {
        assert!(Errno::ETIMEDOUT.is_timeout());
        assert!(!Errno::EBUSY.is_timeout());
    }

    #[test]
    fn test_display_capacity() {
        let err = Error::CapacityExceeded {
            requested: 9000,
            available: 8186,
        };
        let text = err.to_string();
        assert!(text.contains("9000"));
        assert!(text.contains("8186"));
    }
}
