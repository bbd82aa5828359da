//! # ETNA Core Types
//!
//! Strongly typed identifiers handed between userspace and the kernel.
//!
//! These are plain integers on the wire. Wrapping them keeps a GEM handle
//! from being passed where a flink name is expected, which the ABI would
//! otherwise accept silently.

use core::fmt;

// =============================================================================
// GEM HANDLE
// =============================================================================

/// Kernel handle of a buffer object, unique per open connection
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct GemHandle(u32);

impl GemHandle {
    /// Wrap a raw handle
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw u32 value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Handle 0 is never handed out by the kernel
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for GemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GemHandle({})", self.0)
    }
}

// =============================================================================
// FLINK NAME
// =============================================================================

/// Global (cross-process) buffer name, as produced by flink
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FlinkName(u32);

impl FlinkName {
    /// Wrap a raw name
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw u32 value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for FlinkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlinkName({})", self.0)
    }
}

// =============================================================================
// CONNECTION ID
// =============================================================================

/// Identifier of one open connection to the kernel driver
///
/// For the DRM backend this is the file descriptor number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ConnectionId(pub u64);

// =============================================================================
// PIPE ID
// =============================================================================

/// Number of execution states a core can expose
pub const MAX_PIPES: usize = 3;

/// Execution state (front end) a command stream is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PipeId {
    /// 3D pipe
    ThreeD = 0,
    /// 2D pipe
    TwoD = 1,
    /// Vector graphics pipe
    Vg = 2,
}

impl PipeId {
    /// Value of the `exec_state` field in a submission
    #[inline]
    pub const fn exec_state(self) -> u32 {
        self as u32
    }

    /// Parse from the raw `exec_state` value
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::ThreeD),
            1 => Some(Self::TwoD),
            2 => Some(Self::Vg),
            _ => None,
        }
    }

    /// Slot index for per-pipe tables
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

// =============================================================================
// RELOCATION TRANSFORM
// =============================================================================

/// Shift/OR transform applied to a relocated address
///
/// A negative shift shifts right. The kernel applies the same transform to
/// the real address when it patches the placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrTransform {
    /// Bit shift (negative shifts right)
    pub shift: i32,
    /// Bits OR'ed into the shifted address
    pub or: u32,
}

impl AddrTransform {
    /// Identity transform
    pub const NONE: Self = Self { shift: 0, or: 0 };

    /// Apply the transform to a 32-bit address
    ///
    /// Shifting by 32 bits or more in either direction clears the address.
    pub const fn apply(self, addr: u32) -> u32 {
        let amount = self.shift.unsigned_abs();
        let shifted = if amount >= u32::BITS {
            0
        } else if self.shift < 0 {
            addr >> amount
        } else {
            addr << amount
        };
        shifted | self.or
    }

    /// Whether this is the identity transform
    pub const fn is_identity(self) -> bool {
        self.shift == 0 && self.or == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_roundtrip_raw() {
        for pipe in [PipeId::ThreeD, PipeId::TwoD, PipeId::Vg] {
            assert_eq!(PipeId::from_raw(pipe.exec_state()), Some(pipe));
        }
        assert_eq!(PipeId::from_raw(7), None);
    }

    #[test]
    fn test_transform_apply() {
        let t = AddrTransform { shift: -4, or: 0x1 };
        assert_eq!(t.apply(0x1000), 0x101);
        let t = AddrTransform { shift: 2, or: 0 };
        assert_eq!(t.apply(0x10), 0x40);
        assert_eq!(AddrTransform::NONE.apply(0), 0);
    }

    #[test]
    fn test_transform_wide_shift_clears() {
        for shift in [32, -32, 40, i32::MIN, i32::MAX] {
            let t = AddrTransform { shift, or: 0x3 };
            assert_eq!(t.apply(0xffff_ffff), 0x3);
        }
        let t = AddrTransform { shift: -31, or: 0 };
        assert_eq!(t.apply(0x8000_0000), 1);
    }
}
