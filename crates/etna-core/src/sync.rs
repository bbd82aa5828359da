//! # Synchronization Primitives
//!
//! Per-core fence values handed out by the kernel on submission.

use core::cmp::Ordering;
use core::fmt;

// =============================================================================
// FENCE
// =============================================================================

/// Completion fence of one submission
///
/// Fences are a monotonically increasing 32-bit counter per GPU core.
/// Reaching value N means every submission with fence ≤ N has executed.
/// Comparison is done on the wrapping distance so ordering survives the
/// counter rolling over.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Fence(u32);

impl Fence {
    /// No submission has completed yet
    pub const NONE: Self = Self(0);

    /// Wrap a raw fence value
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Next value in the sequence
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Whether `self` was signalled after `other`
    #[inline]
    pub const fn is_after(self, other: Fence) -> bool {
        (self.0.wrapping_sub(other.0) as i32) > 0
    }

    /// Whether a core that completed `completed` has also completed `self`
    #[inline]
    pub const fn is_signaled_by(self, completed: Fence) -> bool {
        !self.is_after(completed)
    }
}

impl PartialOrd for Fence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fence {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0 == other.0 {
            Ordering::Equal
        } else if self.is_after(*other) {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fence({})", self.0)
    }
}

impl fmt::Display for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Fence::new(2) > Fence::new(1));
        assert!(Fence::new(1).is_signaled_by(Fence::new(1)));
        assert!(!Fence::new(3).is_signaled_by(Fence::new(2)));
    }

    #[test]
    fn test_ordering_across_wrap() {
        let before = Fence::new(u32::MAX);
        let after = before.next();
        assert_eq!(after.raw(), 0);
        assert!(after.is_after(before));
        assert!(before.is_signaled_by(after));
    }
}
