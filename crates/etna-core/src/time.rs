//! # Deadlines
//!
//! Absolute `CLOCK_MONOTONIC` deadlines, the form the kernel expects for
//! every bounded wait.

use core::time::Duration;

/// Default bound for fence waits and CPU prepare, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u32 = 5000;

const NSEC_PER_SEC: i64 = 1_000_000_000;

// =============================================================================
// DEADLINE
// =============================================================================

/// Absolute point on the monotonic clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    /// Seconds
    pub sec: i64,
    /// Nanoseconds, always below one second
    pub nsec: i64,
}

impl Deadline {
    /// Build from raw fields, carrying excess nanoseconds into seconds
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self {
            sec: sec + nsec / NSEC_PER_SEC,
            nsec: nsec % NSEC_PER_SEC,
        }
    }

    /// Current monotonic time
    pub fn now() -> Self {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid out-pointer and CLOCK_MONOTONIC is always
        // available on Linux.
        unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        Self::new(ts.tv_sec as i64, ts.tv_nsec as i64)
    }

    /// `ms` milliseconds from now
    pub fn after_ms(ms: u32) -> Self {
        Self::now().plus(Duration::from_millis(ms as u64))
    }

    /// Offset by a duration
    pub fn plus(self, d: Duration) -> Self {
        Self::new(
            self.sec + d.as_secs() as i64,
            self.nsec + d.subsec_nanos() as i64,
        )
    }

    /// Whether the deadline is in the past
    pub fn has_passed(&self) -> bool {
        Self::now() >= *self
    }

    /// Time left until the deadline, zero once passed
    pub fn remaining(&self) -> Duration {
        let now = Self::now();
        if now >= *self {
            return Duration::ZERO;
        }
        let mut sec = self.sec - now.sec;
        let mut nsec = self.nsec - now.nsec;
        if nsec < 0 {
            sec -= 1;
            nsec += NSEC_PER_SEC;
        }
        Duration::new(sec as u64, nsec as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_nsec() {
        let d = Deadline::new(1, 2_500_000_000);
        assert_eq!(d, Deadline { sec: 3, nsec: 500_000_000 });
    }

    #[test]
    fn test_after_ms_in_future() {
        let d = Deadline::after_ms(1500);
        assert!(!d.has_passed());
        assert!(d.remaining() > Duration::from_millis(1000));
        assert!(d.nsec < NSEC_PER_SEC);
    }

    #[test]
    fn test_zero_timeout_passes() {
        let d = Deadline::after_ms(0);
        std::thread::sleep(Duration::from_millis(1));
        assert!(d.has_passed());
        assert_eq!(d.remaining(), Duration::ZERO);
    }
}
