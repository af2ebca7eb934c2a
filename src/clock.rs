//! Injectable time source
//!
//! The circuit breaker measures elapsed open intervals through this trait
//! instead of reading the wall clock directly, so tests can simulate time
//! deterministically. Monotonic `Instant` is used rather than `SystemTime`
//! to stay immune to NTP clock adjustments.

use std::time::Instant;

/// A source of monotonic time
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Production clock backed by `Instant::now`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
