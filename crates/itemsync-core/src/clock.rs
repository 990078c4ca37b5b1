//! Store clocks.
//!
//! The store stamps every mutation with a [`Timestamp`] taken from a
//! [`Clock`]. Catch-up queries compare stamps with a strict `>`, so two
//! mutations sharing a stamp could hide one another from a client whose
//! last sync time equals that stamp. Both clocks here rule that out by
//! issuing strictly increasing stamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::Timestamp;

/// Source of mutation stamps.
pub trait Clock: Send + Sync {
    /// Issue a stamp for a mutation.
    ///
    /// The result is strictly greater than every stamp previously returned
    /// by `tick` and every reading previously returned by `now`.
    fn tick(&self) -> Timestamp;

    /// Read the clock without issuing a stamp.
    ///
    /// The result is greater than or equal to every stamp issued so far, and
    /// any later `tick` is strictly greater than it.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time in nanoseconds, forced strictly increasing.
///
/// If the system clock stalls or steps backwards the clock keeps counting
/// from its high-water mark one nanosecond at a time.
#[derive(Debug, Default)]
pub struct SystemClock {
    high_water: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn wall_nanos() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

impl Clock for SystemClock {
    fn tick(&self) -> Timestamp {
        let wall = Self::wall_nanos();
        let mut current = self.high_water.load(Ordering::SeqCst);
        loop {
            let next = wall.max(current + 1);
            match self.high_water.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Timestamp(next),
                Err(actual) => current = actual,
            }
        }
    }

    fn now(&self) -> Timestamp {
        let wall = Self::wall_nanos();
        let previous = self.high_water.fetch_max(wall, Ordering::SeqCst);
        Timestamp(previous.max(wall))
    }
}

/// A mutation counter.
///
/// Stamps are `1, 2, 3, ...` in mutation order. Useful wherever wall time
/// adds nothing, and in tests where exact stamps are asserted.
#[derive(Debug, Default)]
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward without stamping anything.
    pub fn advance(&self, ticks: u64) -> Timestamp {
        Timestamp(self.counter.fetch_add(ticks, Ordering::SeqCst) + ticks)
    }
}

impl Clock for LogicalClock {
    fn tick(&self) -> Timestamp {
        Timestamp(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn now(&self) -> Timestamp {
        Timestamp(self.counter.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_logical_clock_sequence() {
        let clock = LogicalClock::new();
        assert_eq!(clock.now(), Timestamp(0));
        assert_eq!(clock.tick(), Timestamp(1));
        assert_eq!(clock.tick(), Timestamp(2));
        assert_eq!(clock.now(), Timestamp(2));
        assert_eq!(clock.advance(10), Timestamp(12));
        assert_eq!(clock.tick(), Timestamp(13));
    }

    #[test]
    fn test_system_clock_strictly_increasing() {
        let clock = SystemClock::new();
        let mut last = clock.tick();
        for _ in 0..10_000 {
            let next = clock.tick();
            assert!(next > last, "{next:?} should follow {last:?}");
            last = next;
        }
    }

    #[test]
    fn test_system_clock_tick_after_now() {
        let clock = SystemClock::new();
        for _ in 0..1_000 {
            let reading = clock.now();
            assert!(clock.tick() > reading);
        }
    }

    #[test]
    fn test_system_clock_unique_across_threads() {
        let clock = Arc::new(SystemClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                thread::spawn(move || (0..2_000).map(|_| clock.tick()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<Timestamp> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
