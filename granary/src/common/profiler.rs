//! Wall-clock timing of the resize and spill phases.
//!
//! [`timed`] feeds `ResizeMetrics::resize_time` for proposing and committing a resize
//! transaction, and `SpillMetrics::spill_time` / `SpillMetrics::restore_time` for moving a
//! partition to and from the object store. The time is recorded even when the phase fails.

use std::time::Duration;

#[cfg(miri)]
pub use std::time::Instant;

#[cfg(not(miri))]
pub use quanta::Instant;

use crate::metric::Time;

/// Adds the time between its creation and its drop to `elapsed`
#[derive(Debug)]
pub struct ScopedTimerGuard<'a> {
    start: Instant,
    elapsed: &'a mut Duration,
}

impl<'a> ScopedTimerGuard<'a> {
    /// Start timing into `elapsed`
    #[inline]
    pub fn new(elapsed: &'a mut Duration) -> Self {
        Self {
            start: Instant::now(),
            elapsed,
        }
    }
}

impl Drop for ScopedTimerGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        *self.elapsed += self.start.elapsed();
    }
}

/// Run `phase` and add its duration to `time`. The result of `phase` is returned untouched,
/// so callers apply `?` after the time is recorded
pub fn timed<T>(time: &Time, phase: impl FnOnce() -> T) -> T {
    let mut elapsed = Duration::default();
    let output = {
        let _guard = ScopedTimerGuard::new(&mut elapsed);
        phase()
    };
    time.add_duration(elapsed);
    output
}
