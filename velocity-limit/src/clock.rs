use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use quanta::Clock;
use quanta::Instant;

/// Seconds since the Unix epoch, read from a monotonic source.
///
/// The wall clock is sampled once when the clock is built; afterwards time
/// advances with `quanta`, so it never steps backwards within a process.
/// Different processes may disagree slightly, which the bucket transition
/// tolerates.
#[derive(Debug, Clone)]
pub struct WallClock {
    clock: Clock,
    /// A fixed point in time to calculate deltas from.
    anchor: Instant,
    epoch: f64,
}

impl WallClock {
    pub fn new() -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_secs_f64())
            .unwrap_or_default();
        Self::with_clock(Clock::new(), epoch)
    }

    /// Build on an explicit `quanta` clock (e.g. `Clock::mock()`), reporting
    /// `epoch` seconds at the moment of construction.
    pub fn with_clock(clock: Clock, epoch: f64) -> Self {
        let anchor = clock.now();
        Self {
            clock,
            anchor,
            epoch,
        }
    }

    /// The current time in seconds, with sub-second precision.
    #[inline]
    pub fn now(&self) -> f64 {
        self.epoch + self.clock.now().duration_since(self.anchor).as_secs_f64()
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}
