//! Time source used by the burst drain so polling delays can be faked in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time plus the ability to wait.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by `Instant::now` and `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// A clock that only advances when slept on or advanced explicitly.
///
/// `sleep` returns immediately after moving the clock forward, which lets quiet-interval
/// logic run at full speed while still observing the configured durations.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_nanos: AtomicU64,
    slept_nanos: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_nanos: AtomicU64::new(0),
            slept_nanos: AtomicU64::new(0),
        }
    }

    /// Move the clock forward without counting it as a sleep.
    pub fn advance(&self, duration: Duration) {
        self.offset_nanos
            .fetch_add(duration_nanos(duration), Ordering::SeqCst);
    }

    /// Total time spent in `sleep` since creation.
    #[must_use]
    pub fn slept(&self) -> Duration {
        Duration::from_nanos(self.slept_nanos.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        let nanos = duration_nanos(duration);
        self.slept_nanos.fetch_add(nanos, Ordering::SeqCst);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
