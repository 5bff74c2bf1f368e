use std::time::Instant;

/// Millisecond clock driving the timeout queue.
///
/// The queue and all handles created from it share a single clock, so
/// expirations and `process_timeouts` see a consistent notion of "now".
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Monotonic wall clock, anchored at construction time.
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    pub fn new() -> WallClock {
        WallClock {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        WallClock::new()
    }
}

impl Clock for WallClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
pub struct ManualClock {
    now: std::cell::Cell<u64>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(now_ms: u64) -> ManualClock {
        ManualClock {
            now: std::cell::Cell::new(now_ms),
        }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.set(self.now.get() + delta_ms);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}
