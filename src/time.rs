use std::time::{Duration, Instant};

/// Frame timestamps handed to the synchronizer and camera animations.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    last: Instant,
    delta: Duration,
    frames: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self { start, last: start, delta: Duration::ZERO, frames: 0 }
    }

    /// Advances to the current instant and returns it.
    pub fn tick(&mut self) -> Instant {
        self.advance_to(Instant::now())
    }

    /// Advances to `now`. Earlier instants are treated as no elapsed time.
    pub fn advance_to(&mut self, now: Instant) -> Instant {
        let now = now.max(self.last);
        self.delta = now - self.last;
        self.last = now;
        self.frames += 1;
        now
    }

    pub fn now(&self) -> Instant {
        self.last
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn elapsed(&self) -> Duration {
        self.last - self.start
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
