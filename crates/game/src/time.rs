use std::cell::Cell;
use std::time::{Duration, Instant};

/// Monotonic time source. Samples are measured from the clock's own epoch.
pub trait Clock {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Clock that only moves when told to. Used by tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta);
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timer {
    duration: Duration,
    started_at: Duration,
}

impl Timer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started_at: Duration::ZERO,
        }
    }

    pub fn start(duration: Duration, now: Duration) -> Self {
        Self {
            duration,
            started_at: now,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn restart(&mut self, now: Duration) {
        self.started_at = now;
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.started_at)
    }

    pub fn is_elapsed(&self, now: Duration) -> bool {
        self.elapsed(now) >= self.duration
    }

    pub fn remaining(&self, now: Duration) -> Duration {
        self.duration.saturating_sub(self.elapsed(now))
    }

    /// Returns true once per elapsed period and re-arms the timer.
    pub fn consume(&mut self, now: Duration) -> bool {
        if self.is_elapsed(now) {
            self.started_at = now;
            true
        } else {
            false
        }
    }
}

pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    const MAX_FRAME_DELTA: f32 = 0.25;

    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.min(Self::MAX_FRAME_DELTA);
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.dt
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }

    /// Time left until the next tick is due.
    pub fn until_next_tick(&self) -> Duration {
        Duration::from_secs_f32((self.dt - self.accumulator).max(0.0))
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

pub fn millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

pub fn ticks_to_duration(ticks: u32, tick_rate: u32) -> Duration {
    Duration::from_secs_f64(ticks as f64 / tick_rate.max(1) as f64)
}

/// Fractional ticks covered by `duration`. The rate is a float because
/// clients take it from the server's announced sample rate.
pub fn duration_to_ticks(duration: Duration, ticks_per_second: f64) -> f64 {
    duration.as_secs_f64() * ticks_per_second
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_timestep_accumulation() {
        let mut ts = FixedTimestep::new(60);

        ts.accumulate(1.0 / 30.0);
        assert!(ts.should_tick());
        assert!(ts.consume_tick());
        assert!(ts.consume_tick());
        assert!(!ts.consume_tick());
    }

    #[test]
    fn fixed_timestep_clamps_long_frames() {
        let mut ts = FixedTimestep::new(10);
        ts.accumulate(5.0);

        let mut ticks = 0;
        while ts.consume_tick() {
            ticks += 1;
        }
        assert_eq!(ticks, 2);
    }

    #[test]
    fn timer_consume_rearms() {
        let clock = ManualClock::new();
        let mut timer = Timer::start(Duration::from_millis(100), clock.now());

        clock.advance(Duration::from_millis(60));
        assert!(!timer.consume(clock.now()));
        assert_eq!(timer.remaining(clock.now()), Duration::from_millis(40));

        clock.advance(Duration::from_millis(40));
        assert!(timer.consume(clock.now()));
        assert!(!timer.consume(clock.now()));
    }

    #[test]
    fn tick_duration_conversions() {
        assert_eq!(ticks_to_duration(30, 60), Duration::from_millis(500));
        assert!((duration_to_ticks(Duration::from_millis(250), 60.0) - 15.0).abs() < 1e-9);
        assert!((millis_f64(Duration::from_micros(1500)) - 1.5).abs() < 1e-9);
    }
}
