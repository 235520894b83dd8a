//! Logical time and real-time pacing
//!
//! Logical time advances only when the scheduler moves to the next event.
//! With a non-zero realtime factor the clock also sleeps so that logical time
//! tracks wall time, and reports when it falls behind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lag beyond which the clock warns that it cannot keep up
pub const OVERSHOOT_WARNING: Duration = Duration::from_secs(1);

/// Resolution of logical time; no wait is shorter than this
pub const TICK: Duration = Duration::from_millis(1);

fn round_to_millis(duration: Duration) -> u64 {
    ((duration.as_nanos() + 500_000) / 1_000_000) as u64
}

/// Logical time in milliseconds since the start of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Start of every run
    pub const ZERO: SimTime = SimTime(0);

    /// From whole milliseconds
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// From fractional seconds, rounded to the nearest millisecond
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs.max(0.0) * 1000.0).round() as u64)
    }

    /// Milliseconds since the start
    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Seconds since the start
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Offset from the start
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.0)
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later
    pub fn saturating_since(self, earlier: SimTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

/// Rounded to the nearest millisecond, like [`SimTime::from_secs_f64`]
impl From<Duration> for SimTime {
    fn from(duration: Duration) -> Self {
        Self(round_to_millis(duration))
    }
}

/// The offset is rounded to the nearest millisecond
impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0.saturating_add(round_to_millis(rhs)))
    }
}

impl Sub for SimTime {
    type Output = Duration;

    fn sub(self, rhs: SimTime) -> Duration {
        self.saturating_since(rhs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.0 / 1000, self.0 % 1000)
    }
}

/// Scheduler clock
#[derive(Debug, Clone)]
pub struct Clock {
    now: SimTime,
    realtime_factor: f64,
    wall_start: Option<Instant>,
    max_overshoot: Duration,
    overshoot_warnings: u64,
}

impl Clock {
    /// Clock where one logical second takes `realtime_factor` wall seconds
    ///
    /// A factor of 0 (or anything not finite and positive) runs as fast as
    /// possible.
    pub fn new(realtime_factor: f64) -> Self {
        let realtime_factor = if realtime_factor.is_finite() && realtime_factor > 0.0 { realtime_factor } else { 0.0 };
        Self {
            now: SimTime::ZERO,
            realtime_factor,
            wall_start: None,
            max_overshoot: Duration::ZERO,
            overshoot_warnings: 0,
        }
    }

    /// Clock that never sleeps
    pub fn as_fast_as_possible() -> Self {
        Self::new(0.0)
    }

    /// Current logical time
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Wall seconds per logical second, 0 when unpaced
    pub fn realtime_factor(&self) -> f64 {
        self.realtime_factor
    }

    /// Whether the clock sleeps to track wall time
    pub fn is_paced(&self) -> bool {
        self.realtime_factor > 0.0
    }

    /// Largest observed lag of logical time behind wall time
    pub fn max_overshoot(&self) -> Duration {
        self.max_overshoot
    }

    /// Number of times the lag reached [`OVERSHOOT_WARNING`]
    pub fn overshoot_warnings(&self) -> u64 {
        self.overshoot_warnings
    }

    /// Move to `at`, sleeping first when paced; never moves backwards
    pub fn advance_to(&mut self, at: SimTime) {
        if at <= self.now {
            return;
        }
        if self.is_paced() {
            self.pace(at);
        }
        self.now = at;
    }

    fn pace(&mut self, at: SimTime) {
        let start = *self.wall_start.get_or_insert_with(Instant::now);
        let target = at.as_duration().mul_f64(self.realtime_factor);
        let elapsed = start.elapsed();

        if let Some(ahead) = target.checked_sub(elapsed) {
            std::thread::sleep(ahead);
            return;
        }

        let behind = elapsed - target;
        if behind > self.max_overshoot {
            self.max_overshoot = behind;
        }
        if behind >= OVERSHOOT_WARNING {
            self.overshoot_warnings += 1;
            warn!(logical = %at, behind_ms = behind.as_millis() as u64, "Wall clock overshoots logical time");
        } else {
            debug!(logical = %at, behind_ms = behind.as_millis() as u64, "Running behind wall clock");
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_time_conversions() {
        assert_eq!(SimTime::from_secs_f64(2.5).as_millis(), 2500);
        assert_eq!(SimTime::from_secs_f64(-1.0), SimTime::ZERO);
        assert_eq!(SimTime::from(Duration::from_millis(1500)).as_secs_f64(), 1.5);
        assert_eq!(SimTime::from_millis(1000) + Duration::from_millis(500), SimTime::from_millis(1500));
        assert_eq!(SimTime::from_millis(1000) - SimTime::from_millis(1500), Duration::ZERO);
        assert_eq!(SimTime::from_millis(12_050).to_string(), "12.050s");
    }

    #[test]
    fn test_sub_millisecond_offsets_round() {
        let start = SimTime::from_millis(10);
        assert_eq!(start + Duration::from_micros(1500), SimTime::from_millis(12));
        assert_eq!(start + Duration::from_micros(1499), SimTime::from_millis(11));
        assert_eq!(start + Duration::from_micros(400), start);
        assert_eq!(SimTime::from(Duration::from_secs_f64(9.9996)), SimTime::from_secs_f64(9.9996));
    }

    #[test]
    fn test_unpaced_clock_jumps() {
        let mut clock = Clock::as_fast_as_possible();
        let started = Instant::now();
        clock.advance_to(SimTime::from_secs_f64(3600.0));
        assert_eq!(clock.now(), SimTime::from_secs_f64(3600.0));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_clock_never_moves_backwards() {
        let mut clock = Clock::as_fast_as_possible();
        clock.advance_to(SimTime::from_millis(500));
        clock.advance_to(SimTime::from_millis(100));
        assert_eq!(clock.now(), SimTime::from_millis(500));
    }

    #[test]
    fn test_paced_clock_sleeps() {
        let mut clock = Clock::new(0.01);
        let started = Instant::now();
        clock.advance_to(SimTime::from_secs_f64(5.0));
        assert!(started.elapsed() >= Duration::from_millis(45));
        assert_eq!(clock.overshoot_warnings(), 0);
    }

    #[test]
    fn test_invalid_factor_is_unpaced() {
        assert!(!Clock::new(f64::NAN).is_paced());
        assert!(!Clock::new(-2.0).is_paced());
        assert!(Clock::new(0.5).is_paced());
    }
}
