//! Polling backoff and stale-threshold jitter.
//!
//! Both are explicit values rather than constants buried in the consume loop,
//! so tests can drive them with a seeded random source.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Exponential backoff for the blocking fresh-claim read.
///
/// Grows by `multiplier` after every loop iteration that found no work and
/// returns to `initial` as soon as work is found.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
  /// Starting (and reset) interval.
  pub initial: Duration,
  /// Growth factor applied on empty iterations.
  pub multiplier: u32,
  /// Upper bound on the interval.
  pub max: Duration,
  current: Duration,
}

impl Default for Backoff {
  fn default() -> Self {
    // Capped so an idle worker still polls often enough to notice stale entries.
    Self::new(Duration::from_millis(10), 2, Duration::from_secs(5))
  }
}

impl Backoff {
  /// Creates a backoff starting at `initial`.
  #[must_use]
  pub fn new(initial: Duration, multiplier: u32, max: Duration) -> Self {
    Self {
      initial,
      multiplier,
      max,
      current: initial,
    }
  }

  /// The interval to block for on the next read.
  #[must_use]
  pub fn current(&self) -> Duration {
    self.current
  }

  /// Records the result of one loop iteration.
  pub fn observe(&mut self, found_work: bool) {
    if found_work {
      self.reset();
    } else {
      self.grow();
    }
  }

  /// Multiplies the interval, up to `max`.
  pub fn grow(&mut self) {
    self.current = self
      .current
      .saturating_mul(self.multiplier)
      .min(self.max);
  }

  /// Returns to the initial interval.
  pub fn reset(&mut self) {
    self.current = self.initial;
  }
}

/// Random multiplier drawn uniformly from a half-open range.
///
/// Spreads the moment different workers consider an entry stale, so they do
/// not all try to claim it at once.
#[derive(Debug)]
pub struct Jitter {
  range: Range<f64>,
  rng: Mutex<StdRng>,
}

impl Default for Jitter {
  fn default() -> Self {
    Self::new(1.0..1.2)
  }
}

impl Jitter {
  /// Jitter over `range`, seeded from the operating system.
  #[must_use]
  pub fn new(range: Range<f64>) -> Self {
    Self::with_rng(range, StdRng::from_entropy())
  }

  /// Jitter over `range` driven by the given generator.
  #[must_use]
  pub fn with_rng(range: Range<f64>, rng: StdRng) -> Self {
    Self {
      range,
      rng: Mutex::new(rng),
    }
  }

  /// The range factors are drawn from.
  #[must_use]
  pub fn range(&self) -> Range<f64> {
    self.range.clone()
  }

  /// Draws one factor. An empty range yields its start.
  pub fn sample(&self) -> f64 {
    if self.range.is_empty() {
      return self.range.start;
    }
    self
      .rng
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .gen_range(self.range.clone())
  }

  /// Scales a duration by a freshly drawn factor, saturating at
  /// `Duration::MAX`. A negative or NaN factor yields zero.
  pub fn apply(&self, duration: Duration) -> Duration {
    let factor = self.sample();
    if factor.is_nan() || factor <= 0.0 {
      return Duration::ZERO;
    }
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX)
  }
}
