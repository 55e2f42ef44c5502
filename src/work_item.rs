//! Work items: one test plus the delivery metadata of its current attempt.

use crate::outcome::{Failure, Outcome};
use std::fmt;
use std::time::Duration;

/// One unit of work handed to a [`Runner`](crate::runner::Runner).
///
/// The `entry_id` is the broker's delivery handle and stays the same across
/// attempts; only `attempt` changes. A work item is never mutated: a new
/// attempt is a new value created with [`WorkItem::next_attempt`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
  identifier: String,
  entry_id: String,
  attempt: u32,
  max_attempts: u32,
  timeout_seconds: f64,
}

impl WorkItem {
  /// Creates the first attempt of a work item.
  #[must_use]
  pub fn new(
    identifier: impl Into<String>,
    entry_id: impl Into<String>,
    max_attempts: u32,
    timeout_seconds: f64,
  ) -> Self {
    Self {
      identifier: identifier.into(),
      entry_id: entry_id.into(),
      attempt: 1,
      max_attempts,
      timeout_seconds,
    }
  }

  /// Returns a copy of this item at the given attempt number.
  #[must_use]
  pub fn at_attempt(&self, attempt: u32) -> Self {
    Self {
      attempt,
      ..self.clone()
    }
  }

  /// The test identifier, e.g. `"Suite#test_name"`.
  #[must_use]
  pub fn identifier(&self) -> &str {
    &self.identifier
  }

  /// The broker entry this item was delivered through.
  #[must_use]
  pub fn entry_id(&self) -> &str {
    &self.entry_id
  }

  /// The attempt number, starting at 1.
  #[must_use]
  pub fn attempt(&self) -> u32 {
    self.attempt
  }

  /// Maximum number of attempts for this item.
  #[must_use]
  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  /// The per-test timeout, in seconds.
  #[must_use]
  pub fn timeout_seconds(&self) -> f64 {
    self.timeout_seconds
  }

  /// Identifies this particular attempt: `"<entry_id>/<attempt>"`.
  ///
  /// This is the member stored in the fast-retry set.
  #[must_use]
  pub fn attempt_id(&self) -> String {
    format!("{}/{}", self.entry_id, self.attempt)
  }

  /// True once the attempt number is past the budget. Such an item is never
  /// executed again.
  #[must_use]
  pub fn attempts_exhausted(&self) -> bool {
    self.attempt > self.max_attempts
  }

  /// True when this is the last attempt allowed.
  #[must_use]
  pub fn final_attempt(&self) -> bool {
    self.attempt == self.max_attempts
  }

  /// The next attempt of the same entry.
  #[must_use]
  pub fn next_attempt(&self) -> Self {
    self.at_attempt(self.attempt + 1)
  }

  /// The fixed outcome reported in place of running an exhausted item.
  #[must_use]
  pub fn attempts_exhausted_outcome(&self) -> Outcome {
    let timeout = self.timeout_seconds;
    let message = format!(
      "This test takes too long to run (> {timeout}s).\n\n\
       We have tried running this test {} times on different workers, but every time the worker has not reported back a result within {timeout}s.\n\
       Try to make the test faster, or increase the test timeout.",
      self.max_attempts
    );

    Outcome::passed(0, Duration::ZERO).with_failure(Failure::AttemptsExhausted { message })
  }
}

impl fmt::Display for WorkItem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} (attempt {} of {})",
      self.identifier, self.attempt, self.max_attempts
    )
  }
}
