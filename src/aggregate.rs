//! # Result Aggregate
//!
//! Run statistics and the predicates derived from them.
//!
//! The same type serves two purposes: a worker's local tally, and the
//! combined tally of every worker in a run (mirrored from broker-resident
//! counters). For the combined tally, the counters are applied as deltas;
//! some deltas are negative when a retry attempt reverses earlier failures,
//! which is why the counters are signed.
//!
//! `runs`, `assertions`, `passes`, `failures`, `errors`, `skips`, `requeues`
//! and `discards` accumulate across every attempt of a run id. `acks` and
//! `size` describe only the current attempt and are reset by its leader.

use crate::commit::CommittedResult;
use crate::outcome::ResultType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size assumed for a run whose leader has not published one yet. It is
/// larger than any ack count, so such a run never looks complete.
pub const UNPUBLISHED_SIZE: i64 = i32::MAX as i64;

/// Counters describing a (partial) run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultAggregate {
  /// Failure threshold at which the run aborts.
  pub max_failures: Option<i64>,

  /// Attempts recorded, including requeued and discarded ones.
  pub runs: i64,
  /// Assertions evaluated.
  pub assertions: i64,
  /// Passed results.
  pub passes: i64,
  /// Failed results.
  pub failures: i64,
  /// Errored results.
  pub errors: i64,
  /// Skipped results.
  pub skips: i64,
  /// Attempts that were requeued for another try.
  pub requeues: i64,
  /// Results that could not be committed.
  pub discards: i64,

  /// Entries acknowledged in the current attempt.
  pub acks: i64,
  /// Entries published for the current attempt.
  pub size: i64,
}

impl ResultAggregate {
  /// An empty aggregate with the given failure threshold.
  #[must_use]
  pub fn with_max_failures(max_failures: Option<i64>) -> Self {
    Self {
      max_failures,
      ..Self::default()
    }
  }

  /// Records one committed result.
  pub fn update_with_result(&mut self, result: &CommittedResult) {
    match result.result_type() {
      ResultType::Passed => self.passes += 1,
      ResultType::Failed => self.failures += 1,
      ResultType::Error => self.errors += 1,
      ResultType::Skipped => self.skips += 1,
      ResultType::Discarded => self.discards += 1,
      ResultType::Requeued => self.requeues += 1,
    }

    if result.is_acked() {
      self.acks += 1;
    }
    self.runs += 1;
    self.assertions += result.committed_outcome().assertions as i64;
  }

  /// Runs that produced a reportable result of their own.
  #[must_use]
  pub fn unique_runs(&self) -> i64 {
    self.runs - self.requeues - self.discards
  }

  /// Results counted in one of the reportable categories.
  #[must_use]
  pub fn reported_results(&self) -> i64 {
    self.passes + self.failures + self.errors + self.skips
  }

  /// Failures and errors together.
  #[must_use]
  pub fn total_failures(&self) -> i64 {
    self.failures + self.errors
  }

  /// Every published entry has been acknowledged.
  #[must_use]
  pub fn is_complete(&self) -> bool {
    self.acks == self.size
  }

  /// The failure threshold has been reached.
  #[must_use]
  pub fn is_abort(&self) -> bool {
    self
      .max_failures
      .is_some_and(|max| self.total_failures() >= max)
  }

  /// Every unique run was reported exactly once.
  #[must_use]
  pub fn all_runs_reported(&self) -> bool {
    self.unique_runs() == self.reported_results()
  }

  /// The statistics are consistent and the run has ended.
  #[must_use]
  pub fn is_valid(&self) -> bool {
    self.all_runs_reported() && (self.is_complete() || self.is_abort())
  }

  /// No failures or errors were recorded.
  #[must_use]
  pub fn is_passed(&self) -> bool {
    self.total_failures() == 0
  }

  /// Compares the counters, ignoring the failure threshold.
  #[must_use]
  pub fn same_counts(&self, other: &ResultAggregate) -> bool {
    Self {
      max_failures: None,
      ..self.clone()
    } == Self {
      max_failures: None,
      ..other.clone()
    }
  }
}

impl fmt::Display for ResultAggregate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} runs, {} assertions, {} passes, {} failures, {} errors",
      self.runs, self.assertions, self.passes, self.failures, self.errors
    )?;
    if self.skips > 0 {
      write!(f, ", {} skips", self.skips)?;
    }
    if self.requeues > 0 {
      write!(f, ", {} re-queued", self.requeues)?;
    }
    if self.discards > 0 {
      write!(f, ", {} discarded", self.discards)?;
    }
    Ok(())
  }
}
