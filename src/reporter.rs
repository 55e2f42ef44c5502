//! # Reporting
//!
//! Hooks through which a coordinator tells the outside world what happened.
//!
//! The call sequence for one worker is:
//!
//! 1. [`Reporter::start`] once, before producing.
//! 2. For every batch: [`Reporter::prerecord`] for each item before it runs,
//!    [`Reporter::record`] for each committed result, then
//!    [`Reporter::update`] with the freshly read combined aggregate.
//! 3. [`Reporter::report`] once, with the final [`RunSummary`].
//!
//! Items of one batch may run concurrently, so `prerecord` and `record` for
//! the same item are not necessarily adjacent.

use crate::aggregate::ResultAggregate;
use crate::commit::CommittedResult;
use crate::work_item::WorkItem;
use std::time::Duration;

/// Identifiers this worker took over from other workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimedTests {
  /// Reclaimed because the owning worker did not report back in time.
  pub timed_out: Vec<String>,
  /// Reclaimed from the fast-retry set after another worker saw them fail.
  pub failed: Vec<String>,
}

impl ReclaimedTests {
  /// True when nothing was reclaimed.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.timed_out.is_empty() && self.failed.is_empty()
  }
}

/// Everything a reporter needs at the end of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
  /// This worker's own results.
  pub local: ResultAggregate,
  /// Results of all workers in the run.
  pub combined: ResultAggregate,
  /// This worker refused to run (retry against an aborted run).
  pub aborted: bool,
  /// Tests reclaimed from other workers.
  pub reclaimed: ReclaimedTests,
  /// Configured per-test timeout.
  pub test_timeout_seconds: f64,
  /// Configured failure threshold.
  pub max_failures: Option<i64>,
  /// Wall-clock duration of this worker's run.
  pub elapsed: Duration,
}

impl RunSummary {
  /// The worker's verdict: not aborted, no local failures, and a consistent
  /// combined tally.
  ///
  /// A worker only fails the build for failures it saw itself and trusts
  /// the other workers to do the same.
  #[must_use]
  pub fn passed(&self) -> bool {
    !self.aborted && self.local.is_passed() && self.combined.is_valid()
  }
}

/// Observer of a worker's run.
pub trait Reporter: Send {
  /// Called once before work is produced.
  fn start(&mut self) {}

  /// Called before `item` runs.
  fn prerecord(&mut self, _item: &WorkItem) {}

  /// Called after `result` was committed.
  fn record(&mut self, _result: &CommittedResult) {}

  /// Called with the combined aggregate after each batch is accounted.
  fn update(&mut self, _combined: &ResultAggregate) {}

  /// Called once at the end of the run.
  fn report(&mut self, _summary: &RunSummary) {}

  /// Whether this reporter considers the run successful.
  fn passed(&self) -> bool {
    true
  }
}

/// Fans every call out to a list of reporters.
#[derive(Default)]
pub struct CompositeReporter {
  reporters: Vec<Box<dyn Reporter>>,
}

impl CompositeReporter {
  /// An empty composite.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a reporter.
  #[must_use]
  pub fn with(mut self, reporter: impl Reporter + 'static) -> Self {
    self.push(reporter);
    self
  }

  /// Adds a reporter.
  pub fn push(&mut self, reporter: impl Reporter + 'static) {
    self.reporters.push(Box::new(reporter));
  }

  /// Number of reporters.
  #[must_use]
  pub fn len(&self) -> usize {
    self.reporters.len()
  }

  /// True when there are no reporters.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.reporters.is_empty()
  }
}

impl Reporter for CompositeReporter {
  fn start(&mut self) {
    self.reporters.iter_mut().for_each(|r| r.start());
  }

  fn prerecord(&mut self, item: &WorkItem) {
    self.reporters.iter_mut().for_each(|r| r.prerecord(item));
  }

  fn record(&mut self, result: &CommittedResult) {
    self.reporters.iter_mut().for_each(|r| r.record(result));
  }

  fn update(&mut self, combined: &ResultAggregate) {
    self.reporters.iter_mut().for_each(|r| r.update(combined));
  }

  fn report(&mut self, summary: &RunSummary) {
    self.reporters.iter_mut().for_each(|r| r.report(summary));
  }

  fn passed(&self) -> bool {
    self.reporters.iter().all(|r| r.passed())
  }
}

/// A reporter that ignores every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}
