//! # Commit Protocol
//!
//! Reconciles "a worker finished a test" with "the broker acknowledged it".
//!
//! A worker runs a test, then tries to acknowledge the result with the
//! coordinator. The acknowledgment can fail: most commonly because the test
//! ran too long and another worker reclaimed the entry in the meantime. The
//! worker no longer owns the result, so reporting it would count the test
//! twice. [`CommittedResult`] downgrades such results to
//! [`ResultType::Discarded`], keeping the original outcome inside the
//! discard marker so nothing is silently lost.
//!
//! Requeued results are different: their acknowledgment schedules the next
//! attempt, and they are reported as requeued whether or not that worked.
//!
//! ## Core Types
//!
//! - **[`Commit`]**: a deferred acknowledgment, evaluated at most once
//! - **[`CommittedResult`]**: work item + raw outcome + commit, exposing the
//!   outcome observers should see

use crate::outcome::{Outcome, ResultType};
use crate::work_item::WorkItem;
use std::fmt;
use std::sync::{Mutex, OnceLock, PoisonError};

type Acknowledge = Box<dyn FnOnce() -> bool + Send>;

/// A deferred, memoized acknowledgment.
///
/// The wrapped closure runs the first time the result is asked for and never
/// again, so any side effect it carries (enqueueing the next attempt, reading
/// a pipelined broker reply) happens exactly once.
pub struct Commit {
  outcome: OnceLock<bool>,
  acknowledge: Mutex<Option<Acknowledge>>,
}

impl Commit {
  /// Wraps an acknowledgment closure without running it.
  pub fn new(acknowledge: impl FnOnce() -> bool + Send + 'static) -> Self {
    Self {
      outcome: OnceLock::new(),
      acknowledge: Mutex::new(Some(Box::new(acknowledge))),
    }
  }

  /// A commit that always succeeded.
  #[must_use]
  pub fn success() -> Self {
    Self::new(|| true)
  }

  /// A commit that always failed.
  #[must_use]
  pub fn failure() -> Self {
    Self::new(|| false)
  }

  /// Runs the acknowledgment on first call and returns its cached result.
  pub fn is_success(&self) -> bool {
    *self.outcome.get_or_init(|| {
      let acknowledge = self
        .acknowledge
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
      acknowledge.is_some_and(|ack| ack())
    })
  }

  /// Negation of [`Commit::is_success`].
  pub fn is_failure(&self) -> bool {
    !self.is_success()
  }

  /// True once the acknowledgment has run.
  #[must_use]
  pub fn is_evaluated(&self) -> bool {
    self.outcome.get().is_some()
  }
}

impl fmt::Debug for Commit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.outcome.get() {
      Some(success) => write!(f, "Commit({success})"),
      None => write!(f, "Commit(pending)"),
    }
  }
}

/// The result of one attempt after the commit protocol has been applied.
#[derive(Debug)]
pub struct CommittedResult {
  work_item: WorkItem,
  initial: Outcome,
  commit: Commit,
  committed: OnceLock<Outcome>,
}

impl CommittedResult {
  /// Combines a work item, its raw outcome and the acknowledgment for it.
  #[must_use]
  pub fn new(work_item: WorkItem, initial: Outcome, commit: Commit) -> Self {
    Self {
      work_item,
      initial,
      commit,
      committed: OnceLock::new(),
    }
  }

  /// Builds the acknowledgment from the raw outcome, then commits.
  pub fn commit_with<F>(work_item: WorkItem, initial: Outcome, acknowledge: F) -> Self
  where
    F: FnOnce(&WorkItem, &Outcome) -> Commit,
  {
    let commit = acknowledge(&work_item, &initial);
    Self::new(work_item, initial, commit)
  }

  /// The work item this result belongs to.
  #[must_use]
  pub fn work_item(&self) -> &WorkItem {
    &self.work_item
  }

  /// The outcome as produced by the runner, before the commit protocol.
  #[must_use]
  pub fn initial_outcome(&self) -> &Outcome {
    &self.initial
  }

  /// The acknowledgment for this result.
  #[must_use]
  pub fn commit(&self) -> &Commit {
    &self.commit
  }

  /// True when the raw outcome asks for another attempt.
  #[must_use]
  pub fn is_requeue(&self) -> bool {
    self.initial.result_type() == ResultType::Requeued
  }

  /// True when the raw outcome ends the entry's life.
  #[must_use]
  pub fn is_final(&self) -> bool {
    !self.is_requeue()
  }

  /// The outcome every observer sees.
  ///
  /// The acknowledgment is settled on first access. A final outcome whose
  /// acknowledgment failed becomes a discard wrapping the original.
  pub fn committed_outcome(&self) -> &Outcome {
    self.committed.get_or_init(|| {
      let acknowledged = self.commit.is_success();
      if self.is_final() && !acknowledged {
        self.initial.clone().discard(self.work_item.timeout_seconds())
      } else {
        self.initial.clone()
      }
    })
  }

  /// Classification of [`CommittedResult::committed_outcome`].
  pub fn result_type(&self) -> ResultType {
    self.committed_outcome().result_type()
  }

  /// True when this result retired its entry: final and acknowledged.
  pub fn is_acked(&self) -> bool {
    let acknowledged = self.commit.is_success();
    self.is_final() && acknowledged
  }
}
