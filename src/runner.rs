//! Running work items.

use crate::outcome::{Outcome, ResultType};
use crate::work_item::WorkItem;
use async_trait::async_trait;

/// Executes one work item and reports what happened.
///
/// A runner may enforce its own per-test timeout; the coordinator never
/// preempts a running test.
#[async_trait]
pub trait Runner: Send + Sync {
  /// Runs the test behind `item`.
  async fn run(&self, item: &WorkItem) -> Outcome;
}

#[async_trait]
impl<F> Runner for F
where
  F: Fn(&WorkItem) -> Outcome + Send + Sync,
{
  async fn run(&self, item: &WorkItem) -> Outcome {
    self(item)
  }
}

/// Runs one attempt of `item`, applying the attempt budget.
///
/// - An exhausted item is not run; its fixed exhaustion failure is returned.
/// - A failure or error before the final attempt is wrapped as a requeue.
pub async fn execute(runner: &dyn Runner, item: &WorkItem) -> Outcome {
  if item.attempts_exhausted() {
    return item.attempts_exhausted_outcome();
  }

  let outcome = runner.run(item).await;
  match outcome.result_type() {
    ResultType::Failed | ResultType::Error if !item.final_attempt() => {
      outcome.requeue(item.attempt(), item.max_attempts())
    }
    _ => outcome,
  }
}
