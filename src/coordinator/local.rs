//! Single-process coordinator.

use super::Coordinator;
use crate::aggregate::ResultAggregate;
use crate::commit::{Commit, CommittedResult};
use crate::config::Configuration;
use crate::error::CoordinatorError;
use crate::outcome::ResultType;
use crate::reporter::Reporter;
use crate::runner::{Runner, execute};
use crate::selector::Selector;
use crate::work_item::WorkItem;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct QueueState {
  items: VecDeque<WorkItem>,
  closed: bool,
}

/// FIFO of work items that consumers wait on until it is closed.
#[derive(Debug, Default)]
struct WorkQueue {
  state: Mutex<QueueState>,
  ready: Notify,
}

impl WorkQueue {
  fn state(&self) -> MutexGuard<'_, QueueState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn push(&self, item: WorkItem) -> bool {
    {
      let mut state = self.state();
      if state.closed {
        return false;
      }
      state.items.push_back(item);
    }
    self.ready.notify_one();
    true
  }

  fn close(&self) {
    self.state().closed = true;
    self.ready.notify_waiters();
  }

  /// Next item, or `None` once the queue is closed.
  async fn pop(&self) -> Option<WorkItem> {
    loop {
      let notified = self.ready.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      {
        let mut state = self.state();
        if state.closed {
          return None;
        }
        if let Some(item) = state.items.pop_front() {
          return Some(item);
        }
      }
      notified.await;
    }
  }
}

/// Coordinates workers running as tasks inside one process.
///
/// Every task shares one queue. The first call to
/// [`produce`](Coordinator::produce) fills it; later calls do nothing.
/// Requeued items go back to the end of the queue, and the queue closes as
/// soon as the run is complete or aborted. Acknowledgments cannot fail, so
/// results are never discarded.
#[derive(Debug)]
pub struct LocalCoordinator {
  config: Configuration,
  leader: AtomicBool,
  queue: Arc<WorkQueue>,
  local_results: Mutex<ResultAggregate>,
}

impl LocalCoordinator {
  /// Creates a coordinator with an empty queue.
  pub fn new(config: Configuration) -> Self {
    let local_results = ResultAggregate::with_max_failures(config.max_failures);
    Self {
      config,
      leader: AtomicBool::new(false),
      queue: Arc::new(WorkQueue::default()),
      local_results: Mutex::new(local_results),
    }
  }

  fn results(&self) -> MutexGuard<'_, ResultAggregate> {
    self
      .local_results
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

#[async_trait]
impl Coordinator for LocalCoordinator {
  fn configuration(&self) -> &Configuration {
    &self.config
  }

  async fn produce(&self, selector: &dyn Selector) -> Result<(), CoordinatorError> {
    if self
      .leader
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      return Ok(());
    }

    let tests = selector.tests();
    self.results().size = tests.len() as i64;
    debug!(worker = %self.config.worker_id, size = tests.len(), "Publishing tests");

    if tests.is_empty() {
      self.queue.close();
      return Ok(());
    }
    for identifier in tests {
      self.queue.push(WorkItem::new(
        identifier,
        Uuid::new_v4().to_string(),
        self.config.max_attempts,
        self.config.test_timeout_seconds,
      ));
    }
    Ok(())
  }

  async fn consume(
    &self,
    runner: &dyn Runner,
    reporter: &mut dyn Reporter,
  ) -> Result<(), CoordinatorError> {
    while let Some(item) = self.queue.pop().await {
      reporter.prerecord(&item);
      let outcome = execute(runner, &item).await;

      let queue = Arc::clone(&self.queue);
      let result = CommittedResult::commit_with(item, outcome, |item, outcome| {
        let next = (outcome.result_type() == ResultType::Requeued).then(|| item.next_attempt());
        Commit::new(move || {
          if let Some(next) = next {
            queue.push(next);
          }
          true
        })
      });

      reporter.record(&result);
      let results = {
        let mut local = self.results();
        local.update_with_result(&result);
        local.clone()
      };
      reporter.update(&results);

      if results.is_complete() || results.is_abort() {
        self.queue.close();
      }
    }
    Ok(())
  }

  fn local_results(&self) -> ResultAggregate {
    self.results().clone()
  }

  async fn combined_results(&self) -> Result<ResultAggregate, CoordinatorError> {
    Ok(self.local_results())
  }

  fn aborted(&self) -> bool {
    false
  }
}
