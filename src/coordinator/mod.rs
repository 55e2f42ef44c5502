//! # Coordinators
//!
//! A coordinator decides which worker runs which test and keeps the tally.
//!
//! Every worker calls [`Coordinator::produce`] and then
//! [`Coordinator::consume`]. Exactly one worker per run (the leader) turns
//! the selected tests into work items during `produce`; everybody, leader
//! included, then claims and runs items until the combined results are
//! complete or the run aborts.
//!
//! ## Backends
//!
//! - [`LocalCoordinator`]: a single process; workers are tasks sharing one
//!   queue.
//! - [`BrokerCoordinator`]: workers in separate processes, coordinating
//!   through a [`Broker`](crate::broker::Broker).
//!
//! [`run`] drives one worker through a whole run and produces the
//! [`RunSummary`] that reporters print.

mod distributed;
mod local;

#[cfg(test)]
mod local_test;

pub use distributed::{BrokerCoordinator, GROUP_NAME, RunKeys};
pub use local::LocalCoordinator;

use crate::aggregate::ResultAggregate;
use crate::config::Configuration;
use crate::error::CoordinatorError;
use crate::reporter::{ReclaimedTests, Reporter, RunSummary};
use crate::runner::Runner;
use crate::selector::Selector;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;

/// The operations every coordinator backend provides.
#[async_trait]
pub trait Coordinator: Send + Sync {
  /// The configuration this coordinator was created with.
  fn configuration(&self) -> &Configuration;

  /// Takes part in leader election and, when elected, publishes the work.
  async fn produce(&self, selector: &dyn Selector) -> Result<(), CoordinatorError>;

  /// Claims and runs work items until the run is complete or aborted.
  async fn consume(
    &self,
    runner: &dyn Runner,
    reporter: &mut dyn Reporter,
  ) -> Result<(), CoordinatorError>;

  /// Results of the items this worker ran.
  fn local_results(&self) -> ResultAggregate;

  /// Results of every worker in the run.
  async fn combined_results(&self) -> Result<ResultAggregate, CoordinatorError>;

  /// True when this worker refused to take part in the run.
  fn aborted(&self) -> bool;

  /// Tests this worker took over from other workers.
  fn reclaimed(&self) -> ReclaimedTests {
    ReclaimedTests::default()
  }
}

/// Runs one worker from start to finish and reports the summary.
pub async fn run(
  coordinator: &dyn Coordinator,
  selector: &dyn Selector,
  runner: &dyn Runner,
  reporter: &mut dyn Reporter,
) -> Result<RunSummary, CoordinatorError> {
  let started = Instant::now();
  let config = coordinator.configuration();

  reporter.start();
  coordinator.produce(selector).await?;
  coordinator.consume(runner, reporter).await?;

  let summary = RunSummary {
    local: coordinator.local_results(),
    combined: coordinator.combined_results().await?,
    aborted: coordinator.aborted(),
    reclaimed: coordinator.reclaimed(),
    test_timeout_seconds: config.test_timeout_seconds,
    max_failures: config.max_failures,
    elapsed: started.elapsed(),
  };
  info!(
    run_id = %config.run_id,
    worker = %config.worker_id,
    local = %summary.local,
    combined = %summary.combined,
    "Run finished"
  );
  reporter.report(&summary);
  Ok(summary)
}
