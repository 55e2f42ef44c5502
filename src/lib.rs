//! # TestWeave
//!
//! Distributed test partitioning for test suites split across many workers.
//!
//! Every worker of a run discovers the same tests and asks a coordinator for
//! work. One worker is elected leader and publishes the tests; all workers
//! then claim tests in batches, run them and commit the results, until every
//! test is accounted for or the run is aborted after too many failures.
//! Tests held by a worker that went away are reclaimed by the others, failed
//! tests can be retried within a run and across attempts of the same run id,
//! and results whose ownership was lost are discarded instead of being
//! counted twice.
//!
//! ## Key Features
//!
//! - **Leader election** through an atomic broker-side step
//! - **Stale reclaim** of entries idle past `timeout × batch size`
//! - **Fast retry** of failed attempts through a shared retry set
//! - **Retry mode**: a second attempt of a run id re-runs only failed tests
//! - **Backends**: Redis streams, or a single process
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use testweave::config::Configuration;
//! use testweave::coordinator::run;
//! use testweave::outcome::Outcome;
//! use testweave::work_item::WorkItem;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), testweave::error::CoordinatorError> {
//! testweave::logging::init_tracing();
//! let config = Configuration::from_process_env()?;
//! let coordinator = config.coordinator().await?;
//! let selector = config.test_selector(vec!["Suite#test_a".to_string()])?;
//! let runner = |_item: &WorkItem| Outcome::passed(1, Duration::ZERO);
//! let mut reporter = config.reporter()?;
//!
//! let summary = run(coordinator.as_ref(), &selector, &runner, &mut reporter).await?;
//! std::process::exit(if summary.passed() { 0 } else { 1 });
//! # }
//! ```

#![warn(missing_docs)]

/// Result statistics shared across workers.
pub mod aggregate;
/// Polling backoff and stale-threshold jitter.
pub mod backoff;
/// Broker protocol surface and its backends.
pub mod broker;
/// Acknowledgment of results and the discard rule.
pub mod commit;
/// Runtime settings and backend selection.
pub mod config;
/// Local and broker-backed coordinators.
pub mod coordinator;
/// Error types.
pub mod error;
/// Tracing subscriber set-up.
pub mod logging;
/// Test outcomes and their classification.
pub mod outcome;
/// Observers of a worker's run.
pub mod reporter;
/// Console reporters.
pub mod reporters;
/// Running work items.
pub mod runner;
/// Choosing the tests of a run.
pub mod selector;
/// Work items: one attempt of one test.
pub mod work_item;

#[cfg(test)]
mod config_test;
#[cfg(test)]
mod logging_test;
#[cfg(test)]
mod selector_test;

pub use aggregate::ResultAggregate;
pub use broker::{Broker, InMemoryBroker, RedisBroker};
pub use commit::{Commit, CommittedResult};
pub use config::{Configuration, CoordinatorUri};
pub use coordinator::{BrokerCoordinator, Coordinator, LocalCoordinator, run};
pub use error::{BrokerError, ConfigError, CoordinatorError};
pub use outcome::{Failure, Outcome, ResultType};
pub use reporter::{CompositeReporter, Reporter, RunSummary};
pub use runner::Runner;
pub use selector::{Selector, TestSelector};
pub use work_item::WorkItem;
