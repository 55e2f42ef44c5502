//! Tests for the single-process coordinator.

use super::{Coordinator, LocalCoordinator, run};
use crate::config::Configuration;
use crate::outcome::Outcome;
use crate::reporter::NullReporter;
use crate::work_item::WorkItem;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn tests(count: usize) -> Vec<String> {
  (0..count).map(|i| format!("Suite#test_{i}")).collect()
}

#[tokio::test]
async fn test_runs_every_test_once() {
  let coordinator = LocalCoordinator::new(Configuration::new());
  let runner = |_: &WorkItem| Outcome::passed(2, Duration::ZERO);

  let summary = run(&coordinator, &tests(10), &runner, &mut NullReporter)
    .await
    .unwrap();

  assert_eq!(summary.local.runs, 10);
  assert_eq!(summary.local.passes, 10);
  assert_eq!(summary.local.assertions, 20);
  assert_eq!(summary.local.acks, 10);
  assert!(summary.local.is_complete());
  assert!(summary.passed());
}

#[tokio::test]
async fn test_empty_selection_closes_queue() {
  let coordinator = LocalCoordinator::new(Configuration::new());
  let runner = |_: &WorkItem| Outcome::passed(1, Duration::ZERO);

  let summary = run(&coordinator, &Vec::<String>::new(), &runner, &mut NullReporter)
    .await
    .unwrap();
  assert_eq!(summary.local.runs, 0);
  assert!(summary.combined.is_valid());
}

#[tokio::test]
async fn test_requeues_until_final_attempt() {
  let coordinator = LocalCoordinator::new(Configuration::new().with_max_attempts(3));
  let runner = |item: &WorkItem| {
    if item.identifier() == "Suite#test_0" {
      Outcome::failed("always")
    } else {
      Outcome::passed(1, Duration::ZERO)
    }
  };

  let summary = run(&coordinator, &tests(5), &runner, &mut NullReporter)
    .await
    .unwrap();
  let results = &summary.local;
  assert_eq!(results.runs, 7);
  assert_eq!(results.passes, 4);
  assert_eq!(results.failures, 1);
  assert_eq!(results.requeues, 2);
  assert!(results.is_valid());
  assert!(!summary.passed());
}

#[tokio::test]
async fn test_flaky_test_passes_on_retry() {
  let coordinator = LocalCoordinator::new(Configuration::new().with_max_attempts(2));
  let runner = |item: &WorkItem| {
    if item.attempt() == 1 {
      Outcome::errored("flaky")
    } else {
      Outcome::passed(1, Duration::ZERO)
    }
  };

  let summary = run(&coordinator, &tests(3), &runner, &mut NullReporter)
    .await
    .unwrap();
  assert_eq!(summary.local.passes, 3);
  assert_eq!(summary.local.requeues, 3);
  assert_eq!(summary.local.errors, 0);
  assert!(summary.passed());
}

#[tokio::test]
async fn test_aborts_at_max_failures() {
  let coordinator = LocalCoordinator::new(Configuration::new().with_max_failures(Some(3)));
  let runner = |_: &WorkItem| Outcome::failed("nope");

  let summary = run(&coordinator, &tests(10), &runner, &mut NullReporter)
    .await
    .unwrap();
  assert_eq!(summary.local.failures, 3);
  assert!(summary.local.is_abort());
  assert!(!summary.local.is_complete());
  assert!(summary.local.is_valid());
}

#[tokio::test]
async fn test_only_first_producer_publishes() {
  let coordinator = LocalCoordinator::new(Configuration::new());
  coordinator.produce(&tests(3)).await.unwrap();
  coordinator.produce(&tests(3)).await.unwrap();
  assert_eq!(coordinator.local_results().size, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumers_share_the_queue() {
  let coordinator = Arc::new(LocalCoordinator::new(Configuration::new()));
  let executed = Arc::new(AtomicUsize::new(0));
  coordinator.produce(&tests(50)).await.unwrap();

  let mut handles = Vec::new();
  for _ in 0..4 {
    let coordinator = Arc::clone(&coordinator);
    let executed = Arc::clone(&executed);
    handles.push(tokio::spawn(async move {
      let runner = move |_: &WorkItem| {
        executed.fetch_add(1, Ordering::SeqCst);
        Outcome::passed(1, Duration::ZERO)
      };
      coordinator.consume(&runner, &mut NullReporter).await
    }));
  }
  for handle in handles {
    handle.await.unwrap().unwrap();
  }

  assert_eq!(executed.load(Ordering::SeqCst), 50);
  assert_eq!(coordinator.local_results().acks, 50);
}
