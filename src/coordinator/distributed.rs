//! Broker-backed coordinator for workers in separate processes.
//!
//! ## Broker state per run
//!
//! All keys live under `testweave/<run_id>/`:
//!
//! - `queue`: the work stream, one entry per test, with consumer group
//!   [`GROUP_NAME`] tracking which worker owns which entry
//! - `retry_set`: attempt ids (`<entry_id>/<attempt>`) that just failed and
//!   may be re-run right away
//! - `<type>_list`: identifiers of failed, errored and skipped tests
//! - one integer counter per [`ResultAggregate`] field
//!
//! ## Lifecycle
//!
//! The leader is whoever creates the consumer group. Creating the group and
//! resetting `size`/`acks` is one atomic step, so a follower can never wipe
//! the leader's counters. If nothing was reset, this is the first attempt of
//! the run id and every selected test is published; otherwise the leader
//! republishes the failed and errored tests of the previous attempt.
//!
//! Each consume iteration first looks at the pending entries: one entry idle
//! past the stale threshold is reclaimed, or failing that, active entries
//! found in the retry set are taken over. It then reads fresh entries,
//! runs everything it claimed, commits the batch atomically and adds the
//! batch's counts to the shared counters. The worker that sees the run
//! complete destroys the group; workers still looping get `NOGROUP` and stop.

use super::Coordinator;
use crate::aggregate::{ResultAggregate, UNPUBLISHED_SIZE};
use crate::backoff::{Backoff, Jitter};
use crate::broker::{Broker, CommitOp, PendingEntry, StreamEntry};
use crate::commit::{Commit, CommittedResult};
use crate::config::Configuration;
use crate::error::{BrokerError, ConfigError, CoordinatorError};
use crate::outcome::ResultType;
use crate::reporter::{ReclaimedTests, Reporter};
use crate::runner::{Runner, execute};
use crate::selector::Selector;
use crate::work_item::WorkItem;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the consumer group every worker joins.
pub const GROUP_NAME: &str = "testweave";

const COUNTERS: [&str; 10] = [
  "runs",
  "assertions",
  "passes",
  "failures",
  "errors",
  "skips",
  "requeues",
  "discards",
  "acks",
  "size",
];

/// Key names for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunKeys {
  run_id: String,
}

impl RunKeys {
  /// Keys for `run_id`.
  pub fn new(run_id: impl Into<String>) -> Self {
    Self {
      run_id: run_id.into(),
    }
  }

  /// `testweave/<run_id>/<name>`.
  #[must_use]
  pub fn key(&self, name: &str) -> String {
    format!("testweave/{}/{name}", self.run_id)
  }

  /// The work stream.
  #[must_use]
  pub fn stream(&self) -> String {
    self.key("queue")
  }

  /// The fast-retry set.
  #[must_use]
  pub fn retry_set(&self) -> String {
    self.key("retry_set")
  }

  /// The list of identifiers that ended with `result_type`.
  #[must_use]
  pub fn list(&self, result_type: ResultType) -> String {
    self.key(&format!("{}_list", result_type.as_str()))
  }

  /// Counter keys, in the order of [`RunKeys::counter_values`].
  #[must_use]
  pub fn counters(&self) -> Vec<String> {
    COUNTERS.iter().map(|name| self.key(name)).collect()
  }

  /// The aggregate's counter values, in the order of [`RunKeys::counters`].
  #[must_use]
  pub fn counter_values(results: &ResultAggregate) -> [i64; 10] {
    [
      results.runs,
      results.assertions,
      results.passes,
      results.failures,
      results.errors,
      results.skips,
      results.requeues,
      results.discards,
      results.acks,
      results.size,
    ]
  }
}

fn aggregate_from(values: &[Option<i64>], max_failures: Option<i64>) -> ResultAggregate {
  let value = |index: usize| values.get(index).copied().flatten();
  ResultAggregate {
    max_failures,
    runs: value(0).unwrap_or_default(),
    assertions: value(1).unwrap_or_default(),
    passes: value(2).unwrap_or_default(),
    failures: value(3).unwrap_or_default(),
    errors: value(4).unwrap_or_default(),
    skips: value(5).unwrap_or_default(),
    requeues: value(6).unwrap_or_default(),
    discards: value(7).unwrap_or_default(),
    acks: value(8).unwrap_or_default(),
    size: value(9).unwrap_or(UNPUBLISHED_SIZE),
  }
}

/// Coordinates workers through a [`Broker`].
pub struct BrokerCoordinator {
  config: Configuration,
  broker: Arc<dyn Broker>,
  keys: RunKeys,
  backoff: Backoff,
  jitter: Jitter,
  local_results: Mutex<ResultAggregate>,
  reclaimed: Mutex<ReclaimedTests>,
  aborted: AtomicBool,
}

impl BrokerCoordinator {
  /// Creates a coordinator for the run described by `config`.
  ///
  /// Fails when the timeout, batch size or attempt budget is out of range,
  /// since the stale threshold is derived from them.
  pub fn new(config: Configuration, broker: Arc<dyn Broker>) -> Result<Self, ConfigError> {
    config.validate()?;
    let keys = RunKeys::new(config.run_id.clone());
    let local_results = ResultAggregate::with_max_failures(config.max_failures);
    Ok(Self {
      config,
      broker,
      keys,
      backoff: Backoff::default(),
      jitter: Jitter::default(),
      local_results: Mutex::new(local_results),
      reclaimed: Mutex::new(ReclaimedTests::default()),
      aborted: AtomicBool::new(false),
    })
  }

  /// Replaces the polling backoff.
  #[must_use]
  pub fn with_backoff(mut self, backoff: Backoff) -> Self {
    self.backoff = backoff;
    self
  }

  /// Replaces the stale-threshold jitter.
  #[must_use]
  pub fn with_jitter(mut self, jitter: Jitter) -> Self {
    self.jitter = jitter;
    self
  }

  /// Key names used for this run.
  #[must_use]
  pub fn keys(&self) -> &RunKeys {
    &self.keys
  }

  fn results(&self) -> MutexGuard<'_, ResultAggregate> {
    self
      .local_results
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn reclaimed_tests(&self) -> MutexGuard<'_, ReclaimedTests> {
    self.reclaimed.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Idle time after which another worker's batch is considered abandoned.
  fn max_idle(&self) -> Duration {
    Duration::from_secs_f64(self.config.test_timeout_seconds * self.config.test_batch_size as f64)
  }

  async fn read_combined(&self) -> Result<ResultAggregate, BrokerError> {
    let values = self.broker.read_counters(&self.keys.counters()).await?;
    Ok(aggregate_from(&values, self.config.max_failures))
  }

  /// Adds `delta` to the shared counters and returns the combined totals.
  async fn adjust_combined(&self, delta: &ResultAggregate) -> Result<ResultAggregate, BrokerError> {
    let deltas: Vec<(String, i64)> = self
      .keys
      .counters()
      .into_iter()
      .zip(RunKeys::counter_values(delta))
      .collect();
    let values = self.broker.increment_counters(&deltas).await?;
    let values: Vec<Option<i64>> = values.into_iter().map(Some).collect();
    Ok(aggregate_from(&values, self.config.max_failures))
  }

  fn work_item(&self, entry: StreamEntry) -> WorkItem {
    WorkItem::new(
      entry.identifier,
      entry.id,
      self.config.max_attempts,
      self.config.test_timeout_seconds,
    )
  }

  /// Publishes the tests for this attempt of the run. Only called by the
  /// leader.
  async fn publish(&self, selector: &dyn Selector, first_attempt: bool) -> Result<(), BrokerError> {
    let worker = &self.config.worker_id;

    let tests = if first_attempt {
      let tests = selector.tests();
      info!(worker = %worker, size = tests.len(), "Publishing tests for first attempt");
      self
        .adjust_combined(&ResultAggregate {
          size: tests.len() as i64,
          ..ResultAggregate::default()
        })
        .await?;
      tests
    } else if !self.config.retry_failures {
      info!(worker = %worker, "Run already attempted and retries are disabled");
      self.adjust_combined(&ResultAggregate::default()).await?;
      Vec::new()
    } else if self.read_combined().await?.is_abort() {
      warn!(worker = %worker, "Previous attempt was aborted, refusing to retry");
      self.aborted.store(true, Ordering::Release);
      self.adjust_combined(&ResultAggregate::default()).await?;
      Vec::new()
    } else {
      let lists = self
        .broker
        .take_lists(&[
          self.keys.list(ResultType::Failed),
          self.keys.list(ResultType::Error),
        ])
        .await?;
      let mut lists = lists.into_iter();
      let failed = lists.next().unwrap_or_default();
      let errored = lists.next().unwrap_or_default();
      let retried = (failed.len() + errored.len()) as i64;
      info!(
        worker = %worker,
        failures = failed.len(),
        errors = errored.len(),
        "Retrying failed tests of previous attempt"
      );
      self
        .adjust_combined(&ResultAggregate {
          size: retried,
          failures: -(failed.len() as i64),
          errors: -(errored.len() as i64),
          requeues: retried,
          ..ResultAggregate::default()
        })
        .await?;
      failed.into_iter().chain(errored).collect()
    };

    self.broker.append(&self.keys.stream(), &tests).await?;
    Ok(())
  }

  async fn consume_loop(
    &self,
    runner: &dyn Runner,
    reporter: &mut dyn Reporter,
  ) -> Result<(), BrokerError> {
    let mut backoff = self.backoff.clone();
    backoff.reset();

    loop {
      let stale = self.claim_stale_items().await?;
      let found_stale = !stale.is_empty();
      let mut combined = self.process_batch(stale, runner, reporter).await?;

      let fresh = self.claim_fresh_items(backoff.current()).await?;
      let found_fresh = !fresh.is_empty();
      if let Some(results) = self.process_batch(fresh, runner, reporter).await? {
        combined = Some(results);
      }

      let combined = match combined {
        Some(combined) => combined,
        None => self.read_combined().await?,
      };
      if combined.is_complete() {
        debug!(worker = %self.config.worker_id, combined = %combined, "Run complete");
        break;
      }
      if combined.is_abort() {
        warn!(worker = %self.config.worker_id, combined = %combined, "Run aborted after too many failures");
        break;
      }
      backoff.observe(found_stale || found_fresh);
    }

    self.cleanup().await;
    Ok(())
  }

  /// Destroys the consumer group and the stream. Another worker may have done
  /// so already.
  async fn cleanup(&self) {
    let stream = self.keys.stream();
    if let Err(e) = self.broker.destroy_group(&stream, GROUP_NAME).await {
      debug!(worker = %self.config.worker_id, error = %e, "Consumer group already removed");
      return;
    }
    if let Err(e) = self.broker.delete(&[stream]).await {
      debug!(worker = %self.config.worker_id, error = %e, "Work stream already removed");
    }
  }

  async fn claim_fresh_items(&self, block: Duration) -> Result<Vec<WorkItem>, BrokerError> {
    let entries = self
      .broker
      .read_group(
        &self.keys.stream(),
        GROUP_NAME,
        &self.config.worker_id,
        self.config.test_batch_size,
        block,
      )
      .await?;
    Ok(entries.into_iter().map(|entry| self.work_item(entry)).collect())
  }

  async fn claim_stale_items(&self) -> Result<Vec<WorkItem>, BrokerError> {
    let stream = self.keys.stream();
    let worker = self.config.worker_id.as_str();
    let max_idle = self.max_idle();
    let threshold = self.jitter.apply(max_idle);

    let pending = self
      .broker
      .pending(&stream, GROUP_NAME, self.config.test_batch_size)
      .await?;
    if pending.is_empty() {
      return Ok(Vec::new());
    }

    let mut active_consumers: HashSet<String> = HashSet::from([worker.to_string()]);
    let (mut active, mut stale): (Vec<PendingEntry>, Vec<PendingEntry>) =
      pending.into_iter().partition(|entry| entry.idle < threshold);
    active_consumers.extend(active.iter().map(|entry| entry.consumer.clone()));

    // Pending entries alone do not show idle workers; ask the group.
    if active_consumers.len() == 1 {
      match self.broker.consumers(&stream, GROUP_NAME).await {
        Ok(consumers) => active_consumers.extend(
          consumers
            .into_iter()
            .filter(|consumer| consumer.idle < max_idle)
            .map(|consumer| consumer.name),
        ),
        Err(e) => debug!(worker = %worker, error = %e, "Could not list consumers"),
      }
    }

    // With other workers around, leave our own entries to them.
    let shared = active_consumers.len() > 1;
    if shared {
      stale.retain(|entry| entry.consumer != worker);
    }

    if let Some(entry) = stale.into_iter().next() {
      let items = self.claim(std::slice::from_ref(&entry), max_idle).await?;
      for item in &items {
        info!(
          worker = %worker,
          test = %item.identifier(),
          previous_owner = %entry.consumer,
          idle_ms = entry.idle.as_millis() as u64,
          "Reclaimed timed out test"
        );
      }
      record_reclaimed(&mut self.reclaimed_tests().timed_out, &items);
      return Ok(items);
    }

    if shared {
      active.retain(|entry| entry.consumer != worker);
    }
    if active.is_empty() {
      return Ok(Vec::new());
    }

    let attempt_ids: Vec<String> = active.iter().map(PendingEntry::attempt_id).collect();
    let removed = self
      .broker
      .remove_from_set(&self.keys.retry_set(), &attempt_ids)
      .await?;
    let retry: Vec<PendingEntry> = active
      .into_iter()
      .zip(removed)
      .filter_map(|(entry, removed)| removed.then_some(entry))
      .collect();

    let items = self.claim(&retry, Duration::ZERO).await?;
    for item in &items {
      debug!(worker = %worker, test = %item.identifier(), attempt = item.attempt(), "Reclaimed failed test for retry");
    }
    record_reclaimed(&mut self.reclaimed_tests().failed, &items);
    Ok(items)
  }

  /// Claims `entries` for this worker; each claimed item is the entry's next
  /// attempt.
  async fn claim(&self, entries: &[PendingEntry], min_idle: Duration) -> Result<Vec<WorkItem>, BrokerError> {
    if entries.is_empty() {
      return Ok(Vec::new());
    }
    let ids: Vec<String> = entries.iter().map(|entry| entry.entry_id.clone()).collect();
    let claimed = self
      .broker
      .claim(
        &self.keys.stream(),
        GROUP_NAME,
        &self.config.worker_id,
        min_idle,
        &ids,
      )
      .await?;

    Ok(
      claimed
        .into_iter()
        .map(|entry| {
          let attempt = entries
            .iter()
            .find(|pending| pending.entry_id == entry.id)
            .map_or(1, |pending| pending.delivery_count + 1);
          self.work_item(entry).at_attempt(attempt)
        })
        .collect(),
    )
  }

  /// Runs a batch, commits it, and returns the combined results after the
  /// batch was accounted for. `None` for an empty batch.
  async fn process_batch(
    &self,
    batch: Vec<WorkItem>,
    runner: &dyn Runner,
    reporter: &mut dyn Reporter,
  ) -> Result<Option<ResultAggregate>, BrokerError> {
    if batch.is_empty() {
      return Ok(None);
    }
    self.results().size += batch.len() as i64;

    for item in &batch {
      reporter.prerecord(item);
    }
    let outcomes = join_all(batch.iter().map(|item| execute(runner, item))).await;

    let stream = self.keys.stream();
    let retry_set = self.keys.retry_set();
    let ops: Vec<CommitOp> = batch
      .iter()
      .zip(&outcomes)
      .map(|(item, outcome)| match outcome.result_type() {
        ResultType::Requeued => CommitOp::AddToSet {
          key: retry_set.clone(),
          member: item.attempt_id(),
        },
        _ => CommitOp::Ack {
          stream: stream.clone(),
          group: GROUP_NAME.to_string(),
          entry_id: item.entry_id().to_string(),
        },
      })
      .collect();
    let acknowledged = self.broker.commit(&ops).await?;

    let results: Vec<CommittedResult> = batch
      .into_iter()
      .zip(outcomes)
      .zip(acknowledged)
      .map(|((item, outcome), acknowledged)| {
        CommittedResult::new(item, outcome, Commit::new(move || acknowledged))
      })
      .collect();

    let mut delta = ResultAggregate::default();
    for result in &results {
      reporter.record(result);
      delta.update_with_result(result);
      self.results().update_with_result(result);

      let result_type = result.result_type();
      match result_type {
        ResultType::Failed | ResultType::Error | ResultType::Skipped => {
          self
            .broker
            .push_to_list(&self.keys.list(result_type), result.work_item().identifier())
            .await?;
        }
        ResultType::Discarded => {
          warn!(
            worker = %self.config.worker_id,
            test = %result.work_item().identifier(),
            entry_id = %result.work_item().entry_id(),
            "Could not acknowledge test result, discarding it"
          );
        }
        ResultType::Passed | ResultType::Requeued => {}
      }
    }

    let combined = self.adjust_combined(&delta).await?;
    reporter.update(&combined);
    Ok(Some(combined))
  }
}

fn record_reclaimed(reclaimed: &mut Vec<String>, items: &[WorkItem]) {
  for item in items {
    if !reclaimed.iter().any(|identifier| identifier == item.identifier()) {
      reclaimed.push(item.identifier().to_string());
    }
  }
}

#[async_trait]
impl Coordinator for BrokerCoordinator {
  fn configuration(&self) -> &Configuration {
    &self.config
  }

  async fn produce(&self, selector: &dyn Selector) -> Result<(), CoordinatorError> {
    let reset_keys = [self.keys.key("size"), self.keys.key("acks")];
    let deleted = match self
      .broker
      .create_group_and_reset(&self.keys.stream(), GROUP_NAME, &reset_keys)
      .await
    {
      Ok(deleted) => deleted,
      Err(BrokerError::GroupExists) => {
        debug!(worker = %self.config.worker_id, run_id = %self.config.run_id, "Joining run as follower");
        return Ok(());
      }
      Err(e) => return Err(e.into()),
    };

    info!(worker = %self.config.worker_id, run_id = %self.config.run_id, "Elected leader");
    self.publish(selector, deleted == 0).await?;
    Ok(())
  }

  async fn consume(
    &self,
    runner: &dyn Runner,
    reporter: &mut dyn Reporter,
  ) -> Result<(), CoordinatorError> {
    match self.consume_loop(runner, reporter).await {
      Ok(()) => Ok(()),
      Err(BrokerError::NoGroup(reason)) => {
        debug!(worker = %self.config.worker_id, reason = %reason, "Run already finished by another worker");
        Ok(())
      }
      Err(e) => {
        warn!(worker = %self.config.worker_id, error = %e, "Leaving run after broker error");
        Err(e.into())
      }
    }
  }

  fn local_results(&self) -> ResultAggregate {
    self.results().clone()
  }

  async fn combined_results(&self) -> Result<ResultAggregate, CoordinatorError> {
    Ok(self.read_combined().await?)
  }

  fn aborted(&self) -> bool {
    self.aborted.load(Ordering::Acquire)
  }

  fn reclaimed(&self) -> ReclaimedTests {
    self.reclaimed_tests().clone()
  }
}
