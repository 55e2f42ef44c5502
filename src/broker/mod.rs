//! # Broker
//!
//! The broker protocol surface the distributed coordinator is built on.
//!
//! All coordination between workers goes through a [`Broker`]: an
//! append-only stream acting as the work queue, a consumer group tracking
//! which worker holds which entry, a set used as the fast-retry index, lists
//! of non-passing identifiers, and integer counters. Every operation takes
//! fully qualified key names, so one broker can serve many runs.
//!
//! ## Implementations
//!
//! - [`RedisBroker`]: Redis streams and consumer groups, `MULTI/EXEC`
//!   pipelines and a Lua script for the leader election step.
//! - [`InMemoryBroker`]: the same semantics inside one process, for tests
//!   and for running several workers as tasks.

pub mod memory;
pub mod redis;

pub use memory::InMemoryBroker;
pub use self::redis::RedisBroker;

use crate::error::BrokerError;
use async_trait::async_trait;
use std::time::Duration;

/// Stream field holding the test identifier.
pub const IDENTIFIER_FIELD: &str = "identifier";

/// One entry delivered from the work stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
  /// Broker-assigned entry id.
  pub id: String,
  /// The test identifier carried by the entry.
  pub identifier: String,
}

/// An entry delivered to a consumer but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
  /// Entry id.
  pub entry_id: String,
  /// Consumer currently owning the entry.
  pub consumer: String,
  /// Time since the entry was last delivered.
  pub idle: Duration,
  /// How many times the entry has been delivered.
  pub delivery_count: u32,
}

impl PendingEntry {
  /// The attempt currently running for this entry: `"<entry_id>/<count>"`.
  #[must_use]
  pub fn attempt_id(&self) -> String {
    format!("{}/{}", self.entry_id, self.delivery_count)
  }
}

/// A member of a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
  /// Consumer name (the worker id).
  pub name: String,
  /// Entries it currently holds.
  pub pending: u64,
  /// Time since it last interacted with the group.
  pub idle: Duration,
}

/// One operation of an atomic batch commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOp {
  /// Acknowledge an entry, removing it from the group's pending list.
  Ack {
    /// Stream key.
    stream: String,
    /// Consumer group.
    group: String,
    /// Entry to acknowledge.
    entry_id: String,
  },
  /// Add a member to a set.
  AddToSet {
    /// Set key.
    key: String,
    /// Member to add.
    member: String,
  },
}

/// Broker operations used by the distributed coordinator.
///
/// Multi-key operations documented as atomic must apply all-or-nothing with
/// respect to other workers.
#[async_trait]
pub trait Broker: Send + Sync {
  /// Creates `group` on `stream` (creating the stream if needed) and, only if
  /// that succeeded, deletes `reset_keys`, as one atomic step.
  ///
  /// Returns how many of `reset_keys` existed. Fails with
  /// [`BrokerError::GroupExists`] when the group was already there, in which
  /// case nothing is deleted.
  async fn create_group_and_reset(
    &self,
    stream: &str,
    group: &str,
    reset_keys: &[String],
  ) -> Result<u64, BrokerError>;

  /// Appends one entry per identifier and returns the new entry ids.
  async fn append(&self, stream: &str, identifiers: &[String]) -> Result<Vec<String>, BrokerError>;

  /// Reads up to `count` entries never delivered to any member of `group`,
  /// waiting up to `block` for at least one to arrive.
  async fn read_group(
    &self,
    stream: &str,
    group: &str,
    consumer: &str,
    count: usize,
    block: Duration,
  ) -> Result<Vec<StreamEntry>, BrokerError>;

  /// Lists up to `count` pending entries of `group`, oldest first.
  async fn pending(
    &self,
    stream: &str,
    group: &str,
    count: usize,
  ) -> Result<Vec<PendingEntry>, BrokerError>;

  /// Lists the members of `group`.
  async fn consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>, BrokerError>;

  /// Transfers ownership of the given pending entries to `consumer`, for
  /// those idle for at least `min_idle`. Returns the entries claimed.
  async fn claim(
    &self,
    stream: &str,
    group: &str,
    consumer: &str,
    min_idle: Duration,
    ids: &[String],
  ) -> Result<Vec<StreamEntry>, BrokerError>;

  /// Removes each member from the set, reporting per member whether it was
  /// present. Atomic.
  async fn remove_from_set(&self, key: &str, members: &[String]) -> Result<Vec<bool>, BrokerError>;

  /// Applies a batch of acknowledgments and set insertions. Atomic. Reports
  /// per operation whether it took effect.
  async fn commit(&self, ops: &[CommitOp]) -> Result<Vec<bool>, BrokerError>;

  /// Prepends a value to a list.
  async fn push_to_list(&self, key: &str, value: &str) -> Result<(), BrokerError>;

  /// Reads and deletes each list. Atomic.
  async fn take_lists(&self, keys: &[String]) -> Result<Vec<Vec<String>>, BrokerError>;

  /// Adds each delta to its counter and returns the new values. Atomic.
  async fn increment_counters(&self, deltas: &[(String, i64)]) -> Result<Vec<i64>, BrokerError>;

  /// Reads counters; absent counters read as `None`.
  async fn read_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>, BrokerError>;

  /// Destroys a consumer group.
  async fn destroy_group(&self, stream: &str, group: &str) -> Result<(), BrokerError>;

  /// Deletes keys of any type.
  async fn delete(&self, keys: &[String]) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod memory_test;
