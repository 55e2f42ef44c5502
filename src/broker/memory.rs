//! In-process broker with the same stream and consumer-group semantics as
//! Redis.
//!
//! Idle times are measured with [`tokio::time::Instant`], so tests running on
//! a paused clock can advance time deterministically.

use super::{Broker, CommitOp, ConsumerInfo, PendingEntry, StreamEntry};
use crate::error::BrokerError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct Delivery {
  consumer: String,
  delivered_at: Instant,
  delivery_count: u32,
}

#[derive(Debug, Default)]
struct ConsumerGroup {
  last_delivered: u64,
  pending: BTreeMap<u64, Delivery>,
  consumers: HashMap<String, Instant>,
}

impl ConsumerGroup {
  fn touch(&mut self, consumer: &str, now: Instant) {
    self.consumers.insert(consumer.to_string(), now);
  }
}

#[derive(Debug, Default)]
struct MemoryStream {
  entries: BTreeMap<u64, String>,
  next_sequence: u64,
  groups: HashMap<String, ConsumerGroup>,
}

impl MemoryStream {
  fn group_mut(&mut self, stream: &str, group: &str) -> Result<&mut ConsumerGroup, BrokerError> {
    self
      .groups
      .get_mut(group)
      .ok_or_else(|| no_group(stream, group))
  }
}

#[derive(Debug, Default)]
struct State {
  streams: HashMap<String, MemoryStream>,
  sets: HashMap<String, HashSet<String>>,
  lists: HashMap<String, Vec<String>>,
  counters: HashMap<String, i64>,
}

impl State {
  fn stream_mut(&mut self, stream: &str, group: &str) -> Result<&mut MemoryStream, BrokerError> {
    self
      .streams
      .get_mut(stream)
      .ok_or_else(|| no_group(stream, group))
  }

  fn delete(&mut self, key: &str) -> bool {
    let stream = self.streams.remove(key).is_some();
    let set = self.sets.remove(key).is_some();
    let list = self.lists.remove(key).is_some();
    let counter = self.counters.remove(key).is_some();
    stream || set || list || counter
  }
}

fn no_group(stream: &str, group: &str) -> BrokerError {
  BrokerError::NoGroup(format!("no consumer group '{group}' for key '{stream}'"))
}

fn format_id(sequence: u64) -> String {
  format!("{sequence}-0")
}

fn parse_id(id: &str) -> Option<u64> {
  id.split_once('-').map_or(id, |(sequence, _)| sequence).parse().ok()
}

/// A [`Broker`] that lives in process memory.
///
/// Cheap to share through an `Arc`; several coordinators holding the same
/// instance behave like workers attached to one Redis server.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
  state: Mutex<State>,
  appended: Notify,
}

impl InMemoryBroker {
  /// Creates an empty broker.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// True when `key` holds a value of any type.
  #[must_use]
  pub fn exists(&self, key: &str) -> bool {
    let state = self.state();
    state.streams.contains_key(key)
      || state.sets.contains_key(key)
      || state.lists.contains_key(key)
      || state.counters.contains_key(key)
  }

  /// Members of a set, sorted.
  #[must_use]
  pub fn set_members(&self, key: &str) -> Vec<String> {
    let mut members: Vec<String> = self
      .state()
      .sets
      .get(key)
      .map(|set| set.iter().cloned().collect())
      .unwrap_or_default();
    members.sort();
    members
  }

  /// Contents of a list, most recently pushed first.
  #[must_use]
  pub fn list(&self, key: &str) -> Vec<String> {
    self.state().lists.get(key).cloned().unwrap_or_default()
  }

  /// Number of entries in a stream.
  #[must_use]
  pub fn stream_len(&self, stream: &str) -> usize {
    self
      .state()
      .streams
      .get(stream)
      .map_or(0, |stream| stream.entries.len())
  }

  fn try_read(
    &self,
    stream: &str,
    group: &str,
    consumer: &str,
    count: usize,
  ) -> Result<Vec<StreamEntry>, BrokerError> {
    let now = Instant::now();
    let mut state = self.state();
    let memory = state.stream_mut(stream, group)?;
    let MemoryStream { entries, groups, .. } = memory;
    let consumer_group = groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;
    consumer_group.touch(consumer, now);

    let fresh: Vec<(u64, String)> = entries
      .range(consumer_group.last_delivered.saturating_add(1)..)
      .take(count)
      .map(|(sequence, identifier)| (*sequence, identifier.clone()))
      .collect();

    let mut delivered = Vec::with_capacity(fresh.len());
    for (sequence, identifier) in fresh {
      consumer_group.last_delivered = sequence;
      consumer_group.pending.insert(
        sequence,
        Delivery {
          consumer: consumer.to_string(),
          delivered_at: now,
          delivery_count: 1,
        },
      );
      delivered.push(StreamEntry {
        id: format_id(sequence),
        identifier,
      });
    }
    Ok(delivered)
  }
}

#[async_trait]
impl Broker for InMemoryBroker {
  async fn create_group_and_reset(
    &self,
    stream: &str,
    group: &str,
    reset_keys: &[String],
  ) -> Result<u64, BrokerError> {
    let mut state = self.state();
    let memory = state.streams.entry(stream.to_string()).or_default();
    if memory.groups.contains_key(group) {
      return Err(BrokerError::GroupExists);
    }
    memory.groups.insert(group.to_string(), ConsumerGroup::default());

    let deleted = reset_keys.iter().filter(|key| state.delete(key)).count();
    Ok(deleted as u64)
  }

  async fn append(&self, stream: &str, identifiers: &[String]) -> Result<Vec<String>, BrokerError> {
    let ids = {
      let mut state = self.state();
      let memory = state.streams.entry(stream.to_string()).or_default();
      identifiers
        .iter()
        .map(|identifier| {
          memory.next_sequence += 1;
          memory.entries.insert(memory.next_sequence, identifier.clone());
          format_id(memory.next_sequence)
        })
        .collect()
    };
    self.appended.notify_waiters();
    Ok(ids)
  }

  async fn read_group(
    &self,
    stream: &str,
    group: &str,
    consumer: &str,
    count: usize,
    block: Duration,
  ) -> Result<Vec<StreamEntry>, BrokerError> {
    let deadline = Instant::now() + block;
    loop {
      let notified = self.appended.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      let delivered = self.try_read(stream, group, consumer, count)?;
      if !delivered.is_empty() || block.is_zero() {
        return Ok(delivered);
      }
      if tokio::time::timeout_at(deadline, notified).await.is_err() {
        return Ok(Vec::new());
      }
    }
  }

  async fn pending(
    &self,
    stream: &str,
    group: &str,
    count: usize,
  ) -> Result<Vec<PendingEntry>, BrokerError> {
    let now = Instant::now();
    let mut state = self.state();
    let consumer_group = state.stream_mut(stream, group)?.group_mut(stream, group)?;
    Ok(
      consumer_group
        .pending
        .iter()
        .take(count)
        .map(|(sequence, delivery)| PendingEntry {
          entry_id: format_id(*sequence),
          consumer: delivery.consumer.clone(),
          idle: now.saturating_duration_since(delivery.delivered_at),
          delivery_count: delivery.delivery_count,
        })
        .collect(),
    )
  }

  async fn consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>, BrokerError> {
    let now = Instant::now();
    let mut state = self.state();
    let consumer_group = state.stream_mut(stream, group)?.group_mut(stream, group)?;
    let mut consumers: Vec<ConsumerInfo> = consumer_group
      .consumers
      .iter()
      .map(|(name, seen)| ConsumerInfo {
        name: name.clone(),
        pending: consumer_group
          .pending
          .values()
          .filter(|delivery| &delivery.consumer == name)
          .count() as u64,
        idle: now.saturating_duration_since(*seen),
      })
      .collect();
    consumers.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(consumers)
  }

  async fn claim(
    &self,
    stream: &str,
    group: &str,
    consumer: &str,
    min_idle: Duration,
    ids: &[String],
  ) -> Result<Vec<StreamEntry>, BrokerError> {
    let now = Instant::now();
    let mut state = self.state();
    let memory = state.stream_mut(stream, group)?;
    let MemoryStream { entries, groups, .. } = memory;
    let consumer_group = groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;
    consumer_group.touch(consumer, now);

    let mut claimed = Vec::new();
    for sequence in ids.iter().filter_map(|id| parse_id(id)) {
      let Some(identifier) = entries.get(&sequence) else {
        consumer_group.pending.remove(&sequence);
        continue;
      };
      let Some(delivery) = consumer_group.pending.get_mut(&sequence) else {
        continue;
      };
      if now.saturating_duration_since(delivery.delivered_at) < min_idle {
        continue;
      }
      delivery.consumer = consumer.to_string();
      delivery.delivered_at = now;
      delivery.delivery_count += 1;
      claimed.push(StreamEntry {
        id: format_id(sequence),
        identifier: identifier.clone(),
      });
    }
    Ok(claimed)
  }

  async fn remove_from_set(&self, key: &str, members: &[String]) -> Result<Vec<bool>, BrokerError> {
    let mut state = self.state();
    let removed = match state.sets.get_mut(key) {
      Some(set) => members.iter().map(|member| set.remove(member)).collect(),
      None => vec![false; members.len()],
    };
    if state.sets.get(key).is_some_and(HashSet::is_empty) {
      state.sets.remove(key);
    }
    Ok(removed)
  }

  async fn commit(&self, ops: &[CommitOp]) -> Result<Vec<bool>, BrokerError> {
    let mut state = self.state();

    // Validate first so a failing batch leaves nothing half-applied.
    for op in ops {
      if let CommitOp::Ack { stream, group, .. } = op {
        if let Some(memory) = state.streams.get(stream) {
          if !memory.groups.contains_key(group) {
            return Err(no_group(stream, group));
          }
        }
      }
    }

    let mut applied = Vec::with_capacity(ops.len());
    for op in ops {
      let took_effect = match op {
        CommitOp::Ack {
          stream,
          group,
          entry_id,
        } => state
          .streams
          .get_mut(stream)
          .and_then(|memory| memory.groups.get_mut(group))
          .zip(parse_id(entry_id))
          .is_some_and(|(consumer_group, sequence)| {
            consumer_group.pending.remove(&sequence).is_some()
          }),
        CommitOp::AddToSet { key, member } => state
          .sets
          .entry(key.clone())
          .or_default()
          .insert(member.clone()),
      };
      applied.push(took_effect);
    }
    Ok(applied)
  }

  async fn push_to_list(&self, key: &str, value: &str) -> Result<(), BrokerError> {
    self
      .state()
      .lists
      .entry(key.to_string())
      .or_default()
      .insert(0, value.to_string());
    Ok(())
  }

  async fn take_lists(&self, keys: &[String]) -> Result<Vec<Vec<String>>, BrokerError> {
    let mut state = self.state();
    Ok(
      keys
        .iter()
        .map(|key| state.lists.remove(key).unwrap_or_default())
        .collect(),
    )
  }

  async fn increment_counters(&self, deltas: &[(String, i64)]) -> Result<Vec<i64>, BrokerError> {
    let mut state = self.state();
    Ok(
      deltas
        .iter()
        .map(|(key, delta)| {
          let counter = state.counters.entry(key.clone()).or_insert(0);
          *counter += delta;
          *counter
        })
        .collect(),
    )
  }

  async fn read_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>, BrokerError> {
    let state = self.state();
    Ok(keys.iter().map(|key| state.counters.get(key).copied()).collect())
  }

  async fn destroy_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
    {
      let mut state = self.state();
      let memory = state.stream_mut(stream, group)?;
      memory.groups.remove(group);
    }
    self.appended.notify_waiters();
    Ok(())
  }

  async fn delete(&self, keys: &[String]) -> Result<(), BrokerError> {
    {
      let mut state = self.state();
      for key in keys {
        state.delete(key);
      }
    }
    self.appended.notify_waiters();
    Ok(())
  }
}
