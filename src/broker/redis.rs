//! Redis streams backend.
//!
//! Every run lives under its own key prefix, so the only server-side state a
//! worker needs is the URL. Multi-key operations go through `MULTI/EXEC`
//! pipelines; the leader election step is a Lua script because the counter
//! reset must only happen when the group creation succeeded.

use super::{Broker, CommitOp, ConsumerInfo, IDENTIFIER_FIELD, PendingEntry, StreamEntry};
use crate::error::BrokerError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
  StreamClaimReply, StreamId, StreamInfoConsumersReply, StreamPendingCountReply, StreamReadReply,
};
use redis::{Client, RedisError, Script};
use std::time::Duration;
use tracing::debug;

const REGISTER_CONSUMER_GROUP: &str = r"
redis.call('XGROUP', 'CREATE', KEYS[1], ARGV[1], '0', 'MKSTREAM')
local deleted = 0
for i = 2, #KEYS do
  deleted = deleted + redis.call('DEL', KEYS[i])
end
return deleted
";

fn has_code(error: &RedisError, code: &str) -> bool {
  error.code() == Some(code) || error.to_string().contains(code)
}

fn classify(error: RedisError) -> BrokerError {
  if has_code(&error, "BUSYGROUP") {
    BrokerError::GroupExists
  } else if has_code(&error, "NOGROUP") {
    BrokerError::NoGroup(error.to_string())
  } else {
    BrokerError::Redis(error)
  }
}

fn millis(duration: Duration) -> u64 {
  u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn stream_entry(id: StreamId) -> Result<StreamEntry, BrokerError> {
  let identifier: String = id.get(IDENTIFIER_FIELD).ok_or_else(|| {
    BrokerError::InvalidReply(format!("entry {} has no {IDENTIFIER_FIELD} field", id.id))
  })?;
  Ok(StreamEntry {
    id: id.id,
    identifier,
  })
}

/// A [`Broker`] backed by a Redis server (5.0 or later).
#[derive(Clone)]
pub struct RedisBroker {
  connection: ConnectionManager,
  register_group: Script,
}

impl RedisBroker {
  /// Connects to the server at `url` (`redis://` or `rediss://`).
  pub async fn connect(url: &str) -> Result<Self, BrokerError> {
    let client = Client::open(url).map_err(|e| BrokerError::Connection(e.to_string()))?;
    let connection = client
      .get_connection_manager()
      .await
      .map_err(|e| BrokerError::Connection(e.to_string()))?;
    debug!(url = %url, "Connected to Redis");
    Ok(Self::with_connection(connection))
  }

  /// Wraps an existing connection.
  pub fn with_connection(connection: ConnectionManager) -> Self {
    Self {
      connection,
      register_group: Script::new(REGISTER_CONSUMER_GROUP),
    }
  }
}

#[async_trait]
impl Broker for RedisBroker {
  async fn create_group_and_reset(
    &self,
    stream: &str,
    group: &str,
    reset_keys: &[String],
  ) -> Result<u64, BrokerError> {
    let mut connection = self.connection.clone();
    let mut invocation = self.register_group.prepare_invoke();
    invocation.key(stream);
    for key in reset_keys {
      invocation.key(key.as_str());
    }
    invocation.arg(group);
    invocation
      .invoke_async(&mut connection)
      .await
      .map_err(classify)
  }

  async fn append(&self, stream: &str, identifiers: &[String]) -> Result<Vec<String>, BrokerError> {
    if identifiers.is_empty() {
      return Ok(Vec::new());
    }
    let mut connection = self.connection.clone();
    let mut pipe = redis::pipe();
    for identifier in identifiers {
      pipe
        .cmd("XADD")
        .arg(stream)
        .arg("*")
        .arg(IDENTIFIER_FIELD)
        .arg(identifier);
    }
    pipe.query_async(&mut connection).await.map_err(classify)
  }

  async fn read_group(
    &self,
    stream: &str,
    group: &str,
    consumer: &str,
    count: usize,
    block: Duration,
  ) -> Result<Vec<StreamEntry>, BrokerError> {
    let mut connection = self.connection.clone();
    // BLOCK 0 waits forever.
    let block = millis(block).max(1);
    let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
      .arg("GROUP")
      .arg(group)
      .arg(consumer)
      .arg("COUNT")
      .arg(count)
      .arg("BLOCK")
      .arg(block)
      .arg("STREAMS")
      .arg(stream)
      .arg(">")
      .query_async(&mut connection)
      .await
      .map_err(classify)?;

    reply
      .into_iter()
      .flat_map(|reply| reply.keys)
      .flat_map(|key| key.ids)
      .map(stream_entry)
      .collect()
  }

  async fn pending(
    &self,
    stream: &str,
    group: &str,
    count: usize,
  ) -> Result<Vec<PendingEntry>, BrokerError> {
    let mut connection = self.connection.clone();
    let reply: StreamPendingCountReply = redis::cmd("XPENDING")
      .arg(stream)
      .arg(group)
      .arg("-")
      .arg("+")
      .arg(count)
      .query_async(&mut connection)
      .await
      .map_err(classify)?;

    Ok(
      reply
        .ids
        .into_iter()
        .map(|pending| PendingEntry {
          entry_id: pending.id,
          consumer: pending.consumer,
          idle: Duration::from_millis(pending.last_delivered_ms as u64),
          delivery_count: u32::try_from(pending.times_delivered).unwrap_or(u32::MAX),
        })
        .collect(),
    )
  }

  async fn consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>, BrokerError> {
    let mut connection = self.connection.clone();
    let reply: StreamInfoConsumersReply = redis::cmd("XINFO")
      .arg("CONSUMERS")
      .arg(stream)
      .arg(group)
      .query_async(&mut connection)
      .await
      .map_err(classify)?;

    Ok(
      reply
        .consumers
        .into_iter()
        .map(|consumer| ConsumerInfo {
          name: consumer.name,
          pending: consumer.pending as u64,
          idle: Duration::from_millis(consumer.idle as u64),
        })
        .collect(),
    )
  }

  async fn claim(
    &self,
    stream: &str,
    group: &str,
    consumer: &str,
    min_idle: Duration,
    ids: &[String],
  ) -> Result<Vec<StreamEntry>, BrokerError> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    let mut connection = self.connection.clone();
    let reply: StreamClaimReply = redis::cmd("XCLAIM")
      .arg(stream)
      .arg(group)
      .arg(consumer)
      .arg(millis(min_idle))
      .arg(ids)
      .query_async(&mut connection)
      .await
      .map_err(classify)?;

    reply.ids.into_iter().map(stream_entry).collect()
  }

  async fn remove_from_set(&self, key: &str, members: &[String]) -> Result<Vec<bool>, BrokerError> {
    if members.is_empty() {
      return Ok(Vec::new());
    }
    let mut connection = self.connection.clone();
    let mut pipe = redis::pipe();
    pipe.atomic();
    for member in members {
      pipe.cmd("SREM").arg(key).arg(member);
    }
    let removed: Vec<i64> = pipe.query_async(&mut connection).await.map_err(classify)?;
    Ok(removed.into_iter().map(|count| count > 0).collect())
  }

  async fn commit(&self, ops: &[CommitOp]) -> Result<Vec<bool>, BrokerError> {
    if ops.is_empty() {
      return Ok(Vec::new());
    }
    let mut connection = self.connection.clone();
    let mut pipe = redis::pipe();
    pipe.atomic();
    for op in ops {
      match op {
        CommitOp::Ack {
          stream,
          group,
          entry_id,
        } => {
          pipe.cmd("XACK").arg(stream).arg(group).arg(entry_id);
        }
        CommitOp::AddToSet { key, member } => {
          pipe.cmd("SADD").arg(key).arg(member);
        }
      }
    }
    let replies: Vec<i64> = pipe.query_async(&mut connection).await.map_err(classify)?;
    Ok(replies.into_iter().map(|count| count > 0).collect())
  }

  async fn push_to_list(&self, key: &str, value: &str) -> Result<(), BrokerError> {
    let mut connection = self.connection.clone();
    redis::cmd("LPUSH")
      .arg(key)
      .arg(value)
      .query_async::<_, i64>(&mut connection)
      .await
      .map_err(classify)?;
    Ok(())
  }

  async fn take_lists(&self, keys: &[String]) -> Result<Vec<Vec<String>>, BrokerError> {
    if keys.is_empty() {
      return Ok(Vec::new());
    }
    let mut connection = self.connection.clone();
    let mut pipe = redis::pipe();
    pipe.atomic();
    for key in keys {
      pipe.cmd("LRANGE").arg(key).arg(0).arg(-1);
    }
    pipe.cmd("DEL").arg(keys).ignore();
    pipe.query_async(&mut connection).await.map_err(classify)
  }

  async fn increment_counters(&self, deltas: &[(String, i64)]) -> Result<Vec<i64>, BrokerError> {
    if deltas.is_empty() {
      return Ok(Vec::new());
    }
    let mut connection = self.connection.clone();
    let mut pipe = redis::pipe();
    pipe.atomic();
    for (key, delta) in deltas {
      pipe.cmd("INCRBY").arg(key).arg(*delta);
    }
    pipe.query_async(&mut connection).await.map_err(classify)
  }

  async fn read_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>, BrokerError> {
    if keys.is_empty() {
      return Ok(Vec::new());
    }
    let mut connection = self.connection.clone();
    redis::cmd("MGET")
      .arg(keys)
      .query_async(&mut connection)
      .await
      .map_err(classify)
  }

  async fn destroy_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
    let mut connection = self.connection.clone();
    redis::cmd("XGROUP")
      .arg("DESTROY")
      .arg(stream)
      .arg(group)
      .query_async::<_, i64>(&mut connection)
      .await
      .map_err(classify)?;
    Ok(())
  }

  async fn delete(&self, keys: &[String]) -> Result<(), BrokerError> {
    if keys.is_empty() {
      return Ok(());
    }
    let mut connection = self.connection.clone();
    redis::cmd("DEL")
      .arg(keys)
      .query_async::<_, i64>(&mut connection)
      .await
      .map_err(classify)?;
    Ok(())
  }
}
