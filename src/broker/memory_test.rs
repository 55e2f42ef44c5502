//! # In-Memory Broker Test Suite
//!
//! Exercises the stream, consumer-group, set, list and counter semantics the
//! coordinator relies on. Idle-time tests run on a paused clock.

use super::{Broker, CommitOp, InMemoryBroker};
use crate::error::BrokerError;
use std::sync::Arc;
use std::time::Duration;

const STREAM: &str = "run/queue";
const GROUP: &str = "group";

fn ids(identifiers: &[&str]) -> Vec<String> {
  identifiers.iter().map(|s| s.to_string()).collect()
}

async fn broker_with(identifiers: &[&str]) -> InMemoryBroker {
  let broker = InMemoryBroker::new();
  broker.create_group_and_reset(STREAM, GROUP, &[]).await.unwrap();
  broker.append(STREAM, &ids(identifiers)).await.unwrap();
  broker
}

#[tokio::test]
async fn test_create_group_elects_once() {
  let broker = InMemoryBroker::new();
  let reset = ids(&["run/size", "run/acks"]);

  assert_eq!(broker.create_group_and_reset(STREAM, GROUP, &reset).await.unwrap(), 0);
  assert!(matches!(
    broker.create_group_and_reset(STREAM, GROUP, &reset).await,
    Err(BrokerError::GroupExists)
  ));
}

#[tokio::test]
async fn test_create_group_resets_only_when_created() {
  let broker = InMemoryBroker::new();
  let reset = ids(&["run/size", "run/acks"]);
  broker
    .increment_counters(&[("run/size".to_string(), 5), ("run/acks".to_string(), 5)])
    .await
    .unwrap();

  broker.create_group_and_reset(STREAM, GROUP, &[]).await.unwrap();
  let _ = broker.create_group_and_reset(STREAM, GROUP, &reset).await;
  assert_eq!(
    broker.read_counters(&reset).await.unwrap(),
    vec![Some(5), Some(5)]
  );

  broker.destroy_group(STREAM, GROUP).await.unwrap();
  assert_eq!(broker.create_group_and_reset(STREAM, GROUP, &reset).await.unwrap(), 2);
  assert_eq!(broker.read_counters(&reset).await.unwrap(), vec![None, None]);
}

#[tokio::test]
async fn test_read_group_delivers_each_entry_once() {
  let broker = broker_with(&["a", "b", "c"]).await;

  let first = broker
    .read_group(STREAM, GROUP, "w1", 2, Duration::ZERO)
    .await
    .unwrap();
  let second = broker
    .read_group(STREAM, GROUP, "w2", 2, Duration::ZERO)
    .await
    .unwrap();
  let third = broker
    .read_group(STREAM, GROUP, "w1", 2, Duration::ZERO)
    .await
    .unwrap();

  let identifiers: Vec<&str> = first.iter().map(|e| e.identifier.as_str()).collect();
  assert_eq!(identifiers, vec!["a", "b"]);
  assert_eq!(second.len(), 1);
  assert_eq!(second[0].identifier, "c");
  assert!(third.is_empty());
}

#[tokio::test]
async fn test_read_group_without_group() {
  let broker = InMemoryBroker::new();
  let err = broker
    .read_group(STREAM, GROUP, "w1", 1, Duration::ZERO)
    .await
    .unwrap_err();
  assert!(err.is_no_group());
}

#[tokio::test(start_paused = true)]
async fn test_read_group_blocks_until_timeout() {
  let broker = broker_with(&[]).await;
  let started = tokio::time::Instant::now();
  let entries = broker
    .read_group(STREAM, GROUP, "w1", 1, Duration::from_millis(500))
    .await
    .unwrap();
  assert!(entries.is_empty());
  assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_read_group_wakes_on_append() {
  let broker = Arc::new(broker_with(&[]).await);
  let reader = {
    let broker = Arc::clone(&broker);
    tokio::spawn(async move {
      broker
        .read_group(STREAM, GROUP, "w1", 1, Duration::from_secs(60))
        .await
    })
  };

  tokio::time::sleep(Duration::from_secs(1)).await;
  broker.append(STREAM, &ids(&["late"])).await.unwrap();

  let entries = reader.await.unwrap().unwrap();
  assert_eq!(entries.len(), 1);
  assert_eq!(entries[0].identifier, "late");
}

#[tokio::test(start_paused = true)]
async fn test_pending_tracks_idle_and_deliveries() {
  let broker = broker_with(&["a"]).await;
  let entry = broker
    .read_group(STREAM, GROUP, "w1", 1, Duration::ZERO)
    .await
    .unwrap()
    .remove(0);

  tokio::time::advance(Duration::from_secs(10)).await;
  let pending = broker.pending(STREAM, GROUP, 10).await.unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].entry_id, entry.id);
  assert_eq!(pending[0].consumer, "w1");
  assert_eq!(pending[0].delivery_count, 1);
  assert!(pending[0].idle >= Duration::from_secs(10));
  assert_eq!(pending[0].attempt_id(), format!("{}/1", entry.id));
}

#[tokio::test(start_paused = true)]
async fn test_claim_respects_min_idle() {
  let broker = broker_with(&["a"]).await;
  let entry = broker
    .read_group(STREAM, GROUP, "w1", 1, Duration::ZERO)
    .await
    .unwrap()
    .remove(0);
  let entry_ids = vec![entry.id.clone()];

  tokio::time::advance(Duration::from_secs(5)).await;
  let claimed = broker
    .claim(STREAM, GROUP, "w2", Duration::from_secs(10), &entry_ids)
    .await
    .unwrap();
  assert!(claimed.is_empty());

  tokio::time::advance(Duration::from_secs(5)).await;
  let claimed = broker
    .claim(STREAM, GROUP, "w2", Duration::from_secs(10), &entry_ids)
    .await
    .unwrap();
  assert_eq!(claimed.len(), 1);
  assert_eq!(claimed[0].identifier, "a");

  let pending = broker.pending(STREAM, GROUP, 10).await.unwrap();
  assert_eq!(pending[0].consumer, "w2");
  assert_eq!(pending[0].delivery_count, 2);
  assert_eq!(pending[0].idle, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_consumers_report_idle_time() {
  let broker = broker_with(&["a", "b"]).await;
  broker
    .read_group(STREAM, GROUP, "w1", 1, Duration::ZERO)
    .await
    .unwrap();
  tokio::time::advance(Duration::from_secs(3)).await;
  broker
    .read_group(STREAM, GROUP, "w2", 1, Duration::ZERO)
    .await
    .unwrap();

  let consumers = broker.consumers(STREAM, GROUP).await.unwrap();
  assert_eq!(consumers.len(), 2);
  assert_eq!(consumers[0].name, "w1");
  assert_eq!(consumers[0].pending, 1);
  assert!(consumers[0].idle >= Duration::from_secs(3));
  assert_eq!(consumers[1].name, "w2");
  assert_eq!(consumers[1].idle, Duration::ZERO);
}

#[tokio::test]
async fn test_commit_acks_and_adds() {
  let broker = broker_with(&["a"]).await;
  let entry = broker
    .read_group(STREAM, GROUP, "w1", 1, Duration::ZERO)
    .await
    .unwrap()
    .remove(0);

  let ops = vec![
    CommitOp::Ack {
      stream: STREAM.to_string(),
      group: GROUP.to_string(),
      entry_id: entry.id.clone(),
    },
    CommitOp::AddToSet {
      key: "run/retry_set".to_string(),
      member: "x/1".to_string(),
    },
  ];
  assert_eq!(broker.commit(&ops).await.unwrap(), vec![true, true]);
  assert_eq!(broker.commit(&ops).await.unwrap(), vec![false, false]);
  assert!(broker.pending(STREAM, GROUP, 10).await.unwrap().is_empty());
  assert_eq!(broker.set_members("run/retry_set"), vec!["x/1".to_string()]);
}

#[tokio::test]
async fn test_remove_from_set_reports_each_member() {
  let broker = InMemoryBroker::new();
  broker
    .commit(&[CommitOp::AddToSet {
      key: "set".to_string(),
      member: "a".to_string(),
    }])
    .await
    .unwrap();

  let removed = broker.remove_from_set("set", &ids(&["a", "b"])).await.unwrap();
  assert_eq!(removed, vec![true, false]);
  assert!(!broker.exists("set"));
}

#[tokio::test]
async fn test_lists_and_counters() {
  let broker = InMemoryBroker::new();
  broker.push_to_list("failed", "a").await.unwrap();
  broker.push_to_list("failed", "b").await.unwrap();
  assert_eq!(broker.list("failed"), ids(&["b", "a"]));

  let lists = broker.take_lists(&ids(&["failed", "error"])).await.unwrap();
  assert_eq!(lists, vec![ids(&["b", "a"]), Vec::new()]);
  assert!(!broker.exists("failed"));

  let values = broker
    .increment_counters(&[("runs".to_string(), 3), ("failures".to_string(), -1)])
    .await
    .unwrap();
  assert_eq!(values, vec![3, -1]);
  assert_eq!(
    broker.read_counters(&ids(&["runs", "missing"])).await.unwrap(),
    vec![Some(3), None]
  );
}

#[tokio::test]
async fn test_destroy_and_delete() {
  let broker = broker_with(&["a"]).await;
  assert_eq!(broker.stream_len(STREAM), 1);

  broker.destroy_group(STREAM, GROUP).await.unwrap();
  assert!(
    broker
      .pending(STREAM, GROUP, 1)
      .await
      .unwrap_err()
      .is_no_group()
  );

  broker.delete(&[STREAM.to_string()]).await.unwrap();
  assert!(!broker.exists(STREAM));
  assert!(broker.destroy_group(STREAM, GROUP).await.is_err());
}
