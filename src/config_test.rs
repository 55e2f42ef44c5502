//! Tests for configuration loading.

use crate::config::{Configuration, CoordinatorUri};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
  pairs
    .iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect()
}

#[test]
fn test_defaults() {
  let config = Configuration::from_env(&HashMap::new()).unwrap();
  assert_eq!(config.coordinator, CoordinatorUri::Memory);
  assert_eq!(config.test_timeout_seconds, 30.0);
  assert_eq!(config.test_batch_size, 10);
  assert_eq!(config.max_attempts, 1);
  assert_eq!(config.max_failures, None);
  assert!(config.retry_failures);
  assert!(!config.progress);
  assert!(uuid::Uuid::parse_str(&config.run_id).is_ok());
  assert_ne!(config.run_id, config.worker_id);
}

#[test]
fn test_from_env() {
  let config = Configuration::from_env(&env(&[
    ("TESTWEAVE_COORDINATOR", "redis://localhost:6379/1"),
    ("TESTWEAVE_RUN_ID", "build-42"),
    ("TESTWEAVE_WORKER_ID", "worker-3"),
    ("TESTWEAVE_TEST_TIMEOUT_SECONDS", "2.5"),
    ("TESTWEAVE_TEST_BATCH_SIZE", "4"),
    ("TESTWEAVE_MAX_ATTEMPTS", "3"),
    ("TESTWEAVE_MAX_FAILURES", "10"),
    ("TESTWEAVE_RETRY_FAILURES", "false"),
    ("TESTWEAVE_PROGRESS", "1"),
    ("TESTWEAVE_SHUFFLE_SEED", "1234"),
    ("TESTWEAVE_INCLUDE_FILE", "include.txt"),
  ]))
  .unwrap();

  assert_eq!(
    config.coordinator,
    CoordinatorUri::Redis("redis://localhost:6379/1".to_string())
  );
  assert_eq!(config.run_id, "build-42");
  assert_eq!(config.worker_id, "worker-3");
  assert_eq!(config.test_timeout_seconds, 2.5);
  assert_eq!(config.test_batch_size, 4);
  assert_eq!(config.max_attempts, 3);
  assert_eq!(config.max_failures, Some(10));
  assert!(!config.retry_failures);
  assert!(config.progress);
  assert_eq!(config.shuffle_seed, Some(1234));
  assert_eq!(config.include_file, Some(PathBuf::from("include.txt")));
  assert_eq!(config.exclude_file, None);
}

#[test]
fn test_empty_values_use_defaults() {
  let config = Configuration::from_env(&env(&[
    ("TESTWEAVE_RUN_ID", ""),
    ("TESTWEAVE_MAX_FAILURES", "  "),
  ]))
  .unwrap();
  assert!(!config.run_id.is_empty());
  assert_eq!(config.max_failures, None);
}

#[test]
fn test_invalid_values() {
  let err = Configuration::from_env(&env(&[("TESTWEAVE_TEST_BATCH_SIZE", "many")])).unwrap_err();
  assert_eq!(
    err,
    ConfigError::InvalidValue {
      key: "TESTWEAVE_TEST_BATCH_SIZE".to_string(),
      value: "many".to_string(),
    }
  );

  assert!(Configuration::from_env(&env(&[("TESTWEAVE_TEST_BATCH_SIZE", "0")])).is_err());
  assert!(Configuration::from_env(&env(&[("TESTWEAVE_MAX_ATTEMPTS", "0")])).is_err());
  assert!(Configuration::from_env(&env(&[("TESTWEAVE_TEST_TIMEOUT_SECONDS", "-1")])).is_err());
  assert!(Configuration::from_env(&env(&[("TESTWEAVE_RETRY_FAILURES", "maybe")])).is_err());
}

#[test]
fn test_coordinator_uri() {
  assert_eq!("memory:".parse::<CoordinatorUri>(), Ok(CoordinatorUri::Memory));
  assert_eq!(
    "rediss://cache:6380".parse::<CoordinatorUri>(),
    Ok(CoordinatorUri::Redis("rediss://cache:6380".to_string()))
  );
  assert_eq!(
    "kafka://broker".parse::<CoordinatorUri>(),
    Err(ConfigError::UnknownCoordinator("kafka".to_string()))
  );
  assert_eq!(CoordinatorUri::Memory.to_string(), "memory:");
}

#[test]
fn test_builders() {
  let config = Configuration::new()
    .with_run_id("run")
    .with_worker_id("worker")
    .with_test_timeout_seconds(1.0)
    .with_test_batch_size(2)
    .with_max_attempts(3)
    .with_max_failures(Some(4))
    .with_retry_failures(false)
    .with_shuffle_seed(Some(5));

  assert_eq!(config.run_id, "run");
  assert_eq!(config.worker_id, "worker");
  assert_eq!(config.test_timeout_seconds, 1.0);
  assert_eq!(config.test_batch_size, 2);
  assert_eq!(config.max_attempts, 3);
  assert_eq!(config.max_failures, Some(4));
  assert!(!config.retry_failures);
  assert_eq!(config.shuffle_seed, Some(5));
}

#[test]
fn test_test_selector_applies_files() {
  let mut exclude = tempfile::NamedTempFile::new().unwrap();
  writeln!(exclude, "Suite#test_b").unwrap();
  let config = Configuration::new().with_exclude_file(exclude.path());

  let selector = config
    .test_selector(vec!["Suite#test_a".to_string(), "Suite#test_b".to_string()])
    .unwrap();
  assert_eq!(crate::selector::Selector::tests(&selector), vec!["Suite#test_a".to_string()]);
}

#[test]
fn test_test_selector_missing_file() {
  let config = Configuration::new().with_include_file("/nonexistent/testweave/list.txt");
  assert!(matches!(
    config.test_selector(Vec::new()),
    Err(ConfigError::TestList { .. })
  ));
}

#[tokio::test]
async fn test_memory_coordinator() {
  let config = Configuration::new();
  let coordinator = config.coordinator().await.unwrap();
  assert_eq!(coordinator.configuration(), &config);
  assert!(!coordinator.aborted());
}

#[test]
fn test_validate_rejects_unusable_timing() {
  assert!(Configuration::new().validate().is_ok());
  for timeout in [f64::NAN, -1.0, 0.0, f64::INFINITY, f64::MAX] {
    assert!(matches!(
      Configuration::new().with_test_timeout_seconds(timeout).validate(),
      Err(ConfigError::InvalidValue { ref key, .. }) if key == "TESTWEAVE_TEST_TIMEOUT_SECONDS"
    ));
  }
  assert!(Configuration::new().with_test_batch_size(0).validate().is_err());
  assert!(Configuration::new().with_max_attempts(0).validate().is_err());
}

#[tokio::test]
async fn test_memory_coordinator_rejects_invalid_timeout() {
  let config = Configuration::new().with_test_timeout_seconds(f64::NAN);
  assert!(config.coordinator().await.is_err());
}

#[test]
fn test_report_files_from_env() {
  let config = Configuration::from_env(&env(&[
    ("TESTWEAVE_JUNITXML", "out/junit.xml"),
    ("TESTWEAVE_TEST_ORDER", " order.log "),
  ]))
  .unwrap();
  assert_eq!(config.junitxml, Some(PathBuf::from("out/junit.xml")));
  assert_eq!(config.test_order_file, Some(PathBuf::from("order.log")));

  let config = Configuration::from_env(&env(&[("TESTWEAVE_JUNITXML", "")])).unwrap();
  assert_eq!(config.junitxml, None);
}

#[test]
fn test_reporter_creates_report_files() {
  let dir = tempfile::tempdir().unwrap();
  let junitxml = dir.path().join("reports/nested/junit.xml");
  let order = dir.path().join("order.log");
  let config = Configuration::new()
    .with_junitxml(junitxml.clone())
    .with_test_order_file(order.clone());

  let reporter = config.reporter().unwrap();
  assert_eq!(reporter.len(), 5);
  assert!(junitxml.exists());
  assert!(order.exists());

  assert_eq!(Configuration::new().reporter().unwrap().len(), 3);
}

#[test]
fn test_reporter_report_file_error() {
  let dir = tempfile::tempdir().unwrap();
  let blocker = dir.path().join("file");
  std::fs::write(&blocker, "x").unwrap();
  let config = Configuration::new().with_junitxml(blocker.join("junit.xml"));
  assert!(matches!(
    config.reporter(),
    Err(ConfigError::ReportFile { .. })
  ));
}
