//! # Configuration
//!
//! Settings shared by all workers of a run, plus the per-worker identity.
//!
//! Every setting has a default and can be overridden through the builder
//! methods or through `TESTWEAVE_*` environment variables:
//!
//! | Variable | Setting | Default |
//! |---|---|---|
//! | `TESTWEAVE_COORDINATOR` | [`Configuration::coordinator`] | `memory:` |
//! | `TESTWEAVE_RUN_ID` | [`Configuration::run_id`] | random UUID |
//! | `TESTWEAVE_WORKER_ID` | [`Configuration::worker_id`] | random UUID |
//! | `TESTWEAVE_TEST_TIMEOUT_SECONDS` | [`Configuration::test_timeout_seconds`] | `30.0` |
//! | `TESTWEAVE_TEST_BATCH_SIZE` | [`Configuration::test_batch_size`] | `10` |
//! | `TESTWEAVE_MAX_ATTEMPTS` | [`Configuration::max_attempts`] | `1` |
//! | `TESTWEAVE_MAX_FAILURES` | [`Configuration::max_failures`] | unset |
//! | `TESTWEAVE_RETRY_FAILURES` | [`Configuration::retry_failures`] | `true` |
//! | `TESTWEAVE_PROGRESS` | [`Configuration::progress`] | `false` |
//! | `TESTWEAVE_SHUFFLE_SEED` | [`Configuration::shuffle_seed`] | unset |
//! | `TESTWEAVE_INCLUDE_FILE` | [`Configuration::include_file`] | unset |
//! | `TESTWEAVE_EXCLUDE_FILE` | [`Configuration::exclude_file`] | unset |
//! | `TESTWEAVE_JUNITXML` | [`Configuration::junitxml`] | unset |
//! | `TESTWEAVE_TEST_ORDER` | [`Configuration::test_order_file`] | unset |
//!
//! Workers cooperate on a run when they share the coordinator URI and the
//! run id; the worker id must be unique per worker.

use crate::broker::RedisBroker;
use crate::coordinator::{BrokerCoordinator, Coordinator, LocalCoordinator};
use crate::error::{ConfigError, CoordinatorError};
use crate::reporter::CompositeReporter;
use crate::reporters::{
  JunitXmlReporter, ProgressReporter, ReclaimWarningsReporter, SummaryReporter, TestOrderReporter,
};
use crate::selector::{ExcludeFileFilter, IncludeFileFilter, TestSelector};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Default per-test timeout.
pub const DEFAULT_TEST_TIMEOUT_SECONDS: f64 = 30.0;
/// Default number of entries claimed per read.
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Default attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

/// Which coordinator backend to use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CoordinatorUri {
  /// `memory:`: a single-process run.
  #[default]
  Memory,
  /// `redis://…` or `rediss://…`: a distributed run.
  Redis(String),
}

impl FromStr for CoordinatorUri {
  type Err = ConfigError;

  fn from_str(uri: &str) -> Result<Self, Self::Err> {
    let uri = uri.trim();
    let scheme = uri.split_once(':').map_or(uri, |(scheme, _)| scheme);
    match scheme {
      "memory" => Ok(CoordinatorUri::Memory),
      "redis" | "rediss" => Ok(CoordinatorUri::Redis(uri.to_string())),
      other => Err(ConfigError::UnknownCoordinator(other.to_string())),
    }
  }
}

impl fmt::Display for CoordinatorUri {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CoordinatorUri::Memory => write!(f, "memory:"),
      CoordinatorUri::Redis(url) => write!(f, "{url}"),
    }
  }
}

/// Settings for one worker taking part in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
  /// Backend selection.
  pub coordinator: CoordinatorUri,
  /// Identifies the run; shared by cooperating workers.
  pub run_id: String,
  /// Identifies this worker; unique within the run.
  pub worker_id: String,
  /// Time a single test is expected to finish in.
  pub test_timeout_seconds: f64,
  /// Entries claimed per read.
  pub test_batch_size: usize,
  /// Attempts allowed per test.
  pub max_attempts: u32,
  /// Abort the run once this many failures and errors were recorded.
  pub max_failures: Option<i64>,
  /// Whether a second attempt for the same run id re-runs failed tests.
  pub retry_failures: bool,
  /// Whether to print a live progress line.
  pub progress: bool,
  /// Seed for shuffling suites.
  pub shuffle_seed: Option<u64>,
  /// Only run the tests listed in this file.
  pub include_file: Option<PathBuf>,
  /// Never run the tests listed in this file.
  pub exclude_file: Option<PathBuf>,
  /// Write a JUnit XML report to this path.
  pub junitxml: Option<PathBuf>,
  /// Log the identifier of every test this worker starts to this path.
  pub test_order_file: Option<PathBuf>,
}

impl Default for Configuration {
  fn default() -> Self {
    Self {
      coordinator: CoordinatorUri::Memory,
      run_id: Uuid::new_v4().to_string(),
      worker_id: Uuid::new_v4().to_string(),
      test_timeout_seconds: DEFAULT_TEST_TIMEOUT_SECONDS,
      test_batch_size: DEFAULT_BATCH_SIZE,
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      max_failures: None,
      retry_failures: true,
      progress: false,
      shuffle_seed: None,
      include_file: None,
      exclude_file: None,
      junitxml: None,
      test_order_file: None,
    }
  }
}

impl Configuration {
  /// Creates a configuration with default settings.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the coordinator backend.
  #[must_use]
  pub fn with_coordinator(mut self, coordinator: CoordinatorUri) -> Self {
    self.coordinator = coordinator;
    self
  }

  /// Sets the run id.
  #[must_use]
  pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
    self.run_id = run_id.into();
    self
  }

  /// Sets the worker id.
  #[must_use]
  pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
    self.worker_id = worker_id.into();
    self
  }

  /// Sets the per-test timeout.
  #[must_use]
  pub fn with_test_timeout_seconds(mut self, seconds: f64) -> Self {
    self.test_timeout_seconds = seconds;
    self
  }

  /// Sets the batch size.
  #[must_use]
  pub fn with_test_batch_size(mut self, batch_size: usize) -> Self {
    self.test_batch_size = batch_size;
    self
  }

  /// Sets the attempt budget.
  #[must_use]
  pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
    self.max_attempts = max_attempts;
    self
  }

  /// Sets the failure threshold.
  #[must_use]
  pub fn with_max_failures(mut self, max_failures: Option<i64>) -> Self {
    self.max_failures = max_failures;
    self
  }

  /// Enables or disables retry mode.
  #[must_use]
  pub fn with_retry_failures(mut self, retry_failures: bool) -> Self {
    self.retry_failures = retry_failures;
    self
  }

  /// Enables or disables the progress line.
  #[must_use]
  pub fn with_progress(mut self, progress: bool) -> Self {
    self.progress = progress;
    self
  }

  /// Sets the suite shuffle seed.
  #[must_use]
  pub fn with_shuffle_seed(mut self, seed: Option<u64>) -> Self {
    self.shuffle_seed = seed;
    self
  }

  /// Restricts the run to the tests listed in `path`.
  #[must_use]
  pub fn with_include_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.include_file = Some(path.into());
    self
  }

  /// Excludes the tests listed in `path`.
  #[must_use]
  pub fn with_exclude_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.exclude_file = Some(path.into());
    self
  }

  /// Writes a JUnit XML report to `path` at the end of the run.
  #[must_use]
  pub fn with_junitxml(mut self, path: impl Into<PathBuf>) -> Self {
    self.junitxml = Some(path.into());
    self
  }

  /// Logs the tests this worker starts, in order, to `path`.
  #[must_use]
  pub fn with_test_order_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.test_order_file = Some(path.into());
    self
  }

  /// Reads settings from the process environment.
  pub fn from_process_env() -> Result<Self, ConfigError> {
    let env: HashMap<String, String> = std::env::vars().collect();
    Self::from_env(&env)
  }

  /// Reads settings from `env`, falling back to defaults for absent or empty
  /// variables.
  pub fn from_env(env: &HashMap<String, String>) -> Result<Self, ConfigError> {
    let mut config = Self::default();

    if let Some(uri) = env_string(env, "TESTWEAVE_COORDINATOR") {
      config.coordinator = uri.parse()?;
    }
    if let Some(run_id) = env_string(env, "TESTWEAVE_RUN_ID") {
      config.run_id = run_id;
    }
    if let Some(worker_id) = env_string(env, "TESTWEAVE_WORKER_ID") {
      config.worker_id = worker_id;
    }
    if let Some(timeout) = env_parse(env, "TESTWEAVE_TEST_TIMEOUT_SECONDS")? {
      config.test_timeout_seconds = timeout;
    }
    if let Some(batch_size) = env_parse(env, "TESTWEAVE_TEST_BATCH_SIZE")? {
      config.test_batch_size = batch_size;
    }
    if let Some(max_attempts) = env_parse(env, "TESTWEAVE_MAX_ATTEMPTS")? {
      config.max_attempts = max_attempts;
    }
    config.max_failures = env_parse(env, "TESTWEAVE_MAX_FAILURES")?;
    if let Some(retry) = env_bool(env, "TESTWEAVE_RETRY_FAILURES")? {
      config.retry_failures = retry;
    }
    if let Some(progress) = env_bool(env, "TESTWEAVE_PROGRESS")? {
      config.progress = progress;
    }
    config.shuffle_seed = env_parse(env, "TESTWEAVE_SHUFFLE_SEED")?;
    config.include_file = env_string(env, "TESTWEAVE_INCLUDE_FILE").map(PathBuf::from);
    config.exclude_file = env_string(env, "TESTWEAVE_EXCLUDE_FILE").map(PathBuf::from);
    config.junitxml = env_string(env, "TESTWEAVE_JUNITXML").map(PathBuf::from);
    config.test_order_file = env_string(env, "TESTWEAVE_TEST_ORDER").map(PathBuf::from);

    config.validate()?;
    Ok(config)
  }

  /// Checks the numeric settings.
  ///
  /// The timeout must be positive and finite, the batch size and attempt
  /// budget at least 1, and `timeout × batch size` (the stale threshold)
  /// representable as a [`Duration`].
  pub fn validate(&self) -> Result<(), ConfigError> {
    let timeout = self.test_timeout_seconds;
    if !timeout.is_finite() || timeout <= 0.0 {
      return Err(invalid("TESTWEAVE_TEST_TIMEOUT_SECONDS", timeout));
    }
    if self.test_batch_size == 0 {
      return Err(invalid("TESTWEAVE_TEST_BATCH_SIZE", self.test_batch_size));
    }
    if self.max_attempts == 0 {
      return Err(invalid("TESTWEAVE_MAX_ATTEMPTS", self.max_attempts));
    }
    if Duration::try_from_secs_f64(timeout * self.test_batch_size as f64).is_err() {
      return Err(invalid("TESTWEAVE_TEST_TIMEOUT_SECONDS", timeout));
    }
    Ok(())
  }

  /// Builds the coordinator selected by [`Configuration::coordinator`].
  pub async fn coordinator(&self) -> Result<Box<dyn Coordinator>, CoordinatorError> {
    match &self.coordinator {
      CoordinatorUri::Memory => {
        self.validate()?;
        Ok(Box::new(LocalCoordinator::new(self.clone())))
      }
      CoordinatorUri::Redis(url) => {
        let broker = RedisBroker::connect(url).await?;
        info!(
          run_id = %self.run_id,
          worker = %self.worker_id,
          "Using Redis coordinator"
        );
        Ok(Box::new(BrokerCoordinator::new(
          self.clone(),
          Arc::new(broker),
        )?))
      }
    }
  }

  /// Builds a selector over `discovered` with this configuration's shuffle
  /// seed and include/exclude files applied.
  pub fn test_selector(&self, discovered: Vec<String>) -> Result<TestSelector, ConfigError> {
    let mut selector = TestSelector::new(discovered);
    if let Some(seed) = self.shuffle_seed {
      selector = selector.with_shuffle_seed(seed);
    }
    if let Some(path) = &self.include_file {
      let filter = IncludeFileFilter::from_file(path).map_err(|e| test_list_error(path, &e))?;
      selector = selector.with_filter(filter);
    }
    if let Some(path) = &self.exclude_file {
      let filter = ExcludeFileFilter::from_file(path).map_err(|e| test_list_error(path, &e))?;
      selector = selector.with_filter(filter);
    }
    Ok(selector)
  }

  /// The standard reporters: failures as they happen (plus the progress
  /// line when enabled), reclaim warnings and the final summary on standard
  /// output, and the JUnit XML and test order files when configured.
  ///
  /// Report files are created up front, along with missing parent
  /// directories.
  pub fn reporter(&self) -> Result<CompositeReporter, ConfigError> {
    let mut reporter = CompositeReporter::new()
      .with(ProgressReporter::new(std::io::stdout()).with_progress(self.progress))
      .with(ReclaimWarningsReporter::new(std::io::stdout()))
      .with(SummaryReporter::new(std::io::stdout()));
    if let Some(path) = &self.junitxml {
      reporter.push(JunitXmlReporter::new(create_report_file(path)?));
    }
    if let Some(path) = &self.test_order_file {
      reporter.push(TestOrderReporter::new(create_report_file(path)?));
    }
    Ok(reporter)
  }
}

fn create_report_file(path: &Path) -> Result<File, ConfigError> {
  let report_error = |e: std::io::Error| ConfigError::ReportFile {
    path: path.display().to_string(),
    message: e.to_string(),
  };
  if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
    fs::create_dir_all(parent).map_err(report_error)?;
  }
  File::create(path).map_err(report_error)
}

fn env_string(env: &HashMap<String, String>, key: &str) -> Option<String> {
  env
    .get(key)
    .map(|value| value.trim())
    .filter(|value| !value.is_empty())
    .map(str::to_string)
}

fn env_parse<T: FromStr>(env: &HashMap<String, String>, key: &str) -> Result<Option<T>, ConfigError> {
  env_string(env, key)
    .map(|value| value.parse().map_err(|_| invalid(key, value)))
    .transpose()
}

fn env_bool(env: &HashMap<String, String>, key: &str) -> Result<Option<bool>, ConfigError> {
  env_string(env, key)
    .map(|value| match value.to_ascii_lowercase().as_str() {
      "1" | "true" | "yes" | "on" => Ok(true),
      "0" | "false" | "no" | "off" => Ok(false),
      _ => Err(invalid(key, value)),
    })
    .transpose()
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
  ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  }
}

fn test_list_error(path: &Path, error: &std::io::Error) -> ConfigError {
  ConfigError::TestList {
    path: path.display().to_string(),
    message: error.to_string(),
  }
}
