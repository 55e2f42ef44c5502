//! # Outcomes
//!
//! The result of running one work item, and the classification of that
//! result into a [`ResultType`].
//!
//! An [`Outcome`] is what a [`Runner`](crate::runner::Runner) reports: an
//! assertion count, the elapsed time, and zero or more [`Failure`] records.
//! An outcome with no failure records passed.
//!
//! Two failure kinds never come out of a runner. [`Failure::Requeue`] and
//! [`Failure::Discard`] are wrappers the coordinator places around a real
//! outcome: the first when another attempt will follow, the second when the
//! result could not be acknowledged by the broker. Both keep the wrapped
//! outcome so reporters can still show what actually happened.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Category of an [`Outcome`].
///
/// Every consumer of this enum (aggregate updates, failure-list routing,
/// reporters) matches it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
  /// No failure records.
  Passed,
  /// At least one assertion failure and no unexpected error.
  Failed,
  /// An unexpected error was raised.
  Error,
  /// The test skipped itself.
  Skipped,
  /// The result could not be committed and was thrown away.
  Discarded,
  /// The test failed but will be attempted again.
  Requeued,
}

impl ResultType {
  /// Classifies an outcome.
  ///
  /// The first matching rule wins:
  ///
  /// 1. a requeue marker makes it [`ResultType::Requeued`]
  /// 2. a discard marker makes it [`ResultType::Discarded`]
  /// 3. no failure records makes it [`ResultType::Passed`]
  /// 4. an unexpected error makes it [`ResultType::Error`], even when a skip
  ///    marker is present as well
  /// 5. a skip marker makes it [`ResultType::Skipped`]
  /// 6. anything else is [`ResultType::Failed`]
  #[must_use]
  pub fn of(outcome: &Outcome) -> Self {
    let failures = &outcome.failures;
    if failures.iter().any(|f| matches!(f, Failure::Requeue { .. })) {
      return ResultType::Requeued;
    }
    if failures.iter().any(|f| matches!(f, Failure::Discard { .. })) {
      return ResultType::Discarded;
    }
    if failures.is_empty() {
      return ResultType::Passed;
    }

    let errored = failures
      .iter()
      .any(|f| matches!(f, Failure::UnexpectedError { .. }));
    let skipped = failures.iter().any(|f| matches!(f, Failure::Skip { .. }));

    if errored {
      ResultType::Error
    } else if skipped {
      ResultType::Skipped
    } else {
      ResultType::Failed
    }
  }

  /// Lowercase name, used for broker key names.
  #[must_use]
  pub fn as_str(&self) -> &'static str {
    match self {
      ResultType::Passed => "passed",
      ResultType::Failed => "failed",
      ResultType::Error => "error",
      ResultType::Skipped => "skipped",
      ResultType::Discarded => "discarded",
      ResultType::Requeued => "requeued",
    }
  }

  /// True for outcomes that end an entry's life: everything but a requeue.
  #[must_use]
  pub fn is_final(&self) -> bool {
    !matches!(self, ResultType::Requeued)
  }
}

impl fmt::Display for ResultType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One failure record attached to an [`Outcome`].
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
  /// An assertion did not hold.
  Assertion {
    /// Failure message.
    message: String,
  },
  /// The attempt budget ran out before any attempt reported back.
  AttemptsExhausted {
    /// Explanation including the timeout and attempt budget.
    message: String,
  },
  /// The test skipped itself.
  Skip {
    /// Skip reason.
    message: String,
  },
  /// The test raised something it did not expect.
  UnexpectedError {
    /// Error description.
    message: String,
  },
  /// Synthetic: the wrapped outcome failed and will be retried.
  Requeue {
    /// Original failure message plus the retry notice.
    message: String,
    /// The outcome that triggered the retry.
    original: Box<Outcome>,
  },
  /// Synthetic: the wrapped outcome could not be acknowledged.
  Discard {
    /// Explanation of why the result was discarded.
    message: String,
    /// The outcome that was thrown away.
    original: Box<Outcome>,
  },
}

impl Failure {
  /// The human-readable message of this record.
  #[must_use]
  pub fn message(&self) -> &str {
    match self {
      Failure::Assertion { message }
      | Failure::AttemptsExhausted { message }
      | Failure::Skip { message }
      | Failure::UnexpectedError { message }
      | Failure::Requeue { message, .. }
      | Failure::Discard { message, .. } => message,
    }
  }

  /// Label used when rendering the record.
  #[must_use]
  pub fn label(&self) -> &'static str {
    match self {
      Failure::Assertion { .. } | Failure::AttemptsExhausted { .. } => "Failure",
      Failure::Skip { .. } => "Skipped",
      Failure::UnexpectedError { .. } => "Error",
      Failure::Requeue { .. } => "Requeued",
      Failure::Discard { .. } => "Discarded",
    }
  }
}

const DISCARD_MESSAGE: &str =
  "This test result was discarded, because it could not be committed to the test run coordinator.";

/// The result of running one work item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outcome {
  /// Number of assertions evaluated.
  pub assertions: u64,
  /// Wall-clock time the test took.
  pub elapsed: Duration,
  /// Failure records; empty means the test passed.
  pub failures: Vec<Failure>,
}

impl Outcome {
  /// A passing outcome.
  #[must_use]
  pub fn passed(assertions: u64, elapsed: Duration) -> Self {
    Self {
      assertions,
      elapsed,
      failures: Vec::new(),
    }
  }

  /// A failing outcome with one assertion failure.
  #[must_use]
  pub fn failed(message: impl Into<String>) -> Self {
    Self::default().with_failure(Failure::Assertion {
      message: message.into(),
    })
  }

  /// An outcome with one unexpected error.
  #[must_use]
  pub fn errored(message: impl Into<String>) -> Self {
    Self::default().with_failure(Failure::UnexpectedError {
      message: message.into(),
    })
  }

  /// A skipped outcome.
  #[must_use]
  pub fn skipped(message: impl Into<String>) -> Self {
    Self::default().with_failure(Failure::Skip {
      message: message.into(),
    })
  }

  /// Appends a failure record.
  #[must_use]
  pub fn with_failure(mut self, failure: Failure) -> Self {
    self.failures.push(failure);
    self
  }

  /// Sets the assertion count.
  #[must_use]
  pub fn with_assertions(mut self, assertions: u64) -> Self {
    self.assertions = assertions;
    self
  }

  /// Sets the elapsed time.
  #[must_use]
  pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
    self.elapsed = elapsed;
    self
  }

  /// Classification of this outcome.
  #[must_use]
  pub fn result_type(&self) -> ResultType {
    ResultType::of(self)
  }

  /// The wrapped outcome of a requeued or discarded result.
  #[must_use]
  pub fn original(&self) -> Option<&Outcome> {
    self.failures.iter().find_map(|f| match f {
      Failure::Requeue { original, .. } | Failure::Discard { original, .. } => Some(&**original),
      _ => None,
    })
  }

  /// Wraps this outcome to signal that attempt `attempt` of `max_attempts`
  /// failed and another attempt will follow.
  #[must_use]
  pub fn requeue(self, attempt: u32, max_attempts: u32) -> Outcome {
    let reason = self
      .failures
      .first()
      .map(|f| f.message().to_string())
      .unwrap_or_default();
    let message =
      format!("{reason}\n\nThe test will be retried (attempt {attempt} of {max_attempts})");

    Outcome {
      assertions: self.assertions,
      elapsed: self.elapsed,
      failures: vec![Failure::Requeue {
        message,
        original: Box::new(self),
      }],
    }
  }

  /// Wraps this outcome to signal it could not be committed.
  ///
  /// When the test ran longer than `timeout_seconds` the message explains
  /// that another worker most likely took ownership of the entry.
  #[must_use]
  pub fn discard(self, timeout_seconds: f64) -> Outcome {
    let mut message = DISCARD_MESSAGE.to_string();
    let elapsed = self.elapsed.as_secs_f64();
    if elapsed > timeout_seconds {
      message.push_str(&format!(
        "\n\nThe test took {elapsed:.3}s to run, longer than the test timeout which is configured to be {timeout_seconds:.1}s.\n\
         Another worker likely claimed ownership of this test, and will commit the result instead.\n\
         For best results, make sure that all your tests finish within {timeout_seconds:.1}s."
      ));
    }

    Outcome {
      assertions: self.assertions,
      elapsed: self.elapsed,
      failures: vec![Failure::Discard {
        message,
        original: Box::new(self),
      }],
    }
  }

  /// Renders the failure records for display, one block per record.
  ///
  /// A passing outcome renders as an empty string.
  #[must_use]
  pub fn render(&self, identifier: &str) -> String {
    self
      .failures
      .iter()
      .map(|f| format!("{}:\n{}:\n{}\n", f.label(), identifier, f.message()))
      .collect::<Vec<_>>()
      .join("\n")
  }
}
