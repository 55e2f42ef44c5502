//! # Error Handling
//!
//! Infrastructure errors raised while coordinating a distributed run.
//!
//! ## Overview
//!
//! Only broker and configuration problems are errors. Everything that can go
//! wrong with an individual test (assertion failures, unexpected errors,
//! timeouts, lost acknowledgments) is captured as an
//! [`Outcome`](crate::outcome::Outcome) and committed like any other result.
//!
//! Two broker conditions are *expected* and handled by the coordinator rather
//! than propagated:
//!
//! - [`BrokerError::GroupExists`]: another worker won the leader election.
//!   The caller continues as a follower.
//! - [`BrokerError::NoGroup`]: the consumer group was destroyed by the worker
//!   that observed completion. The caller leaves its consume loop.
//!
//! Any other [`BrokerError`] terminates the worker. Its claimed entries are
//! recovered by the remaining workers once they become stale.

/// Errors returned by a [`Broker`](crate::broker::Broker) implementation.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
  /// The consumer group already exists (Redis `BUSYGROUP`).
  #[error("consumer group already exists")]
  GroupExists,

  /// The consumer group or its stream no longer exists (Redis `NOGROUP`).
  #[error("no such consumer group: {0}")]
  NoGroup(String),

  /// The broker could not be reached.
  #[error("connection error: {0}")]
  Connection(String),

  /// The broker answered with something we could not interpret.
  #[error("invalid broker reply: {0}")]
  InvalidReply(String),

  /// Any other Redis error.
  #[error("redis error: {0}")]
  Redis(#[from] redis::RedisError),
}

impl BrokerError {
  /// Returns true when the error signals that the run was already cleaned up.
  #[must_use]
  pub fn is_no_group(&self) -> bool {
    matches!(self, BrokerError::NoGroup(_))
  }
}

/// Errors produced while reading a [`Configuration`](crate::config::Configuration).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
  /// A setting had a value that could not be parsed.
  #[error("invalid value for {key}: {value:?}")]
  InvalidValue {
    /// The setting name (environment variable).
    key: String,
    /// The offending value.
    value: String,
  },

  /// The coordinator URI uses a scheme no backend is registered for.
  #[error("unknown coordinator implementation: {0}")]
  UnknownCoordinator(String),

  /// An include or exclude file could not be read.
  #[error("cannot read test list {path}: {message}")]
  TestList {
    /// Path of the file.
    path: String,
    /// The I/O error.
    message: String,
  },

  /// A report file could not be created.
  #[error("cannot create report file {path}: {message}")]
  ReportFile {
    /// Path of the file.
    path: String,
    /// The I/O error.
    message: String,
  },
}

/// Errors that terminate a worker's participation in a run.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
  /// An unexpected broker failure.
  #[error(transparent)]
  Broker(#[from] BrokerError),

  /// Invalid configuration.
  #[error(transparent)]
  Config(#[from] ConfigError),
}
