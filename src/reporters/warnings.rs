//! Warnings about tests taken over from other workers.

use super::emit;
use crate::reporter::{Reporter, RunSummary};
use std::io::Write;

/// Lists the tests this worker reclaimed, because they usually point at a
/// crashed worker or a test that is too slow for the configured timeout.
pub struct ReclaimWarningsReporter<W: Write + Send> {
  out: W,
}

impl<W: Write + Send> ReclaimWarningsReporter<W> {
  /// Creates the reporter writing to `out`.
  pub fn new(out: W) -> Self {
    Self { out }
  }

  /// The output sink.
  pub fn writer(&self) -> &W {
    &self.out
  }

  fn bullet_list(identifiers: &[String]) -> String {
    identifiers
      .iter()
      .map(|identifier| format!("- {identifier}"))
      .collect::<Vec<_>>()
      .join("\n")
  }
}

impl<W: Write + Send> Reporter for ReclaimWarningsReporter<W> {
  fn report(&mut self, summary: &RunSummary) {
    let reclaimed = &summary.reclaimed;

    if !reclaimed.timed_out.is_empty() {
      let text = format!(
        "WARNING: The following tests were reclaimed from another worker:\n{}\n\n\
         The original worker did not complete running these tests in {}s.\n\
         This either means that the worker unexpectedly went away, or that the test is too slow.\n\n",
        Self::bullet_list(&reclaimed.timed_out),
        summary.test_timeout_seconds
      );
      emit(&mut self.out, &text);
    }

    if !reclaimed.failed.is_empty() {
      let text = format!(
        "WARNING: The following tests were reclaimed from another worker because they failed:\n{}\n\n",
        Self::bullet_list(&reclaimed.failed)
      );
      emit(&mut self.out, &text);
    }
  }
}
