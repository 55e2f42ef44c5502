//! End-of-run summary and the worker's pass/fail verdict.

use super::emit;
use crate::reporter::{Reporter, RunSummary};
use std::io::Write;

/// Prints the final statistics and decides whether this worker passed.
///
/// When this worker's counts equal the combined counts a single `Results:`
/// line is printed; otherwise both tallies are shown.
pub struct SummaryReporter<W: Write + Send> {
  out: W,
  verdict: Option<bool>,
}

impl<W: Write + Send> SummaryReporter<W> {
  /// Creates a summary reporter writing to `out`.
  pub fn new(out: W) -> Self {
    Self { out, verdict: None }
  }

  /// The output sink.
  pub fn writer(&self) -> &W {
    &self.out
  }

  /// Consumes the reporter and returns the output sink.
  pub fn into_inner(self) -> W {
    self.out
  }

  fn render(summary: &RunSummary) -> String {
    let mut text = String::new();

    if summary.local.discards > 0 {
      text.push_str(&format!(
        "WARNING: This worker was not able to ack all the tests it ran with the coordinator,\n\
         and had to discard the results of those tests. This means that some of your tests may\n\
         take too long to run. Make sure that all your tests complete well within {}s.\n\n",
        summary.test_timeout_seconds
      ));
    }

    if summary.aborted {
      text.push_str("Cannot retry a run that was cut short during the previous attempt.\n\n");
    } else if summary.combined.is_abort() {
      let limit = summary
        .max_failures
        .or(summary.combined.max_failures)
        .unwrap_or_default();
      text.push_str(&format!(
        "The run was cut short after reaching the limit of {limit} test failures.\n\n"
      ));
    }

    let duration = format!("(in {:.3}s)", summary.elapsed.as_secs_f64());
    if summary.combined.same_counts(&summary.local) {
      text.push_str(&format!("Results: {} {duration}\n", summary.combined));
    } else {
      text.push_str(&format!("This worker:      {} {duration}\n", summary.local));
      text.push_str(&format!("Combined results: {}\n", summary.combined));
    }
    text
  }
}

impl<W: Write + Send> Reporter for SummaryReporter<W> {
  fn report(&mut self, summary: &RunSummary) {
    let text = Self::render(summary);
    emit(&mut self.out, &text);
    self.verdict = Some(summary.passed());
  }

  fn passed(&self) -> bool {
    self.verdict.unwrap_or(false)
  }
}
