//! Live progress output.

use super::emit;
use crate::aggregate::ResultAggregate;
use crate::commit::CommittedResult;
use crate::outcome::ResultType;
use crate::reporter::{Reporter, RunSummary};
use crate::work_item::WorkItem;
use std::io::Write;

const LINE_WIDTH: usize = 80;

/// Prints failures as they are committed and, optionally, a progress line.
///
/// Because items of a batch may interleave, the progress line is always
/// cleared completely before anything else is printed.
pub struct ProgressReporter<W: Write + Send> {
  out: W,
  show_progress: bool,
  verbose: bool,
  line_width: usize,
  latest: Option<ResultAggregate>,
}

impl<W: Write + Send> ProgressReporter<W> {
  /// Creates a progress reporter writing to `out`.
  pub fn new(out: W) -> Self {
    Self {
      out,
      show_progress: false,
      verbose: false,
      line_width: LINE_WIDTH,
      latest: None,
    }
  }

  /// Enables the `[acks/size] identifier` progress line.
  #[must_use]
  pub fn with_progress(mut self, show_progress: bool) -> Self {
    self.show_progress = show_progress;
    self
  }

  /// Also prints skipped and discarded results.
  #[must_use]
  pub fn with_verbose(mut self, verbose: bool) -> Self {
    self.verbose = verbose;
    self
  }

  /// Sets the terminal width used to truncate the progress line.
  #[must_use]
  pub fn with_line_width(mut self, line_width: usize) -> Self {
    self.line_width = line_width.max(1);
    self
  }

  /// The output sink.
  pub fn writer(&self) -> &W {
    &self.out
  }

  fn clear_current_line(&mut self) {
    let blank = format!("\r{}\r", " ".repeat(self.line_width));
    emit(&mut self.out, &blank);
  }
}

impl<W: Write + Send> Reporter for ProgressReporter<W> {
  fn prerecord(&mut self, item: &WorkItem) {
    if !self.show_progress {
      return;
    }
    self.clear_current_line();

    let (acks, size) = self
      .latest
      .as_ref()
      .map_or((0, 0), |combined| (combined.acks, combined.size));
    let line: String = format!("[{acks}/{size}] {}", item.identifier())
      .chars()
      .take(self.line_width)
      .collect();
    emit(&mut self.out, &line);
  }

  fn record(&mut self, result: &CommittedResult) {
    if self.show_progress {
      self.clear_current_line();
    }

    let rendered = result
      .committed_outcome()
      .render(result.work_item().identifier());
    match result.result_type() {
      ResultType::Passed => {}
      ResultType::Skipped | ResultType::Discarded => {
        if self.verbose {
          emit(&mut self.out, &format!("{rendered}\n"));
        }
      }
      ResultType::Error | ResultType::Failed | ResultType::Requeued => {
        emit(&mut self.out, &format!("{rendered}\n"));
      }
    }
  }

  fn update(&mut self, combined: &ResultAggregate) {
    self.latest = Some(combined.clone());
  }

  fn report(&mut self, _summary: &RunSummary) {
    if self.show_progress {
      self.clear_current_line();
    }
  }
}
