//! Order in which this worker started its tests.

use super::emit;
use crate::reporter::Reporter;
use crate::work_item::WorkItem;
use std::io::Write;

/// Writes one identifier per line as each test starts.
///
/// The line is flushed right away, so the file still names the test that was
/// running when a worker crashed.
pub struct TestOrderReporter<W: Write + Send> {
  out: W,
}

impl<W: Write + Send> TestOrderReporter<W> {
  /// Creates the reporter writing to `out`.
  pub fn new(out: W) -> Self {
    Self { out }
  }

  /// The output sink.
  pub fn writer(&self) -> &W {
    &self.out
  }

  /// Consumes the reporter and returns the output sink.
  pub fn into_inner(self) -> W {
    self.out
  }
}

impl<W: Write + Send> Reporter for TestOrderReporter<W> {
  fn prerecord(&mut self, item: &WorkItem) {
    emit(&mut self.out, &format!("{}\n", item.identifier()));
  }
}
