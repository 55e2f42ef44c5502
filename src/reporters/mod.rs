//! Built-in reporters that write human-readable output.

pub mod junitxml;
pub mod progress;
pub mod summary;
pub mod test_order;
pub mod warnings;

#[cfg(test)]
mod junitxml_test;

pub use junitxml::JunitXmlReporter;
pub use progress::ProgressReporter;
pub use summary::SummaryReporter;
pub use test_order::TestOrderReporter;
pub use warnings::ReclaimWarningsReporter;

use std::io::Write;
use tracing::warn;

/// Writes `text` to `out`, logging instead of failing when output is gone.
pub(crate) fn emit<W: Write>(out: &mut W, text: &str) {
  if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
    warn!(error = %e, "Failed to write reporter output");
  }
}
