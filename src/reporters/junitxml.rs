//! JUnit XML report of the results this worker committed.
//!
//! The document groups test cases by suite (the part of the identifier before
//! `#`), in the order suites were first seen:
//!
//! ```xml
//! <?xml version="1.0" encoding="utf-8"?>
//! <testsuites>
//!   <testsuite name="Suite" tests="2" failures="1" skipped="0" assertions="3" time="0.004">
//!     <testcase name="test_a" classname="Suite" assertions="2" time="0.001"/>
//!     <testcase name="test_b" classname="Suite" assertions="1" time="0.003">
//!       <failure type="failed" message="Expected 1 to equal 2">...</failure>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! Requeued and discarded results are left out: they neither passed nor
//! failed the build. ANSI color codes and other control characters are
//! stripped, since XML cannot carry them literally.

use super::emit;
use crate::commit::CommittedResult;
use crate::outcome::ResultType;
use crate::reporter::{Reporter, RunSummary};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Write;
use tracing::warn;

#[derive(Debug, Clone)]
struct TestCase {
  name: String,
  result_type: ResultType,
  assertions: u64,
  seconds: f64,
  message: String,
  details: String,
}

#[derive(Debug, Clone)]
struct TestSuite {
  name: String,
  cases: Vec<TestCase>,
}

impl TestSuite {
  fn count(&self, result_types: &[ResultType]) -> usize {
    self
      .cases
      .iter()
      .filter(|case| result_types.contains(&case.result_type))
      .count()
  }

  fn attributes(&self) -> Vec<(&'static str, String)> {
    let assertions: u64 = self.cases.iter().map(|case| case.assertions).sum();
    let seconds: f64 = self.cases.iter().map(|case| case.seconds).sum();
    vec![
      ("name", self.name.clone()),
      ("tests", self.cases.len().to_string()),
      (
        "failures",
        self
          .count(&[ResultType::Failed, ResultType::Error])
          .to_string(),
      ),
      ("skipped", self.count(&[ResultType::Skipped]).to_string()),
      ("assertions", assertions.to_string()),
      ("time", format!("{seconds:.3}")),
    ]
  }
}

/// Collects committed results and writes them as JUnit XML in `report`.
pub struct JunitXmlReporter<W: Write + Send> {
  out: W,
  suites: Vec<TestSuite>,
}

impl<W: Write + Send> JunitXmlReporter<W> {
  /// Creates the reporter writing to `out`.
  pub fn new(out: W) -> Self {
    Self {
      out,
      suites: Vec::new(),
    }
  }

  /// The output sink.
  pub fn writer(&self) -> &W {
    &self.out
  }

  /// Consumes the reporter and returns the output sink.
  pub fn into_inner(self) -> W {
    self.out
  }

  /// Number of test cases collected so far.
  #[must_use]
  pub fn len(&self) -> usize {
    self.suites.iter().map(|suite| suite.cases.len()).sum()
  }

  /// True when no test case was collected.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn suite_mut(&mut self, name: &str) -> &mut TestSuite {
    let index = match self.suites.iter().position(|suite| suite.name == name) {
      Some(index) => index,
      None => {
        self.suites.push(TestSuite {
          name: name.to_string(),
          cases: Vec::new(),
        });
        self.suites.len() - 1
      }
    };
    &mut self.suites[index]
  }

  fn document(&self) -> Result<Vec<u8>, quick_xml::Error> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("testsuites")))?;

    for suite in &self.suites {
      let mut start = BytesStart::new("testsuite");
      for (key, value) in suite.attributes() {
        start.push_attribute((key, value.as_str()));
      }
      writer.write_event(Event::Start(start))?;
      for case in &suite.cases {
        write_test_case(&mut writer, &suite.name, case)?;
      }
      writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;
    let mut document = writer.into_inner();
    document.push(b'\n');
    Ok(document)
  }
}

fn write_test_case(
  writer: &mut Writer<Vec<u8>>,
  suite: &str,
  case: &TestCase,
) -> Result<(), quick_xml::Error> {
  let mut start = BytesStart::new("testcase");
  start.push_attribute(("name", case.name.as_str()));
  start.push_attribute(("classname", suite));
  start.push_attribute(("assertions", case.assertions.to_string().as_str()));
  start.push_attribute(("time", format!("{:.3}", case.seconds).as_str()));

  let tag = match case.result_type {
    ResultType::Failed => "failure",
    ResultType::Error => "error",
    ResultType::Skipped => "skipped",
    ResultType::Passed | ResultType::Requeued | ResultType::Discarded => {
      writer.write_event(Event::Empty(start))?;
      return Ok(());
    }
  };

  writer.write_event(Event::Start(start))?;
  let mut detail = BytesStart::new(tag);
  detail.push_attribute(("type", case.result_type.as_str()));
  detail.push_attribute(("message", case.message.as_str()));
  if case.result_type == ResultType::Skipped {
    writer.write_event(Event::Empty(detail))?;
  } else {
    writer.write_event(Event::Start(detail))?;
    writer.write_event(Event::Text(BytesText::new(&case.details)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
  }
  writer.write_event(Event::End(BytesEnd::new("testcase")))?;
  Ok(())
}

/// `text` without ANSI color codes or control characters other than line
/// breaks and tabs.
pub(crate) fn printable(text: &str) -> String {
  let mut cleaned = String::with_capacity(text.len());
  let mut chars = text.chars().peekable();
  while let Some(c) = chars.next() {
    if c == '\u{1b}' && chars.peek() == Some(&'[') {
      for skipped in chars.by_ref() {
        if skipped == 'm' {
          break;
        }
      }
      continue;
    }
    if !c.is_control() || matches!(c, '\n' | '\t') {
      cleaned.push(c);
    }
  }
  cleaned
}

/// First line of `message`, printable.
pub(crate) fn summary_line(message: &str) -> String {
  printable(message.lines().next().unwrap_or_default())
}

impl<W: Write + Send> Reporter for JunitXmlReporter<W> {
  fn record(&mut self, result: &CommittedResult) {
    let result_type = result.result_type();
    if matches!(result_type, ResultType::Requeued | ResultType::Discarded) {
      return;
    }

    let identifier = result.work_item().identifier();
    let (suite, name) = identifier.split_once('#').unwrap_or((identifier, identifier));
    let outcome = result.committed_outcome();
    let case = TestCase {
      name: name.to_string(),
      result_type,
      assertions: outcome.assertions,
      seconds: outcome.elapsed.as_secs_f64(),
      message: outcome
        .failures
        .first()
        .map(|failure| summary_line(failure.message()))
        .unwrap_or_default(),
      details: printable(&outcome.render(identifier)),
    };
    self.suite_mut(suite).cases.push(case);
  }

  fn report(&mut self, _summary: &RunSummary) {
    match self.document() {
      Ok(document) => emit(&mut self.out, &String::from_utf8_lossy(&document)),
      Err(e) => warn!(error = %e, "Failed to render JUnit XML report"),
    }
  }
}
