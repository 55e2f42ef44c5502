//! # JUnit XML Reporter Test Suite
//!
//! ## Test Coverage
//!
//! - Suites grouped by identifier prefix with aggregated attributes
//! - Failure, error and skip elements with escaped text
//! - Requeued and discarded results left out
//! - Message clean-up for attributes

use super::JunitXmlReporter;
use super::junitxml::{printable, summary_line};
use crate::aggregate::ResultAggregate;
use crate::commit::{Commit, CommittedResult};
use crate::outcome::Outcome;
use crate::reporter::{ReclaimedTests, Reporter, RunSummary};
use crate::work_item::WorkItem;
use std::time::Duration;

fn result(identifier: &str, outcome: Outcome, acked: bool) -> CommittedResult {
  let commit = if acked {
    Commit::success()
  } else {
    Commit::failure()
  };
  CommittedResult::new(WorkItem::new(identifier, "1-0", 2, 30.0), outcome, commit)
}

fn summary() -> RunSummary {
  RunSummary {
    local: ResultAggregate::default(),
    combined: ResultAggregate::default(),
    aborted: false,
    reclaimed: ReclaimedTests::default(),
    test_timeout_seconds: 30.0,
    max_failures: None,
    elapsed: Duration::from_secs(1),
  }
}

fn document(reporter: JunitXmlReporter<Vec<u8>>) -> String {
  String::from_utf8(reporter.into_inner()).unwrap()
}

#[test]
fn test_groups_cases_by_suite() {
  let mut reporter = JunitXmlReporter::new(Vec::new());
  reporter.record(&result(
    "Alpha#test_a",
    Outcome::passed(2, Duration::from_millis(1)),
    true,
  ));
  reporter.record(&result("Beta#test_b", Outcome::passed(1, Duration::from_millis(2)), true));
  reporter.record(&result(
    "Alpha#test_c",
    Outcome::failed("Expected 1 to equal 2").with_elapsed(Duration::from_millis(3)),
    true,
  ));
  assert_eq!(reporter.len(), 3);
  reporter.report(&summary());

  let xml = document(reporter);
  assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
  assert!(xml.contains(
    "<testsuite name=\"Alpha\" tests=\"2\" failures=\"1\" skipped=\"0\" assertions=\"2\" time=\"0.004\">"
  ));
  assert!(xml.contains(
    "<testsuite name=\"Beta\" tests=\"1\" failures=\"0\" skipped=\"0\" assertions=\"1\" time=\"0.002\">"
  ));
  assert!(xml.contains(
    "<testcase name=\"test_a\" classname=\"Alpha\" assertions=\"2\" time=\"0.001\"/>"
  ));
  assert!(xml.find("name=\"Alpha\"").unwrap() < xml.find("name=\"Beta\"").unwrap());
  assert!(xml.trim_end().ends_with("</testsuites>"));
}

#[test]
fn test_failure_error_and_skip_elements() {
  let mut reporter = JunitXmlReporter::new(Vec::new());
  reporter.record(&result(
    "Suite#test_fail",
    Outcome::failed("\u{1b}[31mExpected a < b\u{1b}[0m\nsecond line"),
    true,
  ));
  reporter.record(&result("Suite#test_error", Outcome::errored("boom & bust"), true));
  reporter.record(&result("Suite#test_skip", Outcome::skipped("not on CI"), true));
  reporter.report(&summary());

  let xml = document(reporter);
  assert!(xml.contains("<failure type=\"failed\" message=\"Expected a &lt; b\">"));
  assert!(xml.contains("second line"));
  assert!(!xml.contains('\u{1b}'));
  assert!(xml.contains("<error type=\"error\" message=\"boom &amp; bust\">"));
  assert!(xml.contains("<skipped type=\"skipped\" message=\"not on CI\"/>"));
  assert!(xml.contains("failures=\"2\" skipped=\"1\""));
}

#[test]
fn test_requeued_and_discarded_results_are_left_out() {
  let mut reporter = JunitXmlReporter::new(Vec::new());
  reporter.record(&result("Suite#test_retry", Outcome::failed("flaky").requeue(1, 2), true));
  reporter.record(&result(
    "Suite#test_late",
    Outcome::passed(1, Duration::ZERO),
    false,
  ));
  assert!(reporter.is_empty());

  reporter.report(&summary());
  let xml = document(reporter);
  assert!(xml.contains("<testsuites>"));
  assert!(!xml.contains("<testsuite "));
  assert!(!xml.contains("test_retry"));
  assert!(!xml.contains("test_late"));
}

#[test]
fn test_identifier_without_separator_names_both() {
  let mut reporter = JunitXmlReporter::new(Vec::new());
  reporter.record(&result("standalone", Outcome::passed(1, Duration::ZERO), true));
  reporter.report(&summary());

  let xml = document(reporter);
  assert!(xml.contains("<testsuite name=\"standalone\""));
  assert!(xml.contains("<testcase name=\"standalone\" classname=\"standalone\""));
}

#[test]
fn test_summary_line_keeps_first_printable_line() {
  assert_eq!(summary_line("\u{1b}[1;31mBroken\u{1b}[0m\nmore"), "Broken");
  assert_eq!(summary_line("tab\there\u{7}"), "tab\there");
  assert_eq!(summary_line(""), "");
  assert_eq!(printable("a\u{0}b\nc"), "ab\nc");
}
