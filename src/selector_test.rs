//! # Test Selection Test Suite
//!
//! Pattern matching, include/exclude filters (by pattern and by file),
//! filter chaining and seeded suite shuffling.

use crate::selector::{
  ExcludeFileFilter, ExcludeFilter, IncludeFileFilter, IncludeFilter, Pattern, Selector,
  TestSelector,
};
use std::io::Write;

fn discovered() -> Vec<String> {
  [
    "AlphaTest#test_one",
    "AlphaTest#test_two",
    "BetaTest#test_one",
    "GammaTest#test_three",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

#[test]
fn test_exact_pattern_matches_name_or_identifier() {
  let pattern = Pattern::parse("test_one").unwrap();
  assert!(pattern.matches("AlphaTest#test_one"));
  assert!(!pattern.matches("AlphaTest#test_two"));

  let full = Pattern::parse("BetaTest#test_one").unwrap();
  assert!(full.matches("BetaTest#test_one"));
  assert!(!full.matches("AlphaTest#test_one"));
}

#[test]
fn test_regex_pattern() {
  let pattern = Pattern::parse("/^test_t/").unwrap();
  assert!(pattern.matches("AlphaTest#test_two"));
  assert!(pattern.matches("GammaTest#test_three"));
  assert!(!pattern.matches("AlphaTest#test_one"));
}

#[test]
fn test_invalid_regex() {
  assert!(Pattern::parse("/(/").is_err());
}

#[test]
fn test_without_filters_keeps_order() {
  let selector = TestSelector::new(discovered());
  assert_eq!(selector.tests(), discovered());
}

#[test]
fn test_include_and_exclude_chain() {
  let selector = TestSelector::new(discovered())
    .with_filter(IncludeFilter::new(Pattern::parse("/^test_(one|two)$/").unwrap()))
    .with_filter(ExcludeFilter::new(Pattern::parse("BetaTest#test_one").unwrap()));

  assert_eq!(
    selector.tests(),
    vec!["AlphaTest#test_one".to_string(), "AlphaTest#test_two".to_string()]
  );
}

#[test]
fn test_file_filters() {
  let mut include = tempfile::NamedTempFile::new().unwrap();
  writeln!(include, "AlphaTest#test_one\n\n  BetaTest#test_one  \nGammaTest#test_three").unwrap();
  let mut exclude = tempfile::NamedTempFile::new().unwrap();
  writeln!(exclude, "GammaTest#test_three").unwrap();

  let selector = TestSelector::new(discovered())
    .with_filter(IncludeFileFilter::from_file(include.path()).unwrap())
    .with_filter(ExcludeFileFilter::from_file(exclude.path()).unwrap());

  assert_eq!(
    selector.tests(),
    vec!["AlphaTest#test_one".to_string(), "BetaTest#test_one".to_string()]
  );
}

#[test]
fn test_missing_file() {
  assert!(IncludeFileFilter::from_file("/nonexistent/testweave/include.txt").is_err());
}

#[test]
fn test_shuffle_keeps_suites_together() {
  let selector = TestSelector::new(discovered()).with_shuffle_seed(1234);
  let shuffled = selector.tests();

  let mut sorted = shuffled.clone();
  sorted.sort();
  assert_eq!(sorted, discovered());

  let alpha: Vec<usize> = shuffled
    .iter()
    .enumerate()
    .filter(|(_, id)| id.starts_with("AlphaTest#"))
    .map(|(index, _)| index)
    .collect();
  assert_eq!(alpha[1], alpha[0] + 1);
  let first = shuffled.iter().position(|id| id == "AlphaTest#test_one").unwrap();
  let second = shuffled.iter().position(|id| id == "AlphaTest#test_two").unwrap();
  assert!(first < second);
}

#[test]
fn test_shuffle_is_reproducible() {
  let a = TestSelector::new(discovered()).with_shuffle_seed(99).tests();
  let b = TestSelector::new(discovered()).with_shuffle_seed(99).tests();
  assert_eq!(a, b);
}

#[test]
fn test_vec_is_a_selector() {
  let tests = discovered();
  assert_eq!(Selector::tests(&tests), discovered());
}
