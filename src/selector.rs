//! # Test Selection
//!
//! Decides which tests a run consists of, before any of them is published.
//!
//! A [`Selector`] hands the leader an ordered list of test identifiers
//! (`"Suite#test_name"`). The coordinator treats that list as given.
//!
//! [`TestSelector`] is the standard implementation: it starts from a list of
//! discovered identifiers, optionally shuffles the order of the suites with a
//! fixed seed (so every worker would compute the same order), and then passes
//! each identifier through a chain of [`Filter`]s.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use regex::Regex;
use std::collections::HashSet;
use std::io;
use std::path::Path;

/// Source of the tests that make up a run.
pub trait Selector: Send + Sync {
  /// The identifiers to run, in order.
  fn tests(&self) -> Vec<String>;
}

impl Selector for Vec<String> {
  fn tests(&self) -> Vec<String> {
    self.clone()
  }
}

/// Maps one identifier to the identifiers that should run in its place.
///
/// Returning an empty vector drops the test; returning it unchanged keeps it.
pub trait Filter: Send + Sync {
  /// Applies the filter to one identifier.
  fn call(&self, identifier: &str) -> Vec<String>;
}

/// A name pattern: either an exact name or a `/regex/`.
#[derive(Debug, Clone)]
pub enum Pattern {
  /// Matches a test name or full identifier exactly.
  Exact(String),
  /// Matches a test name or full identifier against a regular expression.
  Regex(Regex),
}

impl Pattern {
  /// Parses `"/expr/"` as a regular expression and anything else as an exact
  /// name.
  pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
    match pattern
      .strip_prefix('/')
      .and_then(|rest| rest.strip_suffix('/'))
    {
      Some(expr) => Ok(Pattern::Regex(Regex::new(expr)?)),
      None => Ok(Pattern::Exact(pattern.to_string())),
    }
  }

  /// True when either the test name (after `#`) or the whole identifier
  /// matches.
  #[must_use]
  pub fn matches(&self, identifier: &str) -> bool {
    let name = test_name(identifier);
    match self {
      Pattern::Exact(exact) => exact == name || exact == identifier,
      Pattern::Regex(regex) => regex.is_match(name) || regex.is_match(identifier),
    }
  }
}

/// Keeps only tests matching a pattern.
#[derive(Debug, Clone)]
pub struct IncludeFilter {
  pattern: Pattern,
}

impl IncludeFilter {
  /// Creates the filter.
  #[must_use]
  pub fn new(pattern: Pattern) -> Self {
    Self { pattern }
  }
}

impl Filter for IncludeFilter {
  fn call(&self, identifier: &str) -> Vec<String> {
    if self.pattern.matches(identifier) {
      vec![identifier.to_string()]
    } else {
      Vec::new()
    }
  }
}

/// Drops tests matching a pattern.
#[derive(Debug, Clone)]
pub struct ExcludeFilter {
  pattern: Pattern,
}

impl ExcludeFilter {
  /// Creates the filter.
  #[must_use]
  pub fn new(pattern: Pattern) -> Self {
    Self { pattern }
  }
}

impl Filter for ExcludeFilter {
  fn call(&self, identifier: &str) -> Vec<String> {
    if self.pattern.matches(identifier) {
      Vec::new()
    } else {
      vec![identifier.to_string()]
    }
  }
}

/// Reads a file with one test identifier per line.
fn read_identifiers(path: &Path) -> io::Result<HashSet<String>> {
  let contents = std::fs::read_to_string(path)?;
  Ok(
    contents
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(str::to_string)
      .collect(),
  )
}

/// Keeps only the tests listed in a file.
#[derive(Debug, Clone)]
pub struct IncludeFileFilter {
  tests: HashSet<String>,
}

impl IncludeFileFilter {
  /// Loads the list of tests from `path`.
  pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
    Ok(Self {
      tests: read_identifiers(path.as_ref())?,
    })
  }
}

impl Filter for IncludeFileFilter {
  fn call(&self, identifier: &str) -> Vec<String> {
    if self.tests.contains(identifier) {
      vec![identifier.to_string()]
    } else {
      Vec::new()
    }
  }
}

/// Drops the tests listed in a file.
#[derive(Debug, Clone)]
pub struct ExcludeFileFilter {
  tests: HashSet<String>,
}

impl ExcludeFileFilter {
  /// Loads the list of tests from `path`.
  pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
    Ok(Self {
      tests: read_identifiers(path.as_ref())?,
    })
  }
}

impl Filter for ExcludeFileFilter {
  fn call(&self, identifier: &str) -> Vec<String> {
    if self.tests.contains(identifier) {
      Vec::new()
    } else {
      vec![identifier.to_string()]
    }
  }
}

/// Selects tests from a discovered list.
pub struct TestSelector {
  discovered: Vec<String>,
  filters: Vec<Box<dyn Filter>>,
  shuffle_seed: Option<u64>,
}

impl TestSelector {
  /// Selects from `discovered`, in the given order, with no filters.
  #[must_use]
  pub fn new(discovered: Vec<String>) -> Self {
    Self {
      discovered,
      filters: Vec::new(),
      shuffle_seed: None,
    }
  }

  /// Appends a filter to the chain.
  #[must_use]
  pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
    self.filters.push(Box::new(filter));
    self
  }

  /// Shuffles suite order with the given seed.
  #[must_use]
  pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
    self.shuffle_seed = Some(seed);
    self
  }

  /// Discovered tests, with suites shuffled when a seed is set. Tests inside
  /// one suite keep their relative order.
  #[must_use]
  pub fn discover(&self) -> Vec<String> {
    let Some(seed) = self.shuffle_seed else {
      return self.discovered.clone();
    };

    let mut suites: Vec<(&str, Vec<String>)> = Vec::new();
    for identifier in &self.discovered {
      let suite = suite_name(identifier);
      match suites.iter_mut().find(|(name, _)| *name == suite) {
        Some((_, tests)) => tests.push(identifier.clone()),
        None => suites.push((suite, vec![identifier.clone()])),
      }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    suites.shuffle(&mut rng);
    suites.into_iter().flat_map(|(_, tests)| tests).collect()
  }

  /// Passes every identifier through the filter chain.
  #[must_use]
  pub fn select(&self, tests: Vec<String>) -> Vec<String> {
    self.filters.iter().fold(tests, |tests, filter| {
      tests
        .iter()
        .flat_map(|identifier| filter.call(identifier))
        .collect()
    })
  }
}

impl Selector for TestSelector {
  fn tests(&self) -> Vec<String> {
    self.select(self.discover())
  }
}

fn suite_name(identifier: &str) -> &str {
  identifier
    .split_once('#')
    .map_or(identifier, |(suite, _)| suite)
}

fn test_name(identifier: &str) -> &str {
  identifier
    .split_once('#')
    .map_or(identifier, |(_, name)| name)
}
