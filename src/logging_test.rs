use crate::logging::{env_filter, parse_filter};

#[test]
fn test_env_filter_always_has_a_directive() {
  assert!(!env_filter().to_string().is_empty());
}

#[test]
fn test_blank_directives_are_ignored() {
  assert!(parse_filter("").is_none());
  assert!(parse_filter("   ").is_none());
}

#[test]
fn test_directives_are_parsed() {
  let filter = parse_filter("testweave=debug").unwrap();
  assert_eq!(filter.to_string(), "testweave=debug");
}
