use tracing_subscriber::EnvFilter;

/// Variables consulted for the log filter, highest priority first.
pub const LOG_ENV_VARS: [&str; 2] = ["TESTWEAVE_LOG", "RUST_LOG"];

/// Directive used when no variable holds a valid filter.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Installs a `tracing_subscriber` formatter as the global default.
///
/// Coordinator events carry `worker` and, where known, `run_id` and `test`
/// fields. Returns false when a global subscriber was already installed, in
/// which case that one keeps receiving events.
pub fn init_tracing() -> bool {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter())
    .try_init()
    .is_ok()
}

/// The filter [`init_tracing`] uses: the first of [`LOG_ENV_VARS`] that is
/// set, non-empty and parses, else [`DEFAULT_DIRECTIVE`].
pub fn env_filter() -> EnvFilter {
  LOG_ENV_VARS
    .iter()
    .filter_map(|key| std::env::var(key).ok())
    .find_map(|value| parse_filter(&value))
    .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

pub(crate) fn parse_filter(directives: &str) -> Option<EnvFilter> {
  let directives = directives.trim();
  if directives.is_empty() {
    return None;
  }
  EnvFilter::try_new(directives).ok()
}
