//! Structured logging to stderr.
//!
//! stdout carries rendered query output, so every event goes to stderr.
//! Filter priority: explicit filter > `OTTERSTAX_LOG` > `RUST_LOG` > default.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "OTTERSTAX_LOG";

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub verbose: bool,
    pub log_filter: Option<String>,
}

impl LogConfig {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            log_filter: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

/// Installs the global subscriber. Returns `false` when one was already set,
/// which happens when tests initialize logging more than once.
pub fn init_logging(config: &LogConfig) -> bool {
    let env_filter = build_env_filter(config);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(config.verbose)
        .without_time()
        .try_init()
        .is_ok()
}

fn build_env_filter(config: &LogConfig) -> EnvFilter {
    if let Some(filter) = config.log_filter.as_deref() {
        return EnvFilter::try_new(filter)
            .unwrap_or_else(|_| EnvFilter::new(default_log_filter(config.verbose)));
    }

    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter(config.verbose)))
}

#[must_use]
pub fn default_log_filter(verbose: bool) -> &'static str {
    if verbose {
        "warn,otterstax=debug,otterstax_core=debug,otterstax_adapters=debug,otterstax_app=debug"
    } else {
        "warn"
    }
}

#[cfg(test)]
mod tests {
    use super::{default_log_filter, init_logging, LogConfig};

    #[test]
    fn verbose_filter_raises_workspace_crates_only() {
        assert_eq!(default_log_filter(false), "warn");
        let verbose = default_log_filter(true);
        assert!(verbose.starts_with("warn,"));
        assert!(verbose.contains("otterstax_core=debug"));
    }

    #[test]
    fn second_initialization_is_reported_not_panicked() {
        let config = LogConfig::new(false).with_filter("not a == valid filter");
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}
