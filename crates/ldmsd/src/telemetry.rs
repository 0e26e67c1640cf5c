//! Tracing subscriber installation.
//!
//! The configured filter is an `EnvFilter` expression. The daemon's
//! traditional level names (`DEBUG`, `INFO`, `WARNING`, `ERROR`,
//! `CRITICAL`, `QUIET`) are accepted as whole-filter shorthands.

use std::io::{self, IsTerminal};

use ldmsd_config::{Config, LogFormat};
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Proof that the global subscriber is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Filter as configured.
        filter: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Another subscriber is already the global default.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on the first call.
///
/// Later calls return a handle without touching the global state.
///
/// # Errors
///
/// Fails when the filter is invalid or a foreign subscriber is installed.
///
/// # Examples
///
/// ```rust
/// use ldmsd_config::Config;
/// use ldmsd::telemetry;
///
/// # fn main() -> Result<(), ldmsd::telemetry::TelemetryError> {
/// let config = Config::default();
/// let first = telemetry::initialise(&config)?;
/// let second = telemetry::initialise(&config)?;
/// drop((first, second));
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| install(config))
        .map(|()| TelemetryHandle)
}

/// Translates a daemon level name into a filter directive; anything else
/// passes through untouched.
#[must_use]
pub fn filter_directive(filter: &str) -> &str {
    match filter.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        "QUIET" => "off",
        _ => filter,
    }
}

/// Parses the configured filter.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] when the expression is invalid.
pub fn build_filter(filter: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(filter_directive(filter)).map_err(|error| TelemetryError::Filter {
        filter: filter.to_owned(),
        message: error.to_string(),
    })
}

fn install(config: &Config) -> Result<(), TelemetryError> {
    let filter = build_filter(config.log_filter())?;
    let stderr = io::stderr();
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(stderr.is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::quiet("QUIET", "off")]
    #[case::critical("critical", "error")]
    #[case::warning("Warning", "warn")]
    #[case::debug(" DEBUG ", "debug")]
    #[case::directive("ldmsd::dispatch=debug,info", "ldmsd::dispatch=debug,info")]
    fn translates_daemon_levels(#[case] configured: &str, #[case] expected: &str) {
        assert_eq!(filter_directive(configured), expected);
    }

    #[rstest]
    fn rejects_unparsable_filters() {
        let error = build_filter("ldmsd=loud").expect_err("invalid filter");
        assert!(matches!(error, TelemetryError::Filter { ref filter, .. } if filter == "ldmsd=loud"));
    }
}
