//! Shared tracing/logging initialization.
//!
//! The `selfverify` binary and embedding applications use the same pattern
//! for setting up `tracing_subscriber` with an env-filter and optional JSON
//! output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"selfverify_session=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
///
/// Logs go to stderr so that command output on stdout stays parseable.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Build the default filter directive for the workspace crates at `level`.
pub fn default_filter(level: &str) -> String {
    format!(
        "selfverify={level},selfverify_cli={level},selfverify_session={level},selfverify_core={level}"
    )
}

/// Initialise tracing from a resolved [`LoggingConfig`].
pub fn init_from_config(logging: &LoggingConfig) {
    init_tracing(&default_filter(&logging.level), logging.json);
}
