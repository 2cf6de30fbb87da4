//! Logging setup and the diagnostic sink for swallowed telemetry failures.

use crate::config::LogLevel;
use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber for the host binary. `RUST_LOG` overrides the
/// level-derived default. Safe to call more than once.
pub fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.filter_directive()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Report a failure that telemetry is about to swallow. Silent unless the host
/// runs at diagnostic verbosity.
pub fn report_failure(level: LogLevel, what: &str, err: &dyn std::fmt::Display) -> bool {
    if level < LogLevel::Diagnostic {
        return false;
    }
    tracing::error!("telemetry {} failed: {}", what, err);
    true
}
