//! Tracing and logging setup shared by the API and worker binaries.

/// Initialize process-wide tracing/logging.
///
/// The output format comes from `PHONESCAN_LOG_FORMAT` (`json` or `pretty`,
/// default `json`); an unknown value falls back to JSON. Safe to call
/// multiple times; subsequent calls are no-ops.
pub fn init() {
    let format = std::env::var(tracing::LOG_FORMAT_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    tracing::init_with(format);
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use tracing::{LogFormat, ParseLogFormatError};
