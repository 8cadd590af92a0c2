//! Tracing and logging setup shared by every binary and test harness.

/// Initialize process-wide tracing with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize process-wide tracing with the given output format.
pub fn init_with(format: LogFormat) {
    tracing::init_with(format);
}

/// Tracing configuration (filters, layers, formats).
pub mod tracing;

pub use tracing::{LogFormat, UnknownLogFormat};
