//! Tracing/logging setup shared by the medstock binaries.

/// Initialize process-wide tracing/logging in the given format.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(format: LogFormat) {
    tracing::init(format);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use crate::tracing::{LogFormat, ParseLogFormatError};
