//! Tracing/logging setup shared by storefront binaries.

/// Initialize process-wide tracing/logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, formatters).
pub mod tracing;

pub use tracing::{LOG_FORMAT_ENV, LogFormat};
