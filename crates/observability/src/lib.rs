//! Tracing and logging setup shared by the binaries and black-box tests.

/// Initialize process-wide logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use tracing::{LogFormat, init_for_tests, init_with};
