//! Tracing and logging setup shared by every binary.

/// Initialize process-wide logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Log format selection and subscriber installation.
pub mod tracing;

pub use crate::tracing::LogFormat;
