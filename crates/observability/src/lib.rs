//! Tracing and logging setup shared by the scenecraft binaries.

/// Initialize process-wide logging with the default filter (`info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env(), "info");
}

/// Tracing configuration (filters, formats).
pub mod tracing;
