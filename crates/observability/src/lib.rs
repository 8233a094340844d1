//! Tracing, logging and the warning metrics the batch engine reports.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

/// OpenTelemetry counters for operational warnings.
pub mod metrics;
