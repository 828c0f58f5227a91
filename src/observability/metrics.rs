//! Reconciliation counters.

use crate::core::error::ReconcileError;

/// Updates skipped because the rendered configuration matched the last applied one
pub const SYNC_SKIPPED_TOTAL: &str = "reconciler_sync_skipped_total";

/// Updates pushed to the gateway successfully
pub const SYNC_APPLIED_TOTAL: &str = "reconciler_sync_applied_total";

/// Updates that failed, labelled by error type
pub const SYNC_FAILED_TOTAL: &str = "reconciler_sync_failed_total";

/// Plugins emitted without defaults because filling them failed
pub const PLUGIN_FILL_FAILURES_TOTAL: &str = "reconciler_plugin_fill_failures_total";

pub fn record_sync_skipped() {
    metrics::counter!(SYNC_SKIPPED_TOTAL).increment(1);
}

pub fn record_sync_applied(strategy: &'static str) {
    metrics::counter!(SYNC_APPLIED_TOTAL, "strategy" => strategy).increment(1);
}

pub fn record_sync_failed(strategy: &'static str, error: &ReconcileError) {
    metrics::counter!(
        SYNC_FAILED_TOTAL,
        "strategy" => strategy,
        "error_type" => error.root_cause().error_type()
    )
    .increment(1);
}

pub fn record_plugin_fill_failure() {
    metrics::counter!(PLUGIN_FILL_FAILURES_TOTAL).increment(1);
}
