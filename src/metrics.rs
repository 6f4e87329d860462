use crate::models::SyncSummary;
use tracing::trace;

// Lightweight metrics helpers that are safe in demo builds.
// These intentionally avoid pulling in metrics macros to keep deps stable.

pub fn inc_requests(route: &'static str) {
    trace!(target = "sync.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "sync.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn record_sync(summary: &SyncSummary) {
    trace!(
        target = "sync.metrics",
        account_id = %summary.account_id,
        fetched = summary.total_fetched,
        imported = summary.imported,
        updated = summary.updated,
        skipped = summary.skipped,
        errors = summary.errors.len(),
        pages = summary.pages_fetched,
        truncated = summary.truncated,
        "sync_recorded"
    );
}
