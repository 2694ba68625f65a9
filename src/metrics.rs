use crate::catalog::Direction;
use tracing::trace;

// Trace-based counters; the Prometheus recorder scrapes what it needs and
// nothing here touches the hot path.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "blogsmith.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "blogsmith.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

/// Token spend per finished generation, successful or not.
pub fn generation_spend(model: &str, attempts: u32, total_tokens: u32) {
    trace!(
        target = "blogsmith.metrics",
        model = model,
        attempts = attempts,
        total_tokens = total_tokens,
        "generation_spend"
    );
}

pub fn walk_page(direction: Direction, pages_fetched: u32, items_collected: usize) {
    trace!(
        target = "blogsmith.metrics",
        direction = %direction,
        pages_fetched = pages_fetched,
        items_collected = items_collected as u64,
        "walk_page"
    );
}
