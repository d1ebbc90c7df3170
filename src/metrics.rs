use tracing::trace;

// Lightweight metrics helpers that stay safe without a recorder wired up.
// The Prometheus recorder installed in main captures the HTTP layer; these
// trace events cover the app-level counters.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "poketrack.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn enrich_summary(total: usize, with_images: usize, elapsed_ms: u128) {
    trace!(
        target = "poketrack.metrics",
        total = total,
        with_images = with_images,
        elapsed_ms = elapsed_ms as u64,
        "enrich_batch_summary"
    );
}

pub fn price_lookup_outcome(outcome: &'static str) {
    trace!(
        target = "poketrack.metrics",
        outcome = outcome,
        "price_lookup_outcome"
    );
}
