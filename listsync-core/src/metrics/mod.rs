/*
    Metrics - Sync and list counters for monitoring

    Provides counters and gauges for:
    - Relay traffic (events received, duplicates suppressed, relay failures)
    - List state (lists created, updates applied, stale or malformed events)
    - Request bookkeeping (requests opened, fetches coalesced, owners tracked)

    Recording is a no-op until the host installs a `metrics` recorder.
*/

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    // Relay traffic
    describe_counter!(
        "listsync_events_total",
        "Events reaching a request dispatcher, labeled by result (delivered, duplicate, rejected)"
    );

    describe_counter!(
        "listsync_relay_failures_total",
        "Relay subscriptions that failed, timed out, or closed before end of stored events"
    );

    describe_counter!(
        "listsync_requests_opened_total",
        "Multi-relay requests opened"
    );

    // List state
    describe_counter!(
        "listsync_list_events_total",
        "List events routed to an owner, labeled by outcome (created, updated, stale, malformed)"
    );

    describe_counter!(
        "listsync_fetches_coalesced_total",
        "Fetches answered by an owner request already in flight"
    );

    describe_gauge!(
        "listsync_tracked_owners",
        "Owners with a list cell in the directory"
    );
}

/// Record an event handed to a request handler
pub fn event_received() {
    counter!("listsync_events_total", "result" => "delivered").increment(1);
}

/// Record an event suppressed because its id was already delivered
pub fn event_duplicate() {
    counter!("listsync_events_total", "result" => "duplicate").increment(1);
}

/// Record an event dropped for not matching the request filter
pub fn event_rejected() {
    counter!("listsync_events_total", "result" => "rejected").increment(1);
}

pub fn relay_failed() {
    counter!("listsync_relay_failures_total").increment(1);
}

pub fn request_opened() {
    counter!("listsync_requests_opened_total").increment(1);
}

/// Record a list seen for the first time
pub fn list_created() {
    counter!("listsync_list_events_total", "outcome" => "created").increment(1);
}

/// Record a newer revision replacing a list's event
pub fn list_updated() {
    counter!("listsync_list_events_total", "outcome" => "updated").increment(1);
}

/// Record a revision that lost last-write-wins
pub fn list_event_stale() {
    counter!("listsync_list_events_total", "outcome" => "stale").increment(1);
}

/// Record a list event that could not be interpreted
pub fn list_event_malformed() {
    counter!("listsync_list_events_total", "outcome" => "malformed").increment(1);
}

pub fn fetch_coalesced() {
    counter!("listsync_fetches_coalesced_total").increment(1);
}

/// Update tracked owners gauge
pub fn set_tracked_owners(count: usize) {
    gauge!("listsync_tracked_owners").set(count as f64);
}
