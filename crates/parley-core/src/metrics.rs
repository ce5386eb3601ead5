//! Engine-level metrics.
//!
//! Recorded through the `metrics` facade; the server decides whether an
//! exporter is installed.

use metrics::{counter, histogram};

/// Metric names.
pub mod names {
    pub const CHAT_MESSAGES_TOTAL: &str = "parley_chat_messages_total";
    pub const PERSIST_FAILURES_TOTAL: &str = "parley_persist_failures_total";
    pub const FANOUT_DROPPED_TOTAL: &str = "parley_fanout_dropped_total";
    pub const TYPING_EXPIRED_TOTAL: &str = "parley_typing_expired_total";
    pub const ROUTE_SECONDS: &str = "parley_route_seconds";
}

/// Describe the engine metrics to the installed recorder.
pub fn describe() {
    metrics::describe_counter!(names::CHAT_MESSAGES_TOTAL, "Chat messages routed");
    metrics::describe_counter!(
        names::PERSIST_FAILURES_TOTAL,
        "Chat messages delivered without being persisted"
    );
    metrics::describe_counter!(
        names::FANOUT_DROPPED_TOTAL,
        "Outbound frames dropped because a connection queue was full or closed"
    );
    metrics::describe_counter!(
        names::TYPING_EXPIRED_TOTAL,
        "Typing records removed by the idle sweep"
    );
    metrics::describe_histogram!(names::ROUTE_SECONDS, "Time to persist and fan out one chat message");
}

pub fn record_chat_message() {
    counter!(names::CHAT_MESSAGES_TOTAL).increment(1);
}

pub fn record_persist_failure() {
    counter!(names::PERSIST_FAILURES_TOTAL).increment(1);
}

/// Record frames dropped during fan-out, labelled by frame kind.
pub fn record_fanout_dropped(kind: &'static str, count: usize) {
    if count > 0 {
        counter!(names::FANOUT_DROPPED_TOTAL, "kind" => kind).increment(count as u64);
    }
}

pub fn record_typing_expired(count: usize) {
    if count > 0 {
        counter!(names::TYPING_EXPIRED_TOTAL).increment(count as u64);
    }
}

pub fn record_route_latency(seconds: f64) {
    histogram!(names::ROUTE_SECONDS).record(seconds);
}
