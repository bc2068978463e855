//! Metrics instrumentation for node-dns.
//!
//! All metrics are prefixed with `node_dns.`

use hickory_proto::rr::RecordType;
use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a handled DNS query.
pub fn record_query(rtype: RecordType, outcome: QueryOutcome, duration: std::time::Duration) {
    let outcome_str = match outcome {
        QueryOutcome::Success => "success",
        QueryOutcome::NxDomain => "nxdomain",
        QueryOutcome::Delegated => "delegated",
        QueryOutcome::ServFail => "servfail",
        QueryOutcome::FormErr => "formerr",
    };

    counter!("node_dns.query.count", "type" => rtype.to_string(), "outcome" => outcome_str)
        .increment(1);
    histogram!("node_dns.query.duration.seconds", "type" => rtype.to_string())
        .record(duration.as_secs_f64());
}

/// Terminal outcome of one query.
#[derive(Debug, Clone, Copy)]
pub enum QueryOutcome {
    /// Answered authoritatively (possibly with an empty answer section).
    Success,
    /// Name not covered; NXDOMAIN with SOA.
    NxDomain,
    /// Passed to the next handler in the chain.
    Delegated,
    /// Internal or upstream failure.
    ServFail,
    /// Malformed request answered FORMERR.
    FormErr,
}

/// Record a node watch event applied by the sync loop.
pub fn record_sync_event(event_type: SyncEventType) {
    let event_str = match event_type {
        SyncEventType::Apply => "apply",
        SyncEventType::Delete => "delete",
        SyncEventType::InitDone => "init_done",
        SyncEventType::Restarted => "restarted",
    };

    counter!("node_dns.sync.event.count", "event" => event_str).increment(1);
}

/// Node watch event types.
#[derive(Debug, Clone, Copy)]
pub enum SyncEventType {
    /// Node added or modified.
    Apply,
    /// Node deleted.
    Delete,
    /// Initial listing replayed; watch is live.
    InitDone,
    /// Watch restarted its listing; a fresh listing is being staged.
    Restarted,
}

/// Record that the sync loop exited.
pub fn record_sync_stopped() {
    counter!("node_dns.sync.stopped.count").increment(1);
}

/// Record index sizes (call periodically or on change).
pub fn record_index_counts(nodes: usize, reverse_entries: usize) {
    gauge!("node_dns.index.nodes.count").set(nodes as f64);
    gauge!("node_dns.index.reverse.count").set(reverse_entries as f64);
}

/// Record readiness of the sync loop.
pub fn record_ready(ready: bool) {
    gauge!("node_dns.sync.ready").set(if ready { 1.0 } else { 0.0 });
}

/// Record the SOA serial number.
pub fn record_serial(serial: u32) {
    gauge!("node_dns.index.serial").set(serial as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
