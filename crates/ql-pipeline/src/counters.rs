//! `metrics`-backed implementation of `ql_common::Counters`.
//!
//! Besides exporting to whatever recorder the binary installs, this keeps a
//! couple of plain atomics locally: the shutdown coordinator needs to know
//! when in-flight events have settled to zero, and a `metrics::Gauge` isn't
//! cheaply readable back.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use ql_common::Counters;

#[derive(Default)]
pub struct PipelineCounters {
    objects_active: AtomicI64,
    events_active: AtomicI64,
    object_errors: AtomicU64,
    parser_errors: AtomicU64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects currently read but not yet fully processed.
    pub fn objects_active(&self) -> i64 {
        self.objects_active.load(Ordering::SeqCst)
    }

    /// Events published but not yet ACKed by the sink.
    pub fn events_active(&self) -> i64 {
        self.events_active.load(Ordering::SeqCst)
    }

    pub fn object_error_total(&self) -> u64 {
        self.object_errors.load(Ordering::SeqCst)
    }

    pub fn parser_error_total(&self) -> u64 {
        self.parser_errors.load(Ordering::SeqCst)
    }
}

impl Counters for PipelineCounters {
    fn objects_added(&self, n: u64) {
        self.objects_active.fetch_add(n as i64, Ordering::SeqCst);
        metrics::counter!("quaylog_objects_added_total").increment(n);
        metrics::gauge!("quaylog_objects_active").increment(n as f64);
    }

    fn objects_done(&self, n: u64) {
        self.objects_active.fetch_sub(n as i64, Ordering::SeqCst);
        metrics::counter!("quaylog_objects_done_total").increment(n);
        metrics::gauge!("quaylog_objects_active").decrement(n as f64);
    }

    fn object_errors(&self, n: u64) {
        self.object_errors.fetch_add(n, Ordering::SeqCst);
        metrics::counter!("quaylog_object_errors_total").increment(n);
    }

    fn events_added(&self, n: u64) {
        self.events_active.fetch_add(n as i64, Ordering::SeqCst);
        metrics::counter!("quaylog_events_added_total").increment(n);
        metrics::gauge!("quaylog_events_active").increment(n as f64);
    }

    fn events_acked(&self, n: u64) {
        self.events_active.fetch_sub(n as i64, Ordering::SeqCst);
        metrics::counter!("quaylog_events_acked_total").increment(n);
        metrics::gauge!("quaylog_events_active").decrement(n as f64);
    }

    fn parser_errors(&self, n: u64) {
        self.parser_errors.fetch_add(n, Ordering::SeqCst);
        metrics::counter!("quaylog_parser_errors_total").increment(n);
    }

    fn sqs_messages_active(&self, delta: i64) {
        metrics::gauge!("quaylog_sqs_messages_active").increment(delta as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_active_objects_and_events() {
        let counters = PipelineCounters::new();
        counters.objects_added(3);
        counters.events_added(5);
        assert_eq!(counters.objects_active(), 3);
        assert_eq!(counters.events_active(), 5);
        counters.objects_done(1);
        counters.events_acked(2);
        assert_eq!(counters.objects_active(), 2);
        assert_eq!(counters.events_active(), 3);
    }
}
