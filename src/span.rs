//! Child span records, child-duration accounting and span hand-off.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::budget::SpanBudget;
use crate::classifier::SpanDescriptor;
use crate::clock;

/// Aggregates the time covered by a transaction's children.
///
/// Queried by the transaction when it stops, to derive self-time. Stop
/// readings may arrive out of order: a child abandoned before it was stopped
/// reports its own start reading.
pub trait ChildDurationAggregator: Send + Sync + fmt::Debug {
    fn child_started(&self, clock: u64);
    fn child_stopped(&self, clock: u64);
    /// Total child time in microseconds.
    fn total(&self) -> u64;
}

/// Counts the union of child intervals: while any child is open time is
/// attributed to children, and overlapping children are not double counted.
#[derive(Debug, Default)]
pub struct ChildDurations {
    inner: Mutex<ChildDurationsInner>,
}

#[derive(Debug, Default)]
struct ChildDurationsInner {
    open: usize,
    opened_at: u64,
    closed_at: u64,
    total: u64,
}

impl ChildDurations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Children started and not yet stopped or dropped.
    pub fn open(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).open
    }
}

impl ChildDurationAggregator for ChildDurations {
    fn child_started(&self, clock: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.open == 0 {
            inner.opened_at = clock;
            inner.closed_at = clock;
        }
        inner.open += 1;
    }

    fn child_stopped(&self, clock: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.open == 0 {
            return;
        }
        inner.open -= 1;
        inner.closed_at = inner.closed_at.max(clock);
        if inner.open == 0 {
            inner.total += inner.closed_at.saturating_sub(inner.opened_at);
        }
    }

    fn total(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).total
    }
}

/// Random 64-bit id as 16 lowercase hex digits.
pub(crate) fn random_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Random 128-bit trace id as 32 lowercase hex digits.
pub(crate) fn random_trace_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// A database span recorded against a transaction.
///
/// A span is owned by exactly one caller. Dropping it unstopped, e.g. when
/// the statement's future is cancelled, closes it in the aggregator without
/// attributing any child time.
#[derive(Debug, Serialize)]
pub struct Span {
    pub id: String,
    pub transaction_id: String,
    pub trace_id: String,
    pub parent_id: String,
    #[serde(flatten)]
    pub descriptor: SpanDescriptor,
    /// Wall-clock start, microseconds since the Unix epoch.
    pub timestamp: u64,
    /// Duration in microseconds, set once stopped.
    pub duration: Option<u64>,
    #[serde(skip)]
    clock_start: u64,
    #[serde(skip)]
    aggregator: Arc<dyn ChildDurationAggregator>,
}

impl Span {
    pub fn is_stopped(&self) -> bool {
        self.duration.is_some()
    }

    /// Stop the span at a monotonic reading. Stopping twice has no effect.
    pub fn stop(&mut self, clock_end: u64) {
        if self.is_stopped() {
            return;
        }
        self.duration = Some(clock_end.saturating_sub(self.clock_start));
        self.aggregator.child_stopped(clock_end);
    }

    pub fn stop_now(&mut self) {
        self.stop(clock::monotonic_micros());
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if !self.is_stopped() {
            self.aggregator.child_stopped(self.clock_start);
        }
    }
}

/// Receives finished spans for transport.
pub trait SpanSink: Send + Sync + fmt::Debug {
    fn report(&self, span: Span);
}

/// Emits finished spans as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl SpanSink for TracingSink {
    fn report(&self, span: Span) {
        tracing::debug!(
            span.id = %span.id,
            transaction.id = %span.transaction_id,
            span.name = %span.descriptor.name,
            span.subtype = %span.descriptor.subtype,
            db.statement = %span.descriptor.statement(),
            duration_us = span.duration.unwrap_or(0),
            "span finished"
        );
    }
}

/// A cloneable handle for recording spans against one transaction from any thread.
#[derive(Debug, Clone)]
pub struct SpanRecorder {
    pub(crate) transaction_id: String,
    pub(crate) trace_id: String,
    pub(crate) sampled: bool,
    pub(crate) budget: Arc<SpanBudget>,
    pub(crate) aggregator: Arc<dyn ChildDurationAggregator>,
}

impl SpanRecorder {
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Start a span at a monotonic reading.
    ///
    /// Returns `None` when the transaction is unsampled or its span budget is
    /// exhausted; the caller still runs the operation, it just is not recorded.
    pub fn start_span(&self, descriptor: SpanDescriptor, clock_start: u64) -> Option<Span> {
        if !self.sampled || !self.budget.try_admit() {
            return None;
        }

        self.aggregator.child_started(clock_start);
        Some(Span {
            id: random_id(),
            transaction_id: self.transaction_id.clone(),
            trace_id: self.trace_id.clone(),
            parent_id: self.transaction_id.clone(),
            descriptor,
            timestamp: clock::wall_micros(),
            duration: None,
            clock_start,
            aggregator: self.aggregator.clone(),
        })
    }

    pub fn start_span_now(&self, descriptor: SpanDescriptor) -> Option<Span> {
        self.start_span(descriptor, clock::monotonic_micros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::SpanCounts;
    use crate::classifier::{SpanClassifier, SqlEvent, SQL_EVENT};

    fn recorder(max: usize, sampled: bool) -> SpanRecorder {
        SpanRecorder {
            transaction_id: random_id(),
            trace_id: random_trace_id(),
            sampled,
            budget: Arc::new(SpanBudget::new(max)),
            aggregator: Arc::new(ChildDurations::new()),
        }
    }

    fn descriptor() -> SpanDescriptor {
        SpanClassifier::new()
            .classify(SQL_EVENT, &SqlEvent::new("SELECT 1"))
            .unwrap()
    }

    #[test]
    fn test_sequential_children_sum() {
        let durations = ChildDurations::new();
        durations.child_started(10);
        durations.child_stopped(30);
        durations.child_started(50);
        durations.child_stopped(55);
        assert_eq!(durations.total(), 25);
    }

    #[test]
    fn test_overlapping_children_count_once() {
        let durations = ChildDurations::new();
        durations.child_started(10);
        durations.child_started(20);
        durations.child_stopped(40);
        durations.child_stopped(60);
        assert_eq!(durations.total(), 50);
    }

    #[test]
    fn test_overlap_closed_by_earlier_reading() {
        let durations = ChildDurations::new();
        durations.child_started(10);
        durations.child_started(20);
        durations.child_stopped(50);
        durations.child_stopped(20);
        assert_eq!(durations.total(), 40);
    }

    #[test]
    fn test_unbalanced_stop_ignored() {
        let durations = ChildDurations::new();
        durations.child_stopped(100);
        assert_eq!(durations.total(), 0);
    }

    #[test]
    fn test_ids() {
        assert_eq!(random_id().len(), 16);
        assert_eq!(random_trace_id().len(), 32);
    }

    #[test]
    fn test_span_lifecycle() {
        let recorder = recorder(10, true);
        let mut span = recorder.start_span(descriptor(), 100).unwrap();
        assert!(!span.is_stopped());
        assert_eq!(span.parent_id, recorder.transaction_id());

        span.stop(160);
        span.stop(500);
        assert_eq!(span.duration, Some(60));
        assert_eq!(recorder.aggregator.total(), 60);
    }

    #[test]
    fn test_dropped_span_releases_aggregator() {
        let recorder = recorder(10, true);
        let abandoned = recorder.start_span(descriptor(), 5).unwrap();
        drop(abandoned);

        let mut span = recorder.start_span(descriptor(), 10).unwrap();
        span.stop(90);
        assert_eq!(recorder.aggregator.total(), 80);
    }

    #[test]
    fn test_dropped_span_within_overlap() {
        let recorder = recorder(10, true);
        let mut first = recorder.start_span(descriptor(), 10).unwrap();
        let second = recorder.start_span(descriptor(), 20).unwrap();
        first.stop(50);
        drop(second);
        assert_eq!(recorder.aggregator.total(), 40);
    }

    #[test]
    fn test_stopped_span_drop_is_noop() {
        let recorder = recorder(10, true);
        let mut span = recorder.start_span(descriptor(), 10).unwrap();
        span.stop(30);
        drop(span);
        assert_eq!(recorder.aggregator.total(), 20);
    }

    #[test]
    fn test_recorder_respects_budget() {
        let recorder = recorder(1, true);
        assert!(recorder.start_span(descriptor(), 0).is_some());
        assert!(recorder.start_span(descriptor(), 0).is_none());
        assert_eq!(recorder.budget.snapshot().dropped, 1);
    }

    #[test]
    fn test_unsampled_records_nothing() {
        let recorder = recorder(10, false);
        assert!(recorder.start_span(descriptor(), 0).is_none());
        assert_eq!(recorder.budget.snapshot(), SpanCounts::default());
    }

    #[test]
    fn test_span_serializes_flat() {
        let recorder = recorder(10, true);
        let mut span = recorder.start_span(descriptor(), 0).unwrap();
        span.stop(5);
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["type"], "db");
        assert_eq!(json["duration"], 5);
        assert!(json.get("clock_start").is_none());
    }
}
