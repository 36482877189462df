//! Transaction lifecycle: timing, sampling, span bookkeeping and self-time.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::budget::{SpanBudget, SpanCounts};
use crate::clock;
use crate::config::ApmConfig;
use crate::error::{ApmError, Result};
use crate::span::{
    random_id, random_trace_id, ChildDurationAggregator, ChildDurations, SpanRecorder,
};

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Created,
    Started,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransactionContext {
    pub labels: BTreeMap<String, String>,
}

/// A timed unit of work and the bookkeeping for its child spans.
///
/// Owned by the code path that created it. Other threads record spans
/// through a [`SpanRecorder`] obtained from [`Transaction::recorder`].
///
/// ```rust
/// use sea_orm_apm::{ApmConfig, Transaction};
///
/// let mut transaction = Transaction::new("GET /users", "request", &ApmConfig::default());
/// transaction.start(1_000).unwrap();
/// transaction.done(Some("HTTP 2xx"), 4_000).unwrap();
///
/// assert_eq!(transaction.duration(), Some(3_000));
/// assert_eq!(transaction.self_time(), Some(3_000));
/// ```
#[derive(Debug, Serialize)]
pub struct Transaction {
    id: String,
    trace_id: String,
    parent_id: Option<String>,
    name: String,
    #[serde(rename = "type")]
    transaction_type: String,
    sampled: bool,
    context: TransactionContext,
    /// Wall-clock start, microseconds since the Unix epoch.
    timestamp: Option<u64>,
    /// Microseconds between start and stop.
    duration: Option<u64>,
    /// Duration minus time covered by child spans, in microseconds.
    self_time: Option<u64>,
    result: Option<String>,
    #[serde(rename = "span_count", serialize_with = "serialize_budget")]
    budget: Arc<SpanBudget>,
    #[serde(skip)]
    state: TransactionState,
    #[serde(skip)]
    clock_start: Option<u64>,
    #[serde(skip)]
    aggregator: Arc<dyn ChildDurationAggregator>,
}

fn serialize_budget<S: Serializer>(
    budget: &Arc<SpanBudget>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    budget.snapshot().serialize(serializer)
}

impl Transaction {
    /// Create an unstarted transaction in a new trace.
    ///
    /// The sampling decision is made here from the configured sample rate,
    /// and the configured default labels are copied into the context.
    pub fn new(
        name: impl Into<String>,
        transaction_type: impl Into<String>,
        config: &ApmConfig,
    ) -> Self {
        let rate = config.transaction_sample_rate;
        let sampled = rate >= 1.0 || (rate > 0.0 && rand::random::<f64>() < rate);

        Self {
            id: random_id(),
            trace_id: random_trace_id(),
            parent_id: None,
            name: name.into(),
            transaction_type: transaction_type.into(),
            sampled,
            context: TransactionContext {
                labels: config.default_labels.clone(),
            },
            timestamp: None,
            duration: None,
            self_time: None,
            result: None,
            budget: Arc::new(SpanBudget::new(config.transaction_max_spans)),
            state: TransactionState::Created,
            clock_start: None,
            aggregator: Arc::new(ChildDurations::new()),
        }
    }

    /// Join an existing trace as a child of `parent_id`.
    pub fn with_trace_context(
        mut self,
        trace_id: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        self.trace_id = trace_id.into();
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Override the sampling decision, e.g. with one propagated from upstream.
    pub fn with_sampled(mut self, sampled: bool) -> Self {
        self.sampled = sampled;
        self
    }

    /// Replace the child-duration aggregator queried at stop time.
    pub fn with_aggregator(mut self, aggregator: Arc<dyn ChildDurationAggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn transaction_type(&self) -> &str {
        &self.transaction_type
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state != TransactionState::Created
    }

    pub fn is_stopped(&self) -> bool {
        self.duration.is_some()
    }

    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context.labels.insert(key.into(), value.into());
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub fn duration(&self) -> Option<u64> {
        self.duration
    }

    pub fn self_time(&self) -> Option<u64> {
        self.self_time
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// Started and dropped span counts so far.
    pub fn span_counts(&self) -> SpanCounts {
        self.budget.snapshot()
    }

    /// Ask the span budget for room for one more span.
    pub fn try_admit_span(&self) -> bool {
        self.budget.try_admit()
    }

    /// A handle for recording child spans from any thread.
    pub fn recorder(&self) -> SpanRecorder {
        SpanRecorder {
            transaction_id: self.id.clone(),
            trace_id: self.trace_id.clone(),
            sampled: self.sampled,
            budget: self.budget.clone(),
            aggregator: self.aggregator.clone(),
        }
    }

    /// Start the transaction at a monotonic reading.
    pub fn start(&mut self, clock_start: u64) -> Result<()> {
        if self.state != TransactionState::Created {
            return Err(ApmError::AlreadyStarted(self.id.clone()));
        }
        self.timestamp = Some(clock::wall_micros());
        self.clock_start = Some(clock_start);
        self.state = TransactionState::Started;
        Ok(())
    }

    pub fn start_now(&mut self) -> Result<()> {
        self.start(clock::monotonic_micros())
    }

    /// Stop the transaction, computing its duration and self-time.
    ///
    /// Self-time is clamped at zero when children report more time than the
    /// transaction's own window.
    pub fn stop(&mut self, clock_end: u64) -> Result<()> {
        let clock_start = match (self.state, self.clock_start) {
            (TransactionState::Started, Some(clock_start)) => clock_start,
            (TransactionState::Stopped, _) => return Err(ApmError::AlreadyStopped(self.id.clone())),
            _ => return Err(ApmError::NotStarted(self.id.clone())),
        };

        let duration = clock_end.saturating_sub(clock_start);
        let children = self.aggregator.total();
        if children > duration {
            tracing::warn!(
                transaction.id = %self.id,
                duration_us = duration,
                child_duration_us = children,
                "child spans exceed transaction duration, clamping self time to zero"
            );
        }

        self.duration = Some(duration);
        self.self_time = Some(duration.saturating_sub(children));
        self.state = TransactionState::Stopped;
        Ok(())
    }

    pub fn stop_now(&mut self) -> Result<()> {
        self.stop(clock::monotonic_micros())
    }

    /// Stop the transaction and record an optional result label.
    pub fn done(&mut self, result: Option<&str>, clock_end: u64) -> Result<()> {
        self.stop(clock_end)?;
        if let Some(result) = result {
            self.result = Some(result.to_string());
        }
        Ok(())
    }

    pub fn done_now(&mut self, result: Option<&str>) -> Result<()> {
        self.done(result, clock::monotonic_micros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{SpanClassifier, SqlEvent, SQL_EVENT};

    fn transaction() -> Transaction {
        Transaction::new("GET /users", "request", &ApmConfig::default())
    }

    fn descriptor() -> crate::SpanDescriptor {
        SpanClassifier::new()
            .classify(SQL_EVENT, &SqlEvent::new("SELECT * FROM users"))
            .unwrap()
    }

    #[derive(Debug)]
    struct Overreporting(u64);

    impl ChildDurationAggregator for Overreporting {
        fn child_started(&self, _clock: u64) {}
        fn child_stopped(&self, _clock: u64) {}
        fn total(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut transaction = transaction();
        assert_eq!(transaction.state(), TransactionState::Created);
        assert!(!transaction.is_stopped());

        transaction.start(100).unwrap();
        assert!(transaction.is_started());
        assert!(!transaction.is_stopped());
        assert!(transaction.timestamp().is_some());

        transaction.stop(350).unwrap();
        assert!(transaction.is_stopped());
        assert_eq!(transaction.duration(), Some(250));
        assert_eq!(transaction.self_time(), Some(250));
        assert_eq!(transaction.result(), None);
    }

    #[test]
    fn test_stop_before_start_fails() {
        let mut transaction = transaction();
        assert!(matches!(transaction.stop(10), Err(ApmError::NotStarted(_))));
        assert!(matches!(transaction.done(Some("ok"), 10), Err(ApmError::NotStarted(_))));
        assert!(!transaction.is_stopped());
        assert_eq!(transaction.result(), None);
    }

    #[test]
    fn test_double_start_and_stop_fail() {
        let mut transaction = transaction();
        transaction.start(0).unwrap();
        assert!(matches!(transaction.start(1), Err(ApmError::AlreadyStarted(_))));

        transaction.done(Some("success"), 10).unwrap();
        assert_eq!(transaction.result(), Some("success"));
        assert!(matches!(transaction.done(Some("again"), 20), Err(ApmError::AlreadyStopped(_))));
        assert_eq!(transaction.duration(), Some(10));
        assert_eq!(transaction.result(), Some("success"));
    }

    #[test]
    fn test_self_time_subtracts_children() {
        let mut transaction = transaction();
        transaction.start(0).unwrap();

        let recorder = transaction.recorder();
        let mut first = recorder.start_span(descriptor(), 10).unwrap();
        first.stop(40);
        let mut second = recorder.start_span(descriptor(), 50).unwrap();
        second.stop(60);

        transaction.stop(100).unwrap();
        assert_eq!(transaction.duration(), Some(100));
        assert_eq!(transaction.self_time(), Some(60));
        assert!(transaction.self_time() <= transaction.duration());
    }

    #[test]
    fn test_self_time_counts_overlap_once() {
        let mut transaction = transaction();
        transaction.start(0).unwrap();

        let recorder = transaction.recorder();
        let mut first = recorder.start_span(descriptor(), 10).unwrap();
        let mut second = recorder.start_span(descriptor(), 20).unwrap();
        first.stop(30);
        first.stop(30);
        second.stop(80);

        transaction.stop(100).unwrap();
        assert_eq!(transaction.self_time(), Some(30));
    }

    #[test]
    fn test_abandoned_span_does_not_freeze_self_time() {
        let mut transaction = transaction();
        transaction.start(0).unwrap();

        let recorder = transaction.recorder();
        drop(recorder.start_span(descriptor(), 5));
        let mut span = recorder.start_span(descriptor(), 10).unwrap();
        span.stop(90);

        transaction.stop(100).unwrap();
        assert_eq!(transaction.span_counts().started, 2);
        assert_eq!(transaction.self_time(), Some(20));
    }

    #[test]
    fn test_negative_self_time_is_clamped() {
        let mut transaction = transaction().with_aggregator(Arc::new(Overreporting(500)));
        transaction.start(0).unwrap();
        transaction.stop(100).unwrap();
        assert_eq!(transaction.self_time(), Some(0));
    }

    #[test]
    fn test_clock_before_start_yields_zero_duration() {
        let mut transaction = transaction();
        transaction.start(100).unwrap();
        transaction.stop(50).unwrap();
        assert_eq!(transaction.duration(), Some(0));
    }

    #[test]
    fn test_default_labels_merged() {
        let config = ApmConfig::default().with_default_label("region", "eu");
        let mut transaction = Transaction::new("job", "worker", &config);
        transaction.set_label("queue", "mail");
        assert_eq!(transaction.context().labels.len(), 2);
        assert_eq!(transaction.context().labels["region"], "eu");
    }

    #[test]
    fn test_sampling() {
        let config = ApmConfig::new().with_transaction_sample_rate(0.0);
        let unsampled = Transaction::new("a", "request", &config);
        assert!(!unsampled.is_sampled());
        assert!(unsampled.recorder().start_span(descriptor(), 0).is_none());
        assert_eq!(unsampled.span_counts(), SpanCounts::default());

        let sampled = Transaction::new("a", "request", &ApmConfig::default());
        assert!(sampled.is_sampled());
        assert!(!sampled.with_sampled(false).is_sampled());
    }

    #[test]
    fn test_trace_context() {
        let transaction = transaction().with_trace_context("abc", "def");
        assert_eq!(transaction.trace_id(), "abc");
        assert_eq!(transaction.parent_id(), Some("def"));
        assert_eq!(transaction.recorder().start_span(descriptor(), 0).unwrap().trace_id, "abc");
    }

    #[test]
    fn test_concurrent_span_admission() {
        let config = ApmConfig::default().with_transaction_max_spans(3);
        let mut transaction = Transaction::new("batch", "job", &config);
        transaction.start(0).unwrap();

        std::thread::scope(|s| {
            for i in 0..5u64 {
                let recorder = transaction.recorder();
                s.spawn(move || {
                    if let Some(mut span) = recorder.start_span(descriptor(), i) {
                        span.stop(i + 1);
                    }
                });
            }
        });

        transaction.stop(100).unwrap();
        assert_eq!(transaction.span_counts(), SpanCounts { started: 3, dropped: 2 });
        let self_time = transaction.self_time().unwrap();
        assert!(self_time <= 100);
        assert!(self_time >= 95);
    }

    #[test]
    fn test_serialized_shape() {
        let mut transaction = transaction();
        transaction.start(0).unwrap();
        transaction.try_admit_span();
        transaction.done(Some("HTTP 2xx"), 7).unwrap();

        let json = serde_json::to_value(&transaction).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["duration"], 7);
        assert_eq!(json["result"], "HTTP 2xx");
        assert_eq!(json["span_count"]["started"], 1);
        assert_eq!(json["span_count"]["dropped"], 0);
        assert!(json.get("state").is_none());
    }
}
