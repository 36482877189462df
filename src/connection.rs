//! APM-instrumented database connection wrapper.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, DbErr, ExecResult, QueryResult, Statement,
};
use tracing::{field, Instrument};

use crate::classifier::{SpanClassifier, SqlEvent, SQL_EVENT};
use crate::config::ApmConfig;
use crate::span::{Span, SpanRecorder, SpanSink, TracingSink};
use crate::transaction::Transaction;

/// A wrapper around SeaORM's `DatabaseConnection` that records a database
/// span for every statement executed on behalf of a transaction.
///
/// Statements are classified into span descriptors (with the SQL text
/// obfuscated), admitted against the bound transaction's span budget and,
/// once finished, handed to a [`SpanSink`]. The wrapped operation always
/// runs, whether or not its span was admitted.
///
/// Each statement also gets a `db.query` tracing span, so database work
/// nests under whatever tracing span is current.
///
/// The underlying connection is shared, so clones and per-transaction copies
/// all run statements on the same pool.
///
/// # Example
///
/// ```rust,ignore
/// use sea_orm::Database;
/// use sea_orm_apm::{ApmConfig, Transaction, TracedConnection};
///
/// let config = ApmConfig::default();
/// let connection = Database::connect("postgres://localhost/mydb").await?;
/// let db = TracedConnection::new(connection, config.clone());
///
/// let mut transaction = Transaction::new("GET /users", "request", &config);
/// transaction.start_now()?;
/// let users = Users::find().all(&db.for_transaction(&transaction)).await?;
/// transaction.done_now(Some("HTTP 2xx"))?;
/// ```
#[derive(Debug, Clone)]
pub struct TracedConnection {
    inner: Arc<DatabaseConnection>,
    config: Arc<ApmConfig>,
    classifier: Arc<SpanClassifier>,
    sink: Arc<dyn SpanSink>,
    backend: Arc<DbBackend>,
    recorder: Option<SpanRecorder>,
}

/// In-flight bookkeeping for one statement.
struct Recording {
    tracing_span: tracing::Span,
    span: Option<Span>,
    start: Instant,
}

impl TracedConnection {
    /// Create a new traced connection with the given configuration.
    pub fn new(connection: DatabaseConnection, config: ApmConfig) -> Self {
        let backend = Arc::new(connection.get_database_backend());
        Self {
            inner: Arc::new(connection),
            config: Arc::new(config),
            classifier: Arc::new(SpanClassifier::new()),
            sink: Arc::new(TracingSink),
            backend,
            recorder: None,
        }
    }

    /// Create a new traced connection with default configuration.
    pub fn wrap(connection: DatabaseConnection) -> Self {
        Self::new(connection, ApmConfig::default())
    }

    /// Use a shared classifier, e.g. one with a connection registry.
    pub fn with_classifier(mut self, classifier: Arc<SpanClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Send finished spans to `sink` instead of the tracing log.
    pub fn with_sink(mut self, sink: Arc<dyn SpanSink>) -> Self {
        self.sink = sink;
        self
    }

    /// A copy of this connection that records spans through `recorder`.
    pub fn with_recorder(&self, recorder: SpanRecorder) -> Self {
        Self {
            recorder: Some(recorder),
            ..self.clone()
        }
    }

    /// A copy of this connection that records spans against `transaction`.
    pub fn for_transaction(&self, transaction: &Transaction) -> Self {
        self.with_recorder(transaction.recorder())
    }

    /// Get a reference to the underlying `DatabaseConnection`.
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    pub fn config(&self) -> &ApmConfig {
        &self.config
    }

    /// Consume the wrapper and return the shared inner `DatabaseConnection`.
    pub fn into_inner(self) -> Arc<DatabaseConnection> {
        self.inner
    }

    /// Classify the statement and open its spans.
    fn start_recording(&self, sql: &str) -> Recording {
        let start = Instant::now();
        let event = SqlEvent::new(sql).with_connection(self.backend.clone());
        let Some(descriptor) = self.classifier.classify(SQL_EVENT, &event) else {
            return Recording {
                tracing_span: tracing::Span::none(),
                span: None,
                start,
            };
        };

        let tracing_span = tracing::info_span!(
            "db.query",
            otel.name = %descriptor.name,
            db.system = %descriptor.subtype,
            db.statement = %descriptor.statement(),
            db.name = field::Empty,
            db.rows_affected = field::Empty,
            db.duration_ms = field::Empty,
            apm.span_id = field::Empty,
            otel.status_code = field::Empty,
            error.message = field::Empty,
            slow_query = field::Empty,
        );

        if let Some(db_name) = &self.config.database_name {
            tracing_span.record("db.name", db_name.as_str());
        }

        let span = self
            .recorder
            .as_ref()
            .and_then(|recorder| recorder.start_span_now(descriptor));
        if let Some(span) = &span {
            tracing_span.record("apm.span_id", span.id.as_str());
        }

        Recording {
            tracing_span,
            span,
            start,
        }
    }

    /// Record the outcome, stop the span and hand it to the sink.
    fn finish_recording<T, E: std::fmt::Display>(
        &self,
        recording: Recording,
        result: &Result<T, E>,
        row_count: Option<u64>,
    ) {
        let Recording {
            tracing_span,
            span,
            start,
        } = recording;

        let elapsed = start.elapsed();
        let duration_ms = elapsed.as_millis() as i64;
        tracing_span.record("db.duration_ms", duration_ms);

        if let Some(count) = row_count {
            tracing_span.record("db.rows_affected", count);
        }

        if elapsed > self.config.slow_query_threshold {
            tracing_span.record("slow_query", true);
            let threshold_ms = self.config.slow_query_threshold.as_millis() as i64;
            tracing::warn!(
                parent: &tracing_span,
                duration_ms = duration_ms,
                threshold_ms = threshold_ms,
                "Slow query detected"
            );
        }

        match result {
            Ok(_) => {
                tracing_span.record("otel.status_code", "OK");
            }
            Err(e) => {
                tracing_span.record("otel.status_code", "ERROR");
                tracing_span.record("error.message", e.to_string().as_str());
                tracing::error!(parent: &tracing_span, error = %e, "Database query failed");
            }
        }

        if let Some(mut span) = span {
            span.stop_now();
            self.sink.report(span);
        }
    }
}

impl From<DatabaseConnection> for TracedConnection {
    fn from(connection: DatabaseConnection) -> Self {
        Self::wrap(connection)
    }
}

impl AsRef<DatabaseConnection> for TracedConnection {
    fn as_ref(&self) -> &DatabaseConnection {
        &self.inner
    }
}

#[async_trait]
impl ConnectionTrait for TracedConnection {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let recording = self.start_recording(&stmt.sql);
        let span = recording.tracing_span.clone();

        let result = self.inner.execute(stmt).instrument(span).await;

        let row_count = result.as_ref().ok().map(|r| r.rows_affected());
        self.finish_recording(recording, &result, row_count);
        result
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        let recording = self.start_recording(sql);
        let span = recording.tracing_span.clone();

        let result = self.inner.execute_unprepared(sql).instrument(span).await;

        let row_count = result.as_ref().ok().map(|r| r.rows_affected());
        self.finish_recording(recording, &result, row_count);
        result
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let recording = self.start_recording(&stmt.sql);
        let span = recording.tracing_span.clone();

        let result = self.inner.query_one(stmt).instrument(span).await;

        let row_count = result.as_ref().ok().map(|row| row.is_some() as u64);
        self.finish_recording(recording, &result, row_count);
        result
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let recording = self.start_recording(&stmt.sql);
        let span = recording.tracing_span.clone();

        let result = self.inner.query_all(stmt).instrument(span).await;

        let row_count = result.as_ref().ok().map(|rows| rows.len() as u64);
        self.finish_recording(recording, &result, row_count);
        result
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

/// Extension trait for easy wrapping of database connections.
pub trait ApmExt {
    /// Wrap this connection with APM instrumentation.
    fn with_apm(self) -> TracedConnection;

    /// Wrap this connection with a custom configuration.
    fn with_apm_config(self, config: ApmConfig) -> TracedConnection;
}

impl ApmExt for DatabaseConnection {
    fn with_apm(self) -> TracedConnection {
        TracedConnection::wrap(self)
    }

    fn with_apm_config(self, config: ApmConfig) -> TracedConnection {
        TracedConnection::new(self, config)
    }
}
