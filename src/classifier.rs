//! Turns SQL instrumentation events into span descriptors.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::adapter::{AdapterCache, AdapterHandle, ConnectionId, ConnectionRegistry};
use crate::obfuscator::{ObfuscationResult, Obfuscator};
use crate::parser;

/// Event name under which SQL events are reported.
pub const SQL_EVENT: &str = "sql.sea_orm";

/// Payload names that never become spans: schema introspection and cache hits.
pub const SKIPPED_PAYLOAD_NAMES: [&str; 2] = ["SCHEMA", "CACHE"];

pub const SPAN_TYPE: &str = "db";
pub const SPAN_ACTION: &str = "sql";
pub const DB_TYPE: &str = "sql";

/// A SQL instrumentation event payload.
#[derive(Clone, Default)]
pub struct SqlEvent {
    pub sql: String,
    /// Logical name supplied by the caller, e.g. `User Load` or `SCHEMA`.
    pub name: Option<String>,
    pub connection: Option<Arc<dyn AdapterHandle>>,
    pub connection_id: Option<ConnectionId>,
}

impl SqlEvent {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_connection(mut self, connection: Arc<dyn AdapterHandle>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_connection_id(mut self, id: ConnectionId) -> Self {
        self.connection_id = Some(id);
        self
    }
}

impl fmt::Debug for SqlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The raw statement is deliberately left out.
        f.debug_struct("SqlEvent")
            .field("name", &self.name)
            .field("connection", &self.connection.is_some())
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbContext {
    pub statement: ObfuscationResult,
    #[serde(rename = "type")]
    pub db_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub name: String,
    pub resource: String,
    #[serde(rename = "type")]
    pub destination_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanContext {
    pub db: DbContext,
    pub destination: Destination,
}

/// A classified database span, ready to be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub span_type: &'static str,
    pub subtype: String,
    pub action: &'static str,
    pub context: SpanContext,
}

impl SpanDescriptor {
    /// The obfuscated statement.
    pub fn statement(&self) -> &str {
        self.context.db.statement.as_str()
    }
}

/// Classifies SQL events into span descriptors.
///
/// The subtype is resolved from, in order: the event's own connection, a
/// registry lookup by connection id, and the default connection.
#[derive(Default)]
pub struct SpanClassifier {
    obfuscator: Obfuscator,
    adapters: AdapterCache,
    registry: Option<Arc<dyn ConnectionRegistry>>,
    default_connection: Option<Arc<dyn AdapterHandle>>,
}

impl SpanClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_obfuscator(mut self, obfuscator: Obfuscator) -> Self {
        self.obfuscator = obfuscator;
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_default_connection(mut self, connection: Arc<dyn AdapterHandle>) -> Self {
        self.default_connection = Some(connection);
        self
    }

    pub fn adapters(&self) -> &AdapterCache {
        &self.adapters
    }

    /// Classify an event. Returns `None` for events that must not become spans.
    pub fn classify(&self, event_name: &str, event: &SqlEvent) -> Option<SpanDescriptor> {
        if let Some(name) = event.name.as_deref() {
            if SKIPPED_PAYLOAD_NAMES.contains(&name) {
                tracing::trace!(event = event_name, payload = name, "skipping SQL event");
                return None;
            }
        }

        let statement = self.obfuscator.obfuscate(&event.sql);
        // A statement that could not be obfuscated only lends its keyword.
        let summary = if statement.is_obfuscated() {
            parser::summarize(&event.sql)
        } else {
            parser::parse_operation(&event.sql).map(|operation| operation.to_string())
        };
        let name = summary
            .or_else(|| event.name.clone())
            .unwrap_or_else(|| event_name.to_string());
        let subtype = self.subtype(event);

        Some(SpanDescriptor {
            name,
            span_type: SPAN_TYPE,
            action: SPAN_ACTION,
            context: SpanContext {
                db: DbContext {
                    statement,
                    db_type: DB_TYPE,
                },
                destination: Destination {
                    name: subtype.clone(),
                    resource: subtype.clone(),
                    destination_type: SPAN_TYPE,
                },
            },
            subtype,
        })
    }

    fn subtype(&self, event: &SqlEvent) -> String {
        let raw = event
            .connection
            .as_ref()
            .and_then(|connection| connection.adapter_name())
            .or_else(|| {
                let id = event.connection_id?;
                self.registry.as_ref()?.lookup(id)?.adapter_name()
            })
            .or_else(|| self.default_connection.as_ref()?.adapter_name());

        self.adapters.resolve(raw.as_deref())
    }
}

impl fmt::Debug for SpanClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanClassifier")
            .field("adapters", &self.adapters)
            .field("registry", &self.registry.is_some())
            .field("default_connection", &self.default_connection.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{WeakConnectionRegistry, UNKNOWN_ADAPTER};
    use crate::obfuscator::{FAILED_MESSAGE, MAX_SQL_LENGTH, TOO_LARGE_MESSAGE};

    struct Named(Option<&'static str>);

    impl AdapterHandle for Named {
        fn adapter_name(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    fn handle(name: &'static str) -> Arc<dyn AdapterHandle> {
        Arc::new(Named(Some(name)))
    }

    #[test]
    fn test_classify_builds_descriptor() {
        let classifier = SpanClassifier::new();
        let event = SqlEvent::new("SELECT * FROM users WHERE id = 42")
            .with_name("User Load")
            .with_connection(handle("PostgreSQL"));

        let span = classifier.classify(SQL_EVENT, &event).unwrap();
        assert_eq!(span.name, "SELECT FROM users");
        assert_eq!(span.span_type, "db");
        assert_eq!(span.subtype, "postgresql");
        assert_eq!(span.action, "sql");
        assert_eq!(span.statement(), "SELECT * FROM users WHERE id = ?");
        assert_eq!(span.context.db.db_type, "sql");
        assert_eq!(span.context.destination.name, "postgresql");
        assert_eq!(span.context.destination.resource, "postgresql");
        assert_eq!(span.context.destination.destination_type, "db");
    }

    #[test]
    fn test_skip_list() {
        let classifier = SpanClassifier::new();
        for name in SKIPPED_PAYLOAD_NAMES {
            let event = SqlEvent::new("SELECT 1").with_name(name);
            assert!(classifier.classify(SQL_EVENT, &event).is_none());
        }
    }

    #[test]
    fn test_name_fallbacks() {
        let classifier = SpanClassifier::new();
        let event = SqlEvent::new("EXPLAIN ANALYZE x").with_name("Report");
        assert_eq!(classifier.classify(SQL_EVENT, &event).unwrap().name, "Report");

        let event = SqlEvent::new("VACUUM");
        assert_eq!(classifier.classify(SQL_EVENT, &event).unwrap().name, SQL_EVENT);
    }

    #[test]
    fn test_subtype_resolution_order() {
        let registry = Arc::new(WeakConnectionRegistry::new());
        let registered = handle("MySQL");
        registry.register(ConnectionId(3), &registered);

        let classifier = SpanClassifier::new()
            .with_registry(registry.clone())
            .with_default_connection(handle("SQLite"));

        let direct = SqlEvent::new("SELECT 1")
            .with_connection(handle("PostgreSQL"))
            .with_connection_id(ConnectionId(3));
        assert_eq!(classifier.classify(SQL_EVENT, &direct).unwrap().subtype, "postgresql");

        let nameless = SqlEvent::new("SELECT 1")
            .with_connection(Arc::new(Named(None)))
            .with_connection_id(ConnectionId(3));
        assert_eq!(classifier.classify(SQL_EVENT, &nameless).unwrap().subtype, "mysql");

        drop(registered);
        let stale = SqlEvent::new("SELECT 1").with_connection_id(ConnectionId(3));
        assert_eq!(classifier.classify(SQL_EVENT, &stale).unwrap().subtype, "sqlite");
    }

    #[test]
    fn test_unknown_subtype() {
        let classifier = SpanClassifier::new();
        let span = classifier.classify(SQL_EVENT, &SqlEvent::new("SELECT 1")).unwrap();
        assert_eq!(span.subtype, UNKNOWN_ADAPTER);
    }

    #[test]
    fn test_malformed_statement_is_replaced() {
        let classifier = SpanClassifier::new();
        let event = SqlEvent::new("SELECT * FROM t WHERE name = 'O'Brien");
        let span = classifier.classify(SQL_EVENT, &event).unwrap();
        assert_eq!(span.statement(), FAILED_MESSAGE);
        assert_eq!(span.name, "SELECT");
    }

    #[test]
    fn test_name_never_carries_literals() {
        let classifier = SpanClassifier::new();
        let event = SqlEvent::new("SELECT 'transfer from alice_ssn_123456789'");
        let span = classifier.classify(SQL_EVENT, &event).unwrap();
        assert_eq!(span.name, "SELECT");
        assert_eq!(span.statement(), "SELECT ?");

        let event = SqlEvent::new("SELECT * FROM t /* from payroll_secret */");
        let span = classifier.classify(SQL_EVENT, &event).unwrap();
        assert_eq!(span.name, "SELECT FROM t");
    }

    #[test]
    fn test_oversized_statement_named_by_keyword() {
        let classifier = SpanClassifier::new();
        let sql = format!("SELECT * FROM t WHERE a = '{}'", "x".repeat(MAX_SQL_LENGTH));
        let span = classifier.classify(SQL_EVENT, &SqlEvent::new(sql)).unwrap();
        assert_eq!(span.statement(), TOO_LARGE_MESSAGE);
        assert_eq!(span.name, "SELECT");
    }

    #[test]
    fn test_serialized_shape() {
        let classifier = SpanClassifier::new().with_default_connection(handle("PostgreSQL"));
        let event = SqlEvent::new("DELETE FROM a WHERE b = 'c'");
        let span = classifier.classify(SQL_EVENT, &event).unwrap();
        let json = serde_json::to_value(&span).unwrap();

        assert_eq!(json["type"], "db");
        assert_eq!(json["action"], "sql");
        assert_eq!(json["context"]["db"]["statement"], "DELETE FROM a WHERE b = ?");
        assert_eq!(json["context"]["db"]["type"], "sql");
        assert_eq!(json["context"]["destination"]["type"], "db");
    }
}
