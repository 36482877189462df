//! # sea-orm-apm
//!
//! Application performance monitoring for SeaORM database operations.
//!
//! This crate records timed **transactions** and their child database
//! **spans**, and strips literal values out of every SQL statement before it
//! leaves the process.
//!
//! ## Features
//!
//! - **SQL Obfuscation**: Strings, numbers, booleans, hex literals and comments are
//!   replaced with `?`; malformed statements fail closed to a fixed placeholder
//! - **Span Budgets**: A concurrency-safe cap on spans per transaction, with drop counts
//! - **Self-Time**: Transaction duration minus the time covered by its child spans
//! - **Automatic Instrumentation**: All queries executed through `TracedConnection` are recorded
//! - **Tracing Integration**: Every statement also gets a `db.query` tracing span
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sea_orm::Database;
//! use sea_orm_apm::prelude::*;
//!
//! let config = ApmConfig::default().with_transaction_max_spans(200);
//! let db = Database::connect("postgres://localhost/mydb").await?.with_apm_config(config.clone());
//!
//! let mut transaction = Transaction::new("GET /users", "request", &config);
//! transaction.start_now()?;
//! let users = Users::find().all(&db.for_transaction(&transaction)).await?;
//! transaction.done_now(Some("HTTP 2xx"))?;
//! ```
//!
//! ## Obfuscation
//!
//! ```rust
//! use sea_orm_apm::Obfuscator;
//!
//! let obfuscator = Obfuscator::new();
//! let result = obfuscator.obfuscate("SELECT * FROM users WHERE id = 42 AND name = 'bob'");
//! assert_eq!(result.as_str(), "SELECT * FROM users WHERE id = ? AND name = ?");
//! ```
//!
//! ## Span Descriptor
//!
//! | Field | Description |
//! |-------|-------------|
//! | `name` | Summary such as `SELECT FROM users` |
//! | `type` | Always `db` |
//! | `subtype` | Lower-cased adapter name, e.g. `postgresql`, or `unknown` |
//! | `action` | Always `sql` |
//! | `context.db.statement` | Obfuscated SQL or a fixed placeholder |
//! | `context.destination` | Adapter name as service name and resource |

mod adapter;
mod budget;
mod classifier;
mod clock;
mod config;
mod connection;
mod error;
mod obfuscator;
mod parser;
mod patterns;
mod span;
mod transaction;

pub use adapter::{
    AdapterCache, AdapterHandle, ConnectionId, ConnectionRegistry, WeakConnectionRegistry,
    UNKNOWN_ADAPTER,
};
pub use budget::{SpanBudget, SpanCounts};
pub use classifier::{
    DbContext, Destination, SpanClassifier, SpanContext, SpanDescriptor, SqlEvent,
    SKIPPED_PAYLOAD_NAMES, SQL_EVENT,
};
pub use clock::{monotonic_micros, wall_micros};
pub use config::ApmConfig;
pub use connection::{ApmExt, TracedConnection};
pub use error::{ApmError, Result};
pub use obfuscator::{
    ObfuscationResult, Obfuscator, FAILED_MESSAGE, MAX_SQL_LENGTH, PLACEHOLDER, TOO_LARGE_MESSAGE,
};
pub use parser::{summarize, SqlOperation};
pub use patterns::{PatternKind, PatternRule, PatternSet};
pub use span::{ChildDurationAggregator, ChildDurations, Span, SpanRecorder, SpanSink, TracingSink};
pub use transaction::{Transaction, TransactionContext, TransactionState};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ApmConfig, ApmExt, Obfuscator, SpanClassifier, SqlEvent, TracedConnection, Transaction,
    };
}
