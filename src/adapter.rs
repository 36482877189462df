//! Database adapter name resolution and caching.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend};

/// Subtype reported when no adapter name could be resolved.
pub const UNKNOWN_ADAPTER: &str = "unknown";

/// Anything that can report the name of its database adapter.
pub trait AdapterHandle: Send + Sync {
    /// The raw adapter name, e.g. `PostgreSQL`. `None` if not known.
    fn adapter_name(&self) -> Option<String>;
}

impl AdapterHandle for DbBackend {
    fn adapter_name(&self) -> Option<String> {
        let name = match self {
            DbBackend::Postgres => "PostgreSQL",
            DbBackend::MySql => "MySQL",
            DbBackend::Sqlite => "SQLite",
        };
        Some(name.to_string())
    }
}

impl AdapterHandle for DatabaseConnection {
    fn adapter_name(&self) -> Option<String> {
        self.get_database_backend().adapter_name()
    }
}

/// Identifier carried in event payloads to refer to a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Looks up connections by id. Lookups may come up empty at any time.
pub trait ConnectionRegistry: Send + Sync {
    fn lookup(&self, id: ConnectionId) -> Option<Arc<dyn AdapterHandle>>;
}

/// A registry holding weak references, so registering a connection never
/// extends its lifetime.
#[derive(Default)]
pub struct WeakConnectionRegistry {
    entries: RwLock<HashMap<ConnectionId, Weak<dyn AdapterHandle>>>,
}

impl WeakConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnectionId, connection: &Arc<dyn AdapterHandle>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(id, Arc::downgrade(connection));
        }
    }

    pub fn unregister(&self, id: ConnectionId) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(&id);
        }
    }

    /// Drop entries whose connection no longer exists.
    pub fn prune(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|_, weak| weak.strong_count() > 0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConnectionRegistry for WeakConnectionRegistry {
    fn lookup(&self, id: ConnectionId) -> Option<Arc<dyn AdapterHandle>> {
        let weak = self.entries.read().ok()?.get(&id)?.clone();
        let connection = weak.upgrade();
        if connection.is_none() {
            tracing::debug!(connection_id = %id, "registered connection no longer exists");
        }
        connection
    }
}

impl fmt::Debug for WeakConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConnectionRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

/// Memoizes lower-cased adapter names keyed by the raw name.
///
/// Entries never expire; adapter names are few and stable for the life of
/// a process. Concurrent first writes of the same key store the same value.
#[derive(Debug, Default)]
pub struct AdapterCache {
    entries: RwLock<HashMap<String, String>>,
    normalizations: AtomicU64,
}

impl AdapterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a raw adapter name to its normalized form.
    ///
    /// Absent or empty names resolve to [`UNKNOWN_ADAPTER`] without touching
    /// the cache. A poisoned cache is bypassed rather than propagated.
    pub fn resolve(&self, raw: Option<&str>) -> String {
        let raw = match raw {
            Some(raw) if !raw.is_empty() => raw,
            _ => return UNKNOWN_ADAPTER.to_string(),
        };

        match self.entries.read() {
            Ok(entries) => {
                if let Some(cached) = entries.get(raw) {
                    return cached.clone();
                }
            }
            Err(_) => {
                tracing::warn!("adapter cache poisoned, resolving without cache");
                return self.normalize(raw);
            }
        }

        let normalized = self.normalize(raw);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(raw.to_string(), normalized.clone());
        }
        normalized
    }

    /// How many times a raw name has been normalized (cache misses).
    pub fn normalizations(&self) -> u64 {
        self.normalizations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn normalize(&self, raw: &str) -> String {
        self.normalizations.fetch_add(1, Ordering::Relaxed);
        raw.to_lowercase()
    }
}
