//! Configuration for transaction and span recording.

use std::collections::BTreeMap;
use std::time::Duration;

/// Configuration options for APM recording.
///
/// # Example
///
/// ```rust
/// use sea_orm_apm::ApmConfig;
/// use std::time::Duration;
///
/// let config = ApmConfig::default()
///     .with_transaction_max_spans(100)
///     .with_default_label("region", "eu-west-1")
///     .with_slow_query_threshold(Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct ApmConfig {
    /// Maximum number of spans a single transaction records.
    /// Spans beyond this are dropped and counted.
    /// Default: 500
    pub transaction_max_spans: usize,

    /// Fraction of transactions that are sampled, between 0.0 and 1.0.
    /// Unsampled transactions record no spans.
    /// Default: 1.0
    pub transaction_sample_rate: f64,

    /// Labels merged into every new transaction's context.
    /// Default: empty
    pub default_labels: BTreeMap<String, String>,

    /// Queries exceeding this duration are logged at WARN level.
    /// Default: 500ms
    pub slow_query_threshold: Duration,

    /// Custom database name to include in tracing spans.
    /// Default: `None`
    pub database_name: Option<String>,
}

impl Default for ApmConfig {
    fn default() -> Self {
        Self {
            transaction_max_spans: 500,
            transaction_sample_rate: 1.0,
            default_labels: BTreeMap::new(),
            slow_query_threshold: Duration::from_millis(500),
            database_name: None,
        }
    }
}

impl ApmConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of spans recorded per transaction.
    ///
    /// Zero disables span recording while still counting every attempt as dropped.
    pub fn with_transaction_max_spans(mut self, max: usize) -> Self {
        self.transaction_max_spans = max;
        self
    }

    /// Set the transaction sample rate. Values outside `0.0..=1.0` are clamped.
    pub fn with_transaction_sample_rate(mut self, rate: f64) -> Self {
        self.transaction_sample_rate = if rate.is_nan() { 1.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    /// Add a label merged into every transaction's context.
    pub fn with_default_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_labels.insert(key.into(), value.into());
        self
    }

    /// Set the threshold for slow query warnings.
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    /// Set a database name to include in spans.
    ///
    /// Useful when your application connects to multiple databases.
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    /// Create a development-friendly configuration: a generous span budget
    /// and an aggressive slow query threshold.
    pub fn development() -> Self {
        Self {
            transaction_max_spans: 5_000,
            slow_query_threshold: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Create a production configuration with bounded per-transaction overhead.
    pub fn production() -> Self {
        Self {
            transaction_max_spans: 500,
            slow_query_threshold: Duration::from_secs(1),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ApmConfig::default()
            .with_transaction_max_spans(3)
            .with_database_name("test_db")
            .with_default_label("env", "test");

        assert_eq!(config.transaction_max_spans, 3);
        assert_eq!(config.database_name, Some("test_db".to_string()));
        assert_eq!(config.default_labels.get("env").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_sample_rate_is_clamped() {
        let rate = |r: f64| {
            ApmConfig::new()
                .with_transaction_sample_rate(r)
                .transaction_sample_rate
        };
        assert_eq!(rate(2.5), 1.0);
        assert_eq!(rate(-1.0), 0.0);
        assert_eq!(rate(0.25), 0.25);
    }

    #[test]
    fn test_presets() {
        let development = ApmConfig::development();
        assert!(development.transaction_max_spans > ApmConfig::production().transaction_max_spans);
        assert_eq!(ApmConfig::production().slow_query_threshold, Duration::from_secs(1));
    }
}
