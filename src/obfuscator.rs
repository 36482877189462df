//! SQL obfuscation: replaces literals and comments with a placeholder.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::error::Result;
use crate::patterns::{PatternKind, PatternSet, STANDARD_PATTERNS};

/// Statements longer than this many characters are not scanned.
pub const MAX_SQL_LENGTH: usize = 2000;

/// Replacement for every matched literal or comment. Bind-parameter markers
/// are kept as written.
pub const PLACEHOLDER: &str = "?";

pub const TOO_LARGE_MESSAGE: &str = "SQL query too large to remove sensitive data ...";

pub const FAILED_MESSAGE: &str =
    "Failed to obfuscate SQL query - quote characters remained after obfuscation";

// Any of these left after substitution means the quoting was unbalanced.
static LEFTOVER_DELIMITERS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"'|"|/\*|\*/"#).unwrap());

/// Outcome of obfuscating one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum ObfuscationResult {
    Obfuscated(String),
    TooLarge,
    Failed,
}

impl ObfuscationResult {
    pub fn as_str(&self) -> &str {
        match self {
            ObfuscationResult::Obfuscated(sql) => sql,
            ObfuscationResult::TooLarge => TOO_LARGE_MESSAGE,
            ObfuscationResult::Failed => FAILED_MESSAGE,
        }
    }

    pub fn is_obfuscated(&self) -> bool {
        matches!(self, ObfuscationResult::Obfuscated(_))
    }
}

impl fmt::Display for ObfuscationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ObfuscationResult> for String {
    fn from(result: ObfuscationResult) -> Self {
        match result {
            ObfuscationResult::Obfuscated(sql) => sql,
            other => other.as_str().to_string(),
        }
    }
}

/// Strips literal values from SQL statements.
///
/// The combined pattern is compiled once per obfuscator; the default
/// obfuscator shares one process-wide compiled pattern. Obfuscation is
/// pure, so one instance can serve any number of threads.
#[derive(Debug, Clone)]
pub struct Obfuscator {
    pattern: Regex,
}

impl Default for Obfuscator {
    fn default() -> Self {
        Self {
            pattern: STANDARD_PATTERNS.clone(),
        }
    }
}

impl Obfuscator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an obfuscator from a custom pattern set.
    pub fn with_patterns(patterns: &PatternSet) -> Result<Self> {
        Ok(Self {
            pattern: patterns.combined()?,
        })
    }

    /// Obfuscate a statement.
    ///
    /// Fails closed: if quote or comment delimiters survive substitution the
    /// whole result is replaced with [`ObfuscationResult::Failed`].
    pub fn obfuscate(&self, sql: &str) -> ObfuscationResult {
        if sql.len() > MAX_SQL_LENGTH && sql.chars().count() > MAX_SQL_LENGTH {
            return ObfuscationResult::TooLarge;
        }

        let obfuscated = self.pattern.replace_all(sql, |caps: &Captures<'_>| {
            match caps.name(PatternKind::BindParameter.as_str()) {
                Some(marker) => marker.as_str().to_string(),
                None => PLACEHOLDER.to_string(),
            }
        });
        if LEFTOVER_DELIMITERS.is_match(&obfuscated) {
            return ObfuscationResult::Failed;
        }

        ObfuscationResult::Obfuscated(obfuscated.into_owned())
    }
}
