//! SQL summarizing: short span names built from the operation and primary table.
//!
//! The table is looked up only after literals and comments have been blanked
//! out. A statement whose quoting cannot be resolved is summarized by its
//! leading keyword alone.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::obfuscator::MAX_SQL_LENGTH;
use crate::patterns::{PatternKind, PatternSet};

/// SQL operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOperation {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Truncate,
    Begin,
    Commit,
    Rollback,
    Savepoint,
    Release,
}

impl SqlOperation {
    /// Returns the operation keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlOperation::Select => "SELECT",
            SqlOperation::Insert => "INSERT",
            SqlOperation::Update => "UPDATE",
            SqlOperation::Delete => "DELETE",
            SqlOperation::Create => "CREATE",
            SqlOperation::Drop => "DROP",
            SqlOperation::Alter => "ALTER",
            SqlOperation::Truncate => "TRUNCATE",
            SqlOperation::Begin => "BEGIN",
            SqlOperation::Commit => "COMMIT",
            SqlOperation::Rollback => "ROLLBACK",
            SqlOperation::Savepoint => "SAVEPOINT",
            SqlOperation::Release => "RELEASE",
        }
    }

    /// The keyword inserted between the operation and the table in a summary.
    fn table_prefix(&self) -> &'static str {
        match self {
            SqlOperation::Select | SqlOperation::Delete => " FROM ",
            SqlOperation::Insert => " INTO ",
            SqlOperation::Create | SqlOperation::Drop | SqlOperation::Alter => " TABLE ",
            _ => " ",
        }
    }

    fn table_regex(&self) -> Option<&'static Regex> {
        let regex = match self {
            SqlOperation::Select => &*SELECT_TABLE_REGEX,
            SqlOperation::Insert => &*INSERT_TABLE_REGEX,
            SqlOperation::Update => &*UPDATE_TABLE_REGEX,
            SqlOperation::Delete => &*DELETE_TABLE_REGEX,
            SqlOperation::Create => &*CREATE_TABLE_REGEX,
            SqlOperation::Drop => &*DROP_TABLE_REGEX,
            SqlOperation::Alter => &*ALTER_TABLE_REGEX,
            SqlOperation::Truncate => &*TRUNCATE_TABLE_REGEX,
            _ => return None,
        };
        Some(regex)
    }
}

impl std::fmt::Display for SqlOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Identifier optionally wrapped in backticks, double quotes or brackets,
// with an optional schema qualifier.
macro_rules! table_regex {
    ($prefix:literal) => {
        Lazy::new(|| {
            Regex::new(concat!(
                r#"(?i)\b"#,
                $prefix,
                r#"\s+(?:[`"\[]?\w+[`"\]]?\.)?[`"\[]?(\w+)[`"\]]?"#
            ))
            .unwrap()
        })
    };
}

static SELECT_TABLE_REGEX: Lazy<Regex> = table_regex!("FROM");
static INSERT_TABLE_REGEX: Lazy<Regex> = table_regex!(r"INSERT\s+INTO");
static UPDATE_TABLE_REGEX: Lazy<Regex> = table_regex!(r"UPDATE(?:\s+ONLY)?");
static DELETE_TABLE_REGEX: Lazy<Regex> = table_regex!(r"DELETE\s+FROM");
static CREATE_TABLE_REGEX: Lazy<Regex> =
    table_regex!(r"CREATE\s+(?:TEMP(?:ORARY)?\s+)?TABLE(?:\s+IF\s+NOT\s+EXISTS)?");
static DROP_TABLE_REGEX: Lazy<Regex> = table_regex!(r"DROP\s+TABLE(?:\s+IF\s+EXISTS)?");
static ALTER_TABLE_REGEX: Lazy<Regex> = table_regex!(r"ALTER\s+TABLE");
static TRUNCATE_TABLE_REGEX: Lazy<Regex> = table_regex!(r"TRUNCATE(?:\s+TABLE)?");

// Double-quoted names that look like identifiers survive scrubbing, every
// other literal or comment becomes a placeholder.
static SCRUB_PATTERNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"(?P<identifier>"\w+"\B)|{}"#,
        PatternSet::standard().alternation()
    ))
    .unwrap()
});

fn has_delimiter(text: &str) -> bool {
    text.contains(|c: char| c == '\'' || c == '"') || text.contains("/*") || text.contains("*/")
}

fn is_kept(caps: &Captures<'_>) -> bool {
    caps.name("identifier").is_some() || caps.name(PatternKind::BindParameter.as_str()).is_some()
}

/// Blank out literals and comments, keeping quoted identifiers.
///
/// Returns `None` for oversized statements and for statements with quote or
/// comment delimiters left over after matching.
fn scrub(sql: &str) -> Option<String> {
    if sql.chars().count() > MAX_SQL_LENGTH {
        return None;
    }

    let mut scrubbed = String::with_capacity(sql.len());
    let mut last = 0;
    for caps in SCRUB_PATTERNS.captures_iter(sql) {
        let matched = caps.get(0)?;
        let gap = &sql[last..matched.start()];
        if has_delimiter(gap) {
            return None;
        }
        scrubbed.push_str(gap);
        if is_kept(&caps) {
            scrubbed.push_str(matched.as_str());
        } else {
            scrubbed.push('?');
        }
        last = matched.end();
    }

    let tail = &sql[last..];
    if has_delimiter(tail) {
        return None;
    }
    scrubbed.push_str(tail);
    Some(scrubbed)
}

/// Parse the SQL operation from the statement's leading keyword.
///
/// `WITH` is reported as a select, `START TRANSACTION` as a begin.
pub fn parse_operation(sql: &str) -> Option<SqlOperation> {
    let keyword = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()?
        .to_ascii_uppercase();

    let operation = match keyword.as_str() {
        "SELECT" | "WITH" => SqlOperation::Select,
        "INSERT" => SqlOperation::Insert,
        "UPDATE" => SqlOperation::Update,
        "DELETE" => SqlOperation::Delete,
        "CREATE" => SqlOperation::Create,
        "DROP" => SqlOperation::Drop,
        "ALTER" => SqlOperation::Alter,
        "TRUNCATE" => SqlOperation::Truncate,
        "BEGIN" | "START" => SqlOperation::Begin,
        "COMMIT" | "END" => SqlOperation::Commit,
        "ROLLBACK" => SqlOperation::Rollback,
        "SAVEPOINT" => SqlOperation::Savepoint,
        "RELEASE" => SqlOperation::Release,
        _ => return None,
    };
    Some(operation)
}

/// Extract the primary table name from a SQL query, lower-cased.
///
/// Returns `None` if the table cannot be determined.
pub fn extract_table(sql: &str) -> Option<String> {
    parse_operation(sql)?
        .table_regex()?
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// Build a short, literal-free span name such as `SELECT FROM users`.
///
/// Returns `None` when the statement's operation is not recognised; callers
/// fall back to another name.
pub fn summarize(sql: &str) -> Option<String> {
    let operation = parse_operation(sql)?;
    let table = scrub(sql).and_then(|scrubbed| extract_table(&scrubbed));
    let summary = match table {
        Some(table) => format!("{}{}{}", operation, operation.table_prefix(), table),
        None => operation.as_str().to_string(),
    };
    Some(summary)
}
