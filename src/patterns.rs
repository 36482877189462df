//! Literal and comment patterns removed from SQL statements.
//!
//! Rules are combined into a single alternation. The regex engine reports
//! the leftmost match, and among matches starting at the same position the
//! first declared rule wins, so declaration order is precedence order.
//!
//! Bind-parameter markers such as `$1` are matched so that the numeric rule
//! cannot split them, and are kept verbatim by the obfuscator.

use once_cell::sync::Lazy;
use regex::Regex;

/// The kind of text a [`PatternRule`] matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    SingleQuoted,
    DoubleQuoted,
    BindParameter,
    Numeric,
    Boolean,
    Hexadecimal,
    LineComment,
    BlockComment,
}

impl PatternKind {
    /// All kinds, in default precedence order.
    pub const ALL: [PatternKind; 8] = [
        PatternKind::SingleQuoted,
        PatternKind::DoubleQuoted,
        PatternKind::BindParameter,
        PatternKind::Numeric,
        PatternKind::Boolean,
        PatternKind::Hexadecimal,
        PatternKind::LineComment,
        PatternKind::BlockComment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::SingleQuoted => "single_quoted",
            PatternKind::DoubleQuoted => "double_quoted",
            PatternKind::BindParameter => "bind_parameter",
            PatternKind::Numeric => "numeric",
            PatternKind::Boolean => "boolean",
            PatternKind::Hexadecimal => "hexadecimal",
            PatternKind::LineComment => "line_comment",
            PatternKind::BlockComment => "block_comment",
        }
    }

    /// The regex source for this kind.
    ///
    /// Quoted strings accept doubled quotes and backslash escapes. A closing
    /// quote directly followed by a word character is not a terminator, and
    /// an unterminated string runs to end of input. Block comments end at
    /// the closing marker, a nested opening marker, or end of input.
    pub fn pattern(&self) -> &'static str {
        match self {
            PatternKind::SingleQuoted => r#"'(?:[^'\\]|''|\\(?s:.))*(?:'\B|$)"#,
            PatternKind::DoubleQuoted => r#""(?:[^"\\]|""|\\(?s:.))*(?:"\B|$)"#,
            PatternKind::BindParameter => r"\$[0-9]+\b",
            PatternKind::Numeric => r"-?\b(?:[0-9]+\.)?[0-9]+(?:[eE][+-]?[0-9]+)?\b",
            PatternKind::Boolean => r"(?i:\b(?:true|false|null)\b)",
            PatternKind::Hexadecimal => r"0x[0-9a-fA-F]+",
            PatternKind::LineComment => r"(?:--|#)[^\r\n]*",
            PatternKind::BlockComment => r"/\*(?s:[^/]|/[^*])*?(?:\*/|/\*|$)",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternRule {
    pub kind: PatternKind,
    pub pattern: &'static str,
}

impl From<PatternKind> for PatternRule {
    fn from(kind: PatternKind) -> Self {
        Self {
            kind,
            pattern: kind.pattern(),
        }
    }
}

/// An ordered set of rules combined into one alternation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSet {
    rules: Vec<PatternRule>,
}

impl PatternSet {
    /// Build a set from rules in precedence order.
    pub fn new(rules: impl IntoIterator<Item = PatternRule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    /// Every kind, in default precedence order.
    pub fn standard() -> Self {
        Self::new(PatternKind::ALL.into_iter().map(PatternRule::from))
    }

    /// The same set without rules of the given kind.
    ///
    /// Useful for dialects where e.g. `#` is an operator rather than a comment.
    pub fn without(mut self, kind: PatternKind) -> Self {
        self.rules.retain(|rule| rule.kind != kind);
        self
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// The regex source of all rules as one alternation, one named group per rule.
    pub fn alternation(&self) -> String {
        self.rules
            .iter()
            .map(|rule| format!("(?P<{}>{})", rule.kind.as_str(), rule.pattern))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Compile all rules into a single alternation regex.
    pub fn combined(&self) -> Result<Regex, regex::Error> {
        Regex::new(&self.alternation())
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::standard()
    }
}

/// The compiled standard set, shared by every default obfuscator.
pub(crate) static STANDARD_PATTERNS: Lazy<Regex> =
    Lazy::new(|| PatternSet::standard().combined().unwrap());
