//! Query representation and read/write classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Statement type declared by whoever built the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

/// Outcome of classifying a query for caching purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    Read,
    Write,
    Unknown,
}

impl QueryKind {
    /// Only reads are served through the cache.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Read)
    }

    /// Writes trigger namespace invalidation once they complete.
    pub fn invalidates(&self) -> bool {
        matches!(self, Self::Write)
    }
}

impl From<StatementKind> for QueryKind {
    fn from(kind: StatementKind) -> Self {
        match kind {
            StatementKind::Select => Self::Read,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete => Self::Write,
            StatementKind::Other => Self::Unknown,
        }
    }
}

/// An immutable statement plus its optional declared type.
///
/// The text is the stable, unbound form of the statement (placeholders, not
/// literals), so the same logical query always renders identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    text: String,
    declared: Option<StatementKind>,
}

impl Query {
    /// A query with a declared statement type.
    pub fn new(text: impl Into<String>, kind: StatementKind) -> Self {
        Self {
            text: text.into(),
            declared: Some(kind),
        }
    }

    /// A query known only by its text. Classification falls back to the
    /// leading keyword.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            declared: None,
        }
    }

    pub fn select(text: impl Into<String>) -> Self {
        Self::new(text, StatementKind::Select)
    }

    pub fn insert(text: impl Into<String>) -> Self {
        Self::new(text, StatementKind::Insert)
    }

    pub fn update(text: impl Into<String>) -> Self {
        Self::new(text, StatementKind::Update)
    }

    pub fn delete(text: impl Into<String>) -> Self {
        Self::new(text, StatementKind::Delete)
    }

    /// The statement text as given.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The text used for hashing: surrounding whitespace stripped.
    pub fn canonical_text(&self) -> &str {
        self.text.trim()
    }

    pub fn declared_kind(&self) -> Option<StatementKind> {
        self.declared
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Classify a query as read, write or unknown.
///
/// The declared statement type wins when present. Otherwise the first
/// keyword of the text is compared case-insensitively against
/// `select` / `insert` / `update` / `delete`.
pub fn classify(query: &Query) -> QueryKind {
    if let Some(kind) = query.declared_kind() {
        return kind.into();
    }
    classify_text(query.text())
}

fn classify_text(text: &str) -> QueryKind {
    let keyword = text
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or("");

    if keyword.eq_ignore_ascii_case("select") {
        QueryKind::Read
    } else if keyword.eq_ignore_ascii_case("insert")
        || keyword.eq_ignore_ascii_case("update")
        || keyword.eq_ignore_ascii_case("delete")
    {
        QueryKind::Write
    } else {
        QueryKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_kind_wins_over_text() {
        // Text says select, declaration says delete.
        let query = Query::new("SELECT 1", StatementKind::Delete);
        assert_eq!(classify(&query), QueryKind::Write);

        let query = Query::new("DELETE FROM users", StatementKind::Other);
        assert_eq!(classify(&query), QueryKind::Unknown);
    }

    #[test]
    fn test_text_fallback_is_case_insensitive() {
        assert_eq!(classify(&Query::raw("select * from users")), QueryKind::Read);
        assert_eq!(classify(&Query::raw("  SeLeCt 1")), QueryKind::Read);
        assert_eq!(classify(&Query::raw("INSERT INTO users VALUES (1)")), QueryKind::Write);
        assert_eq!(classify(&Query::raw("\nupdate users set x = 1")), QueryKind::Write);
        assert_eq!(classify(&Query::raw("Delete from users")), QueryKind::Write);
    }

    #[test]
    fn test_text_fallback_unknown() {
        assert_eq!(classify(&Query::raw("CREATE TABLE users (id int)")), QueryKind::Unknown);
        assert_eq!(classify(&Query::raw("")), QueryKind::Unknown);
        assert_eq!(classify(&Query::raw("selectivity")), QueryKind::Unknown);
    }

    #[test]
    fn test_parenthesized_select_is_read() {
        assert_eq!(classify(&Query::raw("(SELECT 1) UNION (SELECT 2)")), QueryKind::Read);
        assert_eq!(classify(&Query::raw("select(1)")), QueryKind::Read);
    }

    #[test]
    fn test_only_reads_are_cacheable() {
        assert!(QueryKind::Read.is_cacheable());
        assert!(!QueryKind::Write.is_cacheable());
        assert!(!QueryKind::Unknown.is_cacheable());
        assert!(QueryKind::Write.invalidates());
        assert!(!QueryKind::Unknown.invalidates());
    }

    #[test]
    fn test_canonical_text_trims() {
        let query = Query::select("  SELECT 1 \n");
        assert_eq!(query.canonical_text(), "SELECT 1");
        assert_eq!(query.text(), "  SELECT 1 \n");
    }
}
