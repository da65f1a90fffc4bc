//! Read-only statement guard.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

const POSTGRES: &[&str] = &["select", "with", "explain", "analyze", "show"];
const MYSQL: &[&str] = &["select", "with", "explain", "analyze", "show", "describe", "desc"];
const SQLITE: &[&str] = &["select", "with", "explain", "analyze", "pragma"];
const SQLSERVER: &[&str] = &["select", "with", "explain", "showplan"];
const GENERIC: &[&str] = &["select", "with", "explain", "show"];

/// A statement refused under read-only policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadOnlyViolation {
    /// Dialect the batch was checked against
    pub dialect: String,
    /// Leading keyword as written in the statement
    pub keyword: String,
    /// The offending statement, comments removed
    pub statement: String,
    /// Keywords that would have been permitted
    pub allowed: Vec<String>,
}

impl std::fmt::Display for ReadOnlyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} statements are not permitted in read-only mode ({} allows: {})",
            self.keyword,
            self.dialect,
            self.allowed.join(", ")
        )
    }
}

/// Leading keywords permitted for `dialect`, falling back to a generic list.
pub fn allowed_keywords(dialect: &str) -> &'static [&'static str] {
    match dialect.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => POSTGRES,
        "mysql" | "mariadb" => MYSQL,
        "sqlite" => SQLITE,
        "sqlserver" | "mssql" => SQLSERVER,
        _ => GENERIC,
    }
}

/// Line comments and non-nesting block comments, shortest match.
fn comment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)--[^\n]*|/\*.*?\*/").expect("Invalid comment pattern")
    })
}

/// Replaces every comment with a single space.
pub fn strip_comments(sql: &str) -> String {
    comment_pattern().replace_all(sql, " ").into_owned()
}

/// Splits comment-free text into trimmed, non-empty statements.
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Checks that every statement in `sql` starts with a permitted keyword.
///
/// A batch made only of comments or whitespace is permitted.
///
/// # Errors
/// Returns the first offending statement as a [`ReadOnlyViolation`].
///
/// # Example
/// ```rust
/// use dbbroker_core::policy::check_read_only;
///
/// assert!(check_read_only("SELECT 1; -- trailing note", "postgres").is_ok());
///
/// let violation = check_read_only("SELECT 1; DELETE FROM t", "postgres").unwrap_err();
/// assert_eq!(violation.keyword, "DELETE");
/// assert!(violation.allowed.contains(&"select".to_string()));
/// ```
pub fn check_read_only(sql: &str, dialect: &str) -> Result<(), ReadOnlyViolation> {
    let allowed = allowed_keywords(dialect);
    let cleaned = strip_comments(sql);

    for statement in split_statements(&cleaned) {
        let keyword = leading_keyword(&statement);
        if !allowed.contains(&keyword.to_lowercase().as_str()) {
            return Err(ReadOnlyViolation {
                dialect: dialect.to_string(),
                keyword: keyword.to_string(),
                statement,
                allowed: allowed.iter().map(|k| (*k).to_string()).collect(),
            });
        }
    }
    Ok(())
}

/// First whitespace-delimited token, cut at the first non-word character
/// so `SELECT*FROM t` still yields `SELECT`.
fn leading_keyword(statement: &str) -> &str {
    let token = statement.split_whitespace().next().unwrap_or_default();
    let end = token
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(token.len(), |(i, _)| i);
    if end == 0 { token } else { &token[..end] }
}
