//! Row cap rewriting for SELECT statements.
//!
//! The effective cap is always `min(requested, existing)`; a tighter limit
//! already in the text is never raised.
//!
//! Statement boundaries, the SELECT head and any existing cap are located
//! on a masked copy of the text in which comments and quoted text are
//! blanked out byte for byte. Offsets found there are valid in the original,
//! so a cap is never written into a comment or a literal.

use regex::{Captures, Regex};
use std::ops::Range;
use std::sync::OnceLock;

/// Where a dialect places its row cap clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapStyle {
    /// `... LIMIT n` at the end of the statement
    Trailing,
    /// `SELECT TOP n ...` directly after the keyword
    Leading,
}

impl CapStyle {
    /// Cap style used by `dialect`.
    pub fn for_dialect(dialect: &str) -> Self {
        match dialect.to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" => CapStyle::Leading,
            _ => CapStyle::Trailing,
        }
    }
}

struct Patterns {
    select: Regex,
    trailing_limit: Regex,
    leading_top: Regex,
    leading_head: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        select: Regex::new(r"(?i)^\s*select\b").expect("Invalid select pattern"),
        trailing_limit: Regex::new(
            r"(?is)\blimit\s+(\d+)(?:\s*,\s*(\d+))?(?:\s+offset\s+\d+)?\s*$",
        )
        .expect("Invalid limit pattern"),
        leading_top: Regex::new(
            r"(?is)^\s*select(?:\s+(?:distinct|all)\b)?\s+top\s*(?:\(\s*(\d+)\s*\)|(\d+))",
        )
        .expect("Invalid top pattern"),
        leading_head: Regex::new(r"(?is)^\s*select(?:\s+(?:distinct|all)\b)?")
            .expect("Invalid select head pattern"),
    })
}

/// Caps every SELECT statement in `sql` at `max_rows` rows.
///
/// Statements that do not start with `select` pass through unchanged. In a
/// batch each statement is capped on its own. Text that ends inside an
/// unterminated quote is returned unchanged for the backend to reject.
///
/// # Example
/// ```rust
/// use dbbroker_core::policy::apply_row_cap;
///
/// assert_eq!(apply_row_cap("SELECT * FROM t", 10, "postgres"), "SELECT * FROM t LIMIT 10");
/// assert_eq!(apply_row_cap("SELECT * FROM t LIMIT 5", 10, "postgres"), "SELECT * FROM t LIMIT 5");
/// assert_eq!(apply_row_cap("SELECT * FROM t", 10, "sqlserver"), "SELECT TOP 10 * FROM t");
/// assert_eq!(
///     apply_row_cap("SELECT * FROM t /* a; b */", 10, "postgres"),
///     "SELECT * FROM t LIMIT 10 /* a; b */"
/// );
/// ```
pub fn apply_row_cap(sql: &str, max_rows: u32, dialect: &str) -> String {
    let style = CapStyle::for_dialect(dialect);
    let Some(masked) = mask(sql, Lexicon::for_dialect(dialect)) else {
        return sql.to_string();
    };

    let ranges = statement_ranges(&masked);
    let statements = ranges
        .iter()
        .filter(|range| code_end(&masked[(*range).clone()]) > 0)
        .count();

    if statements <= 1 {
        return cap_statement(sql, &masked, max_rows, style);
    }
    ranges
        .into_iter()
        .map(|range| cap_statement(&sql[range.clone()], &masked[range], max_rows, style))
        .collect()
}

/// Quoting rules that differ between dialects.
#[derive(Debug, Clone, Copy, Default)]
struct Lexicon {
    /// `\'` escapes a quote inside a literal
    backslash_escapes: bool,
    /// `[name]` quotes an identifier
    bracket_identifiers: bool,
}

impl Lexicon {
    fn for_dialect(dialect: &str) -> Self {
        match dialect.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Lexicon {
                backslash_escapes: true,
                ..Default::default()
            },
            "sqlserver" | "mssql" => Lexicon {
                bracket_identifiers: true,
                ..Default::default()
            },
            _ => Lexicon::default(),
        }
    }
}

#[derive(Clone, Copy)]
enum Lex {
    Code,
    LineComment,
    BlockComment,
    Quoted(char),
}

/// Copies `sql` with comment bodies and quoted contents replaced by spaces.
///
/// Delimiting quotes are kept, so a literal still reads as a token. The
/// copy has the same length and the same char boundaries at every code
/// character. Returns `None` if the text ends inside a quote; an open block
/// comment just runs to the end.
fn mask(sql: &str, lexicon: Lexicon) -> Option<String> {
    let mut masked = String::with_capacity(sql.len());
    let mut state = Lex::Code;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Lex::Code => match c {
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    masked.push_str("  ");
                    state = Lex::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    masked.push_str("  ");
                    state = Lex::BlockComment;
                }
                '\'' | '"' | '`' => {
                    masked.push(c);
                    state = Lex::Quoted(c);
                }
                '[' if lexicon.bracket_identifiers => {
                    masked.push(c);
                    state = Lex::Quoted(']');
                }
                _ => masked.push(c),
            },
            Lex::LineComment => {
                if c == '\n' {
                    masked.push('\n');
                    state = Lex::Code;
                } else {
                    blank(&mut masked, c);
                }
            }
            Lex::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    masked.push_str("  ");
                    state = Lex::Code;
                } else {
                    blank(&mut masked, c);
                }
            }
            Lex::Quoted(close) => {
                if c == '\\' && lexicon.backslash_escapes && matches!(close, '\'' | '"') {
                    blank(&mut masked, c);
                    if let Some(escaped) = chars.next() {
                        blank(&mut masked, escaped);
                    }
                } else if c == close && chars.peek() == Some(&close) {
                    // Doubled delimiter
                    chars.next();
                    masked.push_str("  ");
                } else if c == close {
                    masked.push(c);
                    state = Lex::Code;
                } else {
                    blank(&mut masked, c);
                }
            }
        }
    }

    match state {
        Lex::Quoted(_) => None,
        _ => Some(masked),
    }
}

fn blank(masked: &mut String, c: char) {
    masked.extend(std::iter::repeat_n(' ', c.len_utf8()));
}

/// Byte ranges of the `;`-terminated pieces of a masked text.
fn statement_ranges(masked: &str) -> Vec<Range<usize>> {
    let mut start = 0;
    masked
        .split_inclusive(';')
        .map(|piece| {
            let range = start..start + piece.len();
            start = range.end;
            range
        })
        .collect()
}

/// Offset just past the last code character, ignoring trailing blanks and
/// at most one `;`.
fn code_end(masked: &str) -> usize {
    let trimmed = masked.trim_end();
    trimmed.strip_suffix(';').map_or(trimmed, str::trim_end).len()
}

fn cap_statement(statement: &str, masked: &str, max_rows: u32, style: CapStyle) -> String {
    if !patterns().select.is_match(masked) {
        return statement.to_string();
    }
    match style {
        CapStyle::Trailing => cap_trailing(statement, masked, max_rows),
        CapStyle::Leading => cap_leading(statement, masked, max_rows),
    }
}

fn cap_trailing(statement: &str, masked: &str, max_rows: u32) -> String {
    let end = code_end(masked);

    if let Some(caps) = patterns().trailing_limit.captures(&masked[..end]) {
        // `LIMIT offset, count` carries the count second
        let Some(count) = caps.get(2).or_else(|| caps.get(1)) else {
            return statement.to_string();
        };
        return replace_if_looser(statement, count.range(), max_rows);
    }

    let (body, tail) = statement.split_at(end);
    format!("{body} LIMIT {max_rows}{tail}")
}

fn cap_leading(statement: &str, masked: &str, max_rows: u32) -> String {
    let patterns = patterns();

    if let Some(caps) = patterns.leading_top.captures(masked) {
        let Some(count) = top_count(&caps) else {
            return statement.to_string();
        };
        return replace_if_looser(statement, count.range(), max_rows);
    }

    match patterns.leading_head.find(masked) {
        Some(head) => {
            let (before, after) = statement.split_at(head.end());
            format!("{before} TOP {max_rows}{after}")
        }
        None => statement.to_string(),
    }
}

fn top_count<'h>(caps: &Captures<'h>) -> Option<regex::Match<'h>> {
    caps.get(1).or_else(|| caps.get(2))
}

/// Rewrites the existing count in place when it exceeds `max_rows`.
fn replace_if_looser(statement: &str, count: Range<usize>, max_rows: u32) -> String {
    let existing = statement[count.clone()].parse::<u64>().unwrap_or(u64::MAX);
    if existing <= u64::from(max_rows) {
        return statement.to_string();
    }
    format!(
        "{}{}{}",
        &statement[..count.start],
        max_rows,
        &statement[count.end..]
    )
}
