//! Property tests for the row cap rewriter and the read-only guard.

use dbbroker_core::policy::{allowed_keywords, apply_row_cap, check_read_only};
use proptest::prelude::*;
use regex::Regex;

fn select_statement() -> impl Strategy<Value = String> {
    ("c_[a-z]{1,8}", "t_[a-z]{1,8}", prop::option::of("c_[a-z]{1,8} > [0-9]{1,4}"))
        .prop_map(|(column, table, filter)| match filter {
            Some(filter) => format!("SELECT {column} FROM {table} WHERE {filter}"),
            None => format!("SELECT {column} FROM {table}"),
        })
}

fn limit_count(sql: &str) -> u64 {
    let pattern = Regex::new(r"LIMIT (\d+)").unwrap();
    pattern.captures(sql).unwrap()[1].parse().unwrap()
}

fn top_count(sql: &str) -> u64 {
    let pattern = Regex::new(r"TOP (\d+)").unwrap();
    pattern.captures(sql).unwrap()[1].parse().unwrap()
}

// =============================================================================
// Row cap
// =============================================================================

proptest! {
    /// An uncapped SELECT gains exactly one trailing LIMIT
    #[test]
    fn prop_uncapped_select_gains_limit(
        base in select_statement(),
        max_rows in 1u32..100_000,
        terminated in any::<bool>(),
    ) {
        let terminator = if terminated { ";" } else { "" };
        let sql = format!("{base}{terminator}");

        let capped = apply_row_cap(&sql, max_rows, "postgres");

        prop_assert_eq!(capped.clone(), format!("{base} LIMIT {max_rows}{terminator}"));
        prop_assert_eq!(capped.matches("LIMIT").count(), 1);
    }

    /// An existing LIMIT ends up as the smaller of the two caps
    #[test]
    fn prop_existing_limit_keeps_stricter_cap(
        base in select_statement(),
        existing in 1u64..100_000,
        max_rows in 1u32..100_000,
    ) {
        let sql = format!("{base} LIMIT {existing}");

        let capped = apply_row_cap(&sql, max_rows, "mysql");

        prop_assert_eq!(limit_count(&capped), existing.min(u64::from(max_rows)));
        prop_assert_eq!(capped.matches("LIMIT").count(), 1);
    }

    /// Leading-style dialects cap with TOP using the same rule
    #[test]
    fn prop_top_keeps_stricter_cap(
        column in "c_[a-z]{1,8}",
        table in "t_[a-z]{1,8}",
        existing in prop::option::of(1u64..100_000),
        max_rows in 1u32..100_000,
    ) {
        let sql = match existing {
            Some(n) => format!("SELECT TOP {n} {column} FROM {table}"),
            None => format!("SELECT {column} FROM {table}"),
        };

        let capped = apply_row_cap(&sql, max_rows, "sqlserver");

        let expected = existing.map_or(u64::from(max_rows), |n| n.min(u64::from(max_rows)));
        prop_assert_eq!(top_count(&capped), expected);
        prop_assert_eq!(capped.matches("TOP").count(), 1);
        prop_assert!(!capped.contains("LIMIT"));
    }

    /// Rewriting is idempotent
    #[test]
    fn prop_row_cap_is_idempotent(
        base in select_statement(),
        max_rows in 1u32..100_000,
        dialect in prop::sample::select(vec!["postgres", "mysql", "sqlite", "sqlserver"]),
    ) {
        let once = apply_row_cap(&base, max_rows, dialect);
        let twice = apply_row_cap(&once, max_rows, dialect);
        prop_assert_eq!(once, twice);
    }

    /// Semicolons inside comments and literals never move the cap
    #[test]
    fn prop_cap_stays_outside_comments_and_literals(
        base in select_statement(),
        text in "[a-z; ]{0,16}",
        block in any::<bool>(),
        max_rows in 1u32..100_000,
    ) {
        let comment = if block { format!("/* {text} */") } else { format!("-- {text}") };
        let sql = format!("{base} {comment}");
        prop_assert_eq!(
            apply_row_cap(&sql, max_rows, "postgres"),
            format!("{base} LIMIT {max_rows} {comment}")
        );

        let filtered = format!("SELECT c FROM t WHERE name = '{text}'");
        prop_assert_eq!(
            apply_row_cap(&filtered, max_rows, "postgres"),
            format!("{filtered} LIMIT {max_rows}")
        );
    }

    /// Statements that are not SELECT pass through untouched
    #[test]
    fn prop_non_select_is_unchanged(
        prefix in prop::sample::select(vec![
            "DELETE FROM",
            "UPDATE",
            "INSERT INTO",
            "WITH x AS (SELECT 1) SELECT * FROM",
            "EXPLAIN SELECT * FROM",
            "SHOW TABLES FROM",
        ]),
        table in "t_[a-z]{1,8}",
        max_rows in 1u32..100_000,
    ) {
        let sql = format!("{prefix} {table}");
        prop_assert_eq!(apply_row_cap(&sql, max_rows, "postgres"), sql);
    }
}

// =============================================================================
// Read-only guard
// =============================================================================

const KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "EXPLAIN", "SHOW", "PRAGMA", "INSERT", "UPDATE", "DELETE", "DROP",
    "CREATE", "ALTER", "TRUNCATE", "GRANT",
];

proptest! {
    /// A batch is permitted exactly when every statement's keyword is allowed
    #[test]
    fn prop_batch_permitted_iff_all_allowed(
        keywords in prop::collection::vec(prop::sample::select(KEYWORDS), 1..6),
        dialect in prop::sample::select(vec!["postgres", "mysql", "sqlite", "sqlserver"]),
    ) {
        let batch = keywords
            .iter()
            .map(|keyword| format!("{keyword} something"))
            .collect::<Vec<_>>()
            .join("; ");

        let allowed = allowed_keywords(dialect);
        let first_refused = keywords
            .iter()
            .find(|keyword| !allowed.contains(&keyword.to_ascii_lowercase().as_str()));

        match (check_read_only(&batch, dialect), first_refused) {
            (Ok(()), None) => {}
            (Err(violation), Some(keyword)) => prop_assert_eq!(violation.keyword.as_str(), *keyword),
            (result, expected) => {
                return Err(TestCaseError::fail(format!(
                    "guard returned {result:?}, expected refusal of {expected:?}"
                )));
            }
        }
    }

    /// Comments never hide a refused keyword
    #[test]
    fn prop_comments_do_not_mask_keywords(
        comment in "[a-z ]{0,20}",
        block in any::<bool>(),
    ) {
        let sql = if block {
            format!("/* {comment} */ DELETE FROM t")
        } else {
            format!("-- {comment}\nDELETE FROM t")
        };
        let violation = check_read_only(&sql, "postgres").unwrap_err();
        prop_assert_eq!(violation.keyword, "DELETE");
    }
}
