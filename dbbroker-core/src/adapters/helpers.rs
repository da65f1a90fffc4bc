//! Helper utilities shared by the backend implementations.
//!
//! Row decoding differs per driver, but every backend renders values into
//! the same JSON shapes: integers and floats as numbers, temporal values as
//! ISO 8601 strings, binary data as `base64:`-prefixed strings.

use crate::models::QueryResult;
use serde_json::Value as JsonValue;

/// One decoded row keyed by column name.
pub type JsonRow = serde_json::Map<String, JsonValue>;

/// Renders binary data the way every backend does.
pub fn blob_to_json(bytes: &[u8]) -> JsonValue {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    JsonValue::String(format!("base64:{}", encoded))
}

/// Floats that JSON cannot carry (NaN, infinities) become strings.
pub fn float_to_json(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map_or_else(|| JsonValue::String(value.to_string()), JsonValue::Number)
}

/// Accumulates rows and completion counts across a multi-statement batch.
#[derive(Debug, Default)]
pub struct ResultCollector {
    columns: Vec<String>,
    rows: Vec<JsonRow>,
    rows_affected: Option<u64>,
}

impl ResultCollector {
    /// Records a returned row. The first row fixes the column list.
    pub fn push_row(&mut self, columns: impl FnOnce() -> Vec<String>, row: JsonRow) {
        if self.columns.is_empty() {
            self.columns = columns();
        }
        self.rows.push(row);
    }

    /// Records a statement completion count.
    pub fn add_affected(&mut self, count: u64) {
        self.rows_affected = Some(self.rows_affected.unwrap_or(0).saturating_add(count));
    }

    /// Builds the final result. Counts are only reported for batches that
    /// returned no rows.
    pub fn finish(self) -> QueryResult {
        match self.rows_affected {
            Some(count) if self.rows.is_empty() => QueryResult::affected(count),
            _ => QueryResult::with_rows(self.columns, self.rows),
        }
    }
}

/// Runs `sql` as an unprepared batch and decodes every returned row.
///
/// Unprepared execution is what lets a batch carry several statements.
#[cfg(any(feature = "postgresql", feature = "mysql", feature = "sqlite"))]
pub async fn run_raw<'e, DB, E>(
    executor: E,
    sql: &'e str,
    affected: fn(&DB::QueryResult) -> u64,
    decode: fn(&DB::Row) -> JsonRow,
) -> std::result::Result<QueryResult, sqlx::Error>
where
    DB: sqlx::Database,
    E: sqlx::Executor<'e, Database = DB> + 'e,
{
    use futures::TryStreamExt;
    use sqlx::{Column, Either, Row};

    let mut collector = ResultCollector::default();
    let mut stream = sqlx::raw_sql(sql).fetch_many(executor);

    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(done) => collector.add_affected(affected(&done)),
            Either::Right(row) => collector.push_row(
                || row.columns().iter().map(|c| c.name().to_string()).collect(),
                decode(&row),
            ),
        }
    }

    Ok(collector.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_encoding() {
        assert_eq!(blob_to_json(b"\x00\x01\x02"), JsonValue::String("base64:AAEC".into()));
    }

    #[test]
    fn test_non_finite_floats_become_strings() {
        assert_eq!(float_to_json(1.5), serde_json::json!(1.5));
        assert_eq!(float_to_json(f64::NAN), JsonValue::String("NaN".into()));
        assert_eq!(float_to_json(f64::INFINITY), JsonValue::String("inf".into()));
    }

    #[test]
    fn test_collector_reports_counts_only_without_rows() {
        let mut collector = ResultCollector::default();
        collector.add_affected(2);
        collector.add_affected(3);
        let result = collector.finish();
        assert_eq!(result.rows_affected, Some(5));
        assert!(result.columns.is_empty());

        let mut collector = ResultCollector::default();
        let mut row = JsonRow::new();
        row.insert("id".into(), serde_json::json!(7));
        collector.push_row(|| vec!["id".into()], row.clone());
        collector.push_row(|| vec!["ignored".into()], row);
        collector.add_affected(2);
        let result = collector.finish();
        assert_eq!(result.columns, vec!["id"]);
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.rows_affected, None);
    }
}
