//! SQLite backend.
//!
//! # Descriptor Forms
//! - `sqlite:///path/to/database.db` - absolute file path
//! - `sqlite://./relative.db` - relative file path
//! - `sqlite::memory:` - in-memory database
//!
//! In-memory databases live exactly as long as their connection, so the
//! pool holds a single connection that never idles out. File databases are
//! opened read-only when the broker runs in read-only mode.

use super::DatabaseConnection;
use super::helpers::{JsonRow, blob_to_json, float_to_json, run_raw};
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::models::{DatabaseType, QueryResult};
use crate::security::ConnectionDescriptor;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};
use std::str::FromStr;

/// Live SQLite session.
pub struct SqliteConnection {
    pool: SqlitePool,
    in_memory: bool,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("in_memory", &self.in_memory)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Opens the database named by `descriptor`.
    ///
    /// # Errors
    /// Returns `BackendConnect` if the descriptor is malformed or the
    /// database file cannot be opened.
    pub async fn connect(descriptor: &ConnectionDescriptor, config: &BrokerConfig) -> Result<Self> {
        let in_memory = is_in_memory(descriptor.as_str());

        let mut options = SqliteConnectOptions::from_str(descriptor.as_str()).map_err(|e| {
            BrokerError::backend_connect(
                format!("Invalid SQLite descriptor {}", descriptor.redacted()),
                e,
            )
        })?;
        if config.read_only && !in_memory {
            options = options.read_only(true);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| {
                BrokerError::backend_connect(
                    format!("Failed to open SQLite database {}", descriptor.redacted()),
                    e,
                )
            })?;

        Ok(Self { pool, in_memory })
    }

    /// Checks if the connection is to an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }
}

fn is_in_memory(connection_string: &str) -> bool {
    connection_string.contains(":memory:") || connection_string.contains("mode=memory")
}

#[async_trait]
impl DatabaseConnection for SqliteConnection {
    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        run_raw::<Sqlite, _>(&self.pool, sql, |done| done.rows_affected(), row_to_json)
            .await
            .map_err(|e| BrokerError::execution("SQLite statement failed", e))
    }

    async fn disconnect(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}

fn row_to_json(row: &SqliteRow) -> JsonRow {
    use sqlx::Column;

    row.columns()
        .iter()
        .map(|column| {
            let value = extract_column_value(row, column.ordinal());
            (column.name().to_string(), value)
        })
        .collect()
}

/// SQLite is dynamically typed, so the storage class of each value decides.
fn extract_column_value(row: &SqliteRow, index: usize) -> JsonValue {
    use sqlx::{TypeInfo, ValueRef};

    let Ok(raw) = row.try_get_raw(index) else {
        return JsonValue::Null;
    };
    if raw.is_null() {
        return JsonValue::Null;
    }
    let storage = raw.type_info().name().to_string();

    match storage.as_str() {
        "INTEGER" => row
            .try_get_unchecked::<i64, _>(index)
            .map_or(JsonValue::Null, JsonValue::from),
        "REAL" => row
            .try_get_unchecked::<f64, _>(index)
            .map_or(JsonValue::Null, float_to_json),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map_or(JsonValue::Null, |bytes| blob_to_json(&bytes)),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map_or(JsonValue::Null, JsonValue::String),
    }
}
