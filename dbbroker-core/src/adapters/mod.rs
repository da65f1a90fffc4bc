//! Backend traits, the built-in connectors, and the connector registry.
//!
//! # Module Structure
//! - `helpers`: JSON row rendering shared by every backend
//! - Backend modules (`postgres`, `mysql`, `sqlite`, `mssql`), each behind
//!   its cargo feature
//!
//! The registry is a static table assembled once at startup. A backend that
//! was compiled out still appears in it, so descriptors for that dialect
//! resolve and then fail `connect` with an error naming the missing feature.

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::models::{BackendCapability, DatabaseType, QueryResult};
use crate::security::ConnectionDescriptor;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod helpers;

#[cfg(feature = "postgresql")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "mssql")]
pub mod mssql;

/// Live session with one database.
///
/// # Object Safety
/// This trait is object-safe; the broker holds it as
/// `Box<dyn DatabaseConnection>`.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Runs `sql` as given and returns the rows it produced.
    ///
    /// Policy (read-only guard, row cap) is applied by the broker before
    /// the text gets here.
    ///
    /// # Errors
    /// Returns `Execution` for driver or server failures.
    async fn execute_sql(&self, sql: &str) -> Result<QueryResult>;

    /// Closes the session.
    async fn disconnect(&self) -> Result<()>;

    /// Engine behind this session.
    fn database_type(&self) -> DatabaseType;

    /// Round trip used by connection tests.
    async fn ping(&self) -> Result<()> {
        self.execute_sql("SELECT 1").await.map(|_| ())
    }
}

/// Factory for sessions of one backend.
#[async_trait]
pub trait Connector: Send + Sync {
    /// What this connector serves.
    fn capability(&self) -> &BackendCapability;

    /// Opens a session for `descriptor`.
    ///
    /// # Errors
    /// Returns `BackendConnect` on driver failure, `UnsupportedFeature` if
    /// the driver was compiled out.
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        config: &BrokerConfig,
    ) -> Result<Box<dyn DatabaseConnection>>;
}

/// Connector for one of the built-in engines.
#[derive(Debug, Clone)]
pub struct BuiltinConnector {
    capability: BackendCapability,
}

impl BuiltinConnector {
    /// Creates the connector for `database_type`.
    pub fn new(database_type: DatabaseType) -> Self {
        Self {
            capability: BackendCapability::for_database(
                database_type,
                is_compiled_in(database_type),
            ),
        }
    }
}

/// Whether the driver for `database_type` was compiled in.
pub fn is_compiled_in(database_type: DatabaseType) -> bool {
    match database_type {
        DatabaseType::PostgreSQL => cfg!(feature = "postgresql"),
        DatabaseType::MySQL | DatabaseType::MariaDB => cfg!(feature = "mysql"),
        DatabaseType::SQLite => cfg!(feature = "sqlite"),
        DatabaseType::SqlServer => cfg!(feature = "mssql"),
    }
}

#[async_trait]
impl Connector for BuiltinConnector {
    fn capability(&self) -> &BackendCapability {
        &self.capability
    }

    #[allow(unused_variables)]
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        config: &BrokerConfig,
    ) -> Result<Box<dyn DatabaseConnection>> {
        match self.capability.database_type {
            #[cfg(feature = "postgresql")]
            DatabaseType::PostgreSQL => Ok(Box::new(
                postgres::PostgresConnection::connect(descriptor, config).await?,
            )),
            #[cfg(not(feature = "postgresql"))]
            DatabaseType::PostgreSQL => Err(BrokerError::unsupported_feature(
                "PostgreSQL backend (compile with --features postgresql)",
                "PostgreSQL",
            )),
            #[cfg(feature = "mysql")]
            database_type @ (DatabaseType::MySQL | DatabaseType::MariaDB) => Ok(Box::new(
                mysql::MySqlConnection::connect(descriptor, config, database_type).await?,
            )),
            #[cfg(not(feature = "mysql"))]
            database_type @ (DatabaseType::MySQL | DatabaseType::MariaDB) => {
                Err(BrokerError::unsupported_feature(
                    "MySQL backend (compile with --features mysql)",
                    database_type.to_string(),
                ))
            }
            #[cfg(feature = "sqlite")]
            DatabaseType::SQLite => Ok(Box::new(
                sqlite::SqliteConnection::connect(descriptor, config).await?,
            )),
            #[cfg(not(feature = "sqlite"))]
            DatabaseType::SQLite => Err(BrokerError::unsupported_feature(
                "SQLite backend (compile with --features sqlite)",
                "SQLite",
            )),
            #[cfg(feature = "mssql")]
            DatabaseType::SqlServer => Ok(Box::new(
                mssql::SqlServerConnection::connect(descriptor, config).await?,
            )),
            #[cfg(not(feature = "mssql"))]
            DatabaseType::SqlServer => Err(BrokerError::unsupported_feature(
                "SQL Server backend (compile with --features mssql)",
                "SQL Server",
            )),
        }
    }
}

/// Scheme-keyed table of connectors.
///
/// Schemes are disjoint across entries; the first claim wins.
#[derive(Clone)]
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn Connector>>,
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.connectors.iter().map(|c| c.capability().database_type))
            .finish()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ConnectorRegistry {
    /// Registry of every built-in engine.
    pub fn builtin() -> Self {
        Self::from_connectors(
            DatabaseType::ALL
                .into_iter()
                .map(|db| Arc::new(BuiltinConnector::new(db)) as Arc<dyn Connector>)
                .collect(),
        )
    }

    /// Registry over an explicit connector list.
    pub fn from_connectors(connectors: Vec<Arc<dyn Connector>>) -> Self {
        Self { connectors }
    }

    /// Finds the connector claiming the descriptor's scheme.
    ///
    /// # Errors
    /// Returns `RegistryResolution` with the redacted descriptor when no
    /// connector claims the scheme.
    pub fn resolve(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn Connector>> {
        self.connectors
            .iter()
            .find(|c| c.capability().claims(descriptor.scheme()))
            .cloned()
            .ok_or_else(|| BrokerError::RegistryResolution {
                descriptor: descriptor.redacted(),
            })
    }

    /// Default port for a scheme, if a connector claims it and has one.
    pub fn default_port(&self, scheme: &str) -> Option<u16> {
        self.connectors
            .iter()
            .map(|c| c.capability())
            .find(|cap| cap.claims(scheme))
            .and_then(|cap| cap.default_port)
    }

    /// Capabilities in registry order.
    pub fn capabilities(&self) -> impl Iterator<Item = &BackendCapability> {
        self.connectors.iter().map(|c| c.capability())
    }
}
