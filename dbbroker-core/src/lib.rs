//! Core library for dbbroker, a tunnel-aware database connection broker.
//!
//! The broker reaches databases directly or through an SSH bastion,
//! dispatches to the backend that claims the descriptor's scheme, and
//! applies read-only policy and a row cap to every statement before it
//! reaches the driver.
//!
//! # Security Guarantees
//! - Passwords and passphrases are masked in every log line and error message
//! - Secrets live in zeroizing containers and are wiped on drop
//! - In read-only mode, statements outside the dialect allow-list never
//!   reach a backend
//!
//! # Architecture
//! - [`tunnel`]: SSH bastion resolution and local port forwarding
//! - [`adapters`]: backend traits, built-in drivers, and the connector registry
//! - [`policy`]: read-only guard and row cap rewriter
//! - [`broker`]: the orchestrator tying them together

pub mod adapters;
pub mod broker;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod policy;
pub mod security;
pub mod tunnel;

// Re-export commonly used types
pub use adapters::{Connector, ConnectorRegistry, DatabaseConnection};
pub use broker::{ActiveConnection, ConnectionBroker, ExecutionOutcome};
pub use config::{BastionConfig, BastionSettings, BrokerConfig};
pub use error::{BrokerError, Result};
pub use logging::init_logging;
pub use models::{BackendCapability, DatabaseType, QueryResult};
pub use policy::ReadOnlyViolation;
pub use security::{ConnectionDescriptor, redact_database_url};
pub use tunnel::{TunnelHandle, TunnelRequest, TunnelSession};
