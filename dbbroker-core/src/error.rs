//! Error types with credential sanitization.
//!
//! Every variant carries a human-readable context that has already been
//! passed through the redaction helpers in [`crate::security`]. Connection
//! strings and bastion secrets are never placed in an error message verbatim.

use thiserror::Error;

/// Boxed source error carried by wrapping variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for broker operations.
///
/// # Security
/// All error messages are sanitized to prevent credential leakage.
/// Descriptors are rendered through `redact_database_url` and bastion
/// configuration through `redact_bastion_config` before they get here.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Incomplete or contradictory bastion configuration
    #[error("Tunnel configuration error: {message}")]
    TunnelConfig {
        /// What is missing or contradictory
        message: String,
    },

    /// Unreadable key file or rejected credentials
    #[error("Tunnel authentication failed: {context}")]
    TunnelAuth {
        /// Redacted description of the bastion and key involved
        context: String,
        /// Underlying cause
        #[source]
        source: Option<BoxError>,
    },

    /// Handshake or forwarding failure, including mid-session drops
    #[error("Tunnel transport failure: {context}")]
    TunnelTransport {
        /// Redacted description of the failed step
        context: String,
        /// Underlying cause
        #[source]
        source: Option<BoxError>,
    },

    /// Could not obtain a local forwarding port
    #[error("Cannot bind local tunnel port {port}")]
    LocalBind {
        /// Requested port; 0 when the OS was asked to choose
        port: u16,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// No registered backend serves the descriptor's scheme
    #[error("No database backend registered for {descriptor}")]
    RegistryResolution {
        /// Redacted connection string
        descriptor: String,
    },

    /// Backend-specific connection failure
    #[error("Database connection failed: {context}")]
    BackendConnect {
        /// Redacted description of the target
        context: String,
        /// Underlying cause
        #[source]
        source: BoxError,
    },

    /// Backend failure while running a permitted statement
    #[error("Query execution failed: {context}")]
    Execution {
        /// What the backend was doing
        context: String,
        /// Underlying cause
        #[source]
        source: Option<BoxError>,
    },

    /// Invalid descriptor or broker settings
    #[error("Configuration error: {message}")]
    Configuration {
        /// Which setting is invalid and why
        message: String,
    },

    /// Operation requires an active connection
    #[error("Not connected to a database")]
    NotConnected,

    /// Backend support was compiled out
    #[error("Unsupported operation: {feature} not supported for {database_type}")]
    UnsupportedFeature {
        /// Missing capability
        feature: String,
        /// Engine that lacks it
        database_type: String,
    },
}

/// Convenience type alias for Results with BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    /// Creates a tunnel configuration error
    pub fn tunnel_config(message: impl Into<String>) -> Self {
        Self::TunnelConfig {
            message: message.into(),
        }
    }

    /// Creates a tunnel authentication error without an underlying cause
    pub fn tunnel_auth(context: impl Into<String>) -> Self {
        Self::TunnelAuth {
            context: context.into(),
            source: None,
        }
    }

    /// Creates a tunnel authentication error wrapping its cause
    pub fn tunnel_auth_with<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TunnelAuth {
            context: context.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates a transport error without an underlying cause
    pub fn tunnel_transport(context: impl Into<String>) -> Self {
        Self::TunnelTransport {
            context: context.into(),
            source: None,
        }
    }

    /// Creates a transport error wrapping its cause
    pub fn tunnel_transport_with<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TunnelTransport {
            context: context.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates a backend connection error with sanitized context
    pub fn backend_connect<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::BackendConnect {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates an execution error wrapping a driver failure
    pub fn execution<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Execution {
            context: context.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates an execution error with only a message
    pub fn execution_msg(context: impl Into<String>) -> Self {
        Self::Execution {
            context: context.into(),
            source: None,
        }
    }

    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an unsupported feature error
    pub fn unsupported_feature(
        feature: impl Into<String>,
        database_type: impl Into<String>,
    ) -> Self {
        Self::UnsupportedFeature {
            feature: feature.into(),
            database_type: database_type.into(),
        }
    }

    /// Returns true for failures of the tunnel layer.
    pub fn is_tunnel_error(&self) -> bool {
        matches!(
            self,
            Self::TunnelConfig { .. }
                | Self::TunnelAuth { .. }
                | Self::TunnelTransport { .. }
                | Self::LocalBind { .. }
        )
    }
}
