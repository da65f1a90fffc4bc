//! Connection orchestration.
//!
//! A [`ConnectionBroker`] is the one session object a process holds. It
//! owns the tunnel, the registry and at most one active database session,
//! and it applies read-only policy and the row cap to every statement.
//!
//! Calls take `&mut self`, so the borrow checker serializes them.

use crate::adapters::{ConnectorRegistry, DatabaseConnection};
use crate::config::{BastionSettings, BrokerConfig};
use crate::error::BrokerError;
use crate::models::{DatabaseType, QueryResult};
use crate::policy::{ReadOnlyViolation, apply_row_cap, check_read_only};
use crate::security::ConnectionDescriptor;
use crate::tunnel::{TunnelHandle, TunnelRequest, TunnelSession};
use crate::Result;
use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Result of one execution request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The statement ran
    Completed(QueryResult),
    /// Read-only policy refused the statement; nothing reached the backend
    Rejected(ReadOnlyViolation),
}

impl ExecutionOutcome {
    /// Returns true if policy refused the statement.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// The broker's current database session.
pub struct ActiveConnection {
    descriptor: ConnectionDescriptor,
    endpoint: ConnectionDescriptor,
    database_type: DatabaseType,
    tunnel: Option<TunnelHandle>,
    connection: Box<dyn DatabaseConnection>,
}

impl std::fmt::Debug for ActiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveConnection")
            .field("descriptor", &self.descriptor)
            .field("endpoint", &self.endpoint)
            .field("database_type", &self.database_type)
            .field("tunnel", &self.tunnel)
            .finish_non_exhaustive()
    }
}

impl ActiveConnection {
    /// Descriptor as supplied by the caller.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Descriptor the backend was connected with. Points at the local
    /// tunnel endpoint when tunnelled, otherwise equal to `descriptor`.
    pub fn endpoint(&self) -> &ConnectionDescriptor {
        &self.endpoint
    }

    /// Engine behind the session.
    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Tunnel carrying the session, if any.
    pub fn tunnel(&self) -> Option<&TunnelHandle> {
        self.tunnel.as_ref()
    }

    /// Backend session handle.
    pub fn connection(&self) -> &dyn DatabaseConnection {
        self.connection.as_ref()
    }
}

/// Tunnel-aware, policy-enforcing connection broker.
#[derive(Debug)]
pub struct ConnectionBroker {
    config: BrokerConfig,
    bastion: BastionSettings,
    registry: ConnectorRegistry,
    tunnel: TunnelSession,
    active: Option<ActiveConnection>,
}

impl ConnectionBroker {
    /// Creates a broker with the built-in backends and the SSH transport.
    ///
    /// # Errors
    /// Returns `Configuration` if `config` is invalid.
    pub fn new(config: BrokerConfig, bastion: BastionSettings) -> Result<Self> {
        let tunnel = TunnelSession::new(&config);
        Self::with_parts(config, bastion, ConnectorRegistry::builtin(), tunnel)
    }

    /// Creates a broker from explicit parts.
    ///
    /// # Errors
    /// Returns `Configuration` if `config` is invalid.
    pub fn with_parts(
        config: BrokerConfig,
        bastion: BastionSettings,
        registry: ConnectorRegistry,
        tunnel: TunnelSession,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            bastion,
            registry,
            tunnel,
            active: None,
        })
    }

    /// Broker settings.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Backends this broker can reach.
    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Tunnel session owned by this broker.
    pub fn tunnel(&self) -> &TunnelSession {
        &self.tunnel
    }

    /// Current session, if connected.
    pub fn active(&self) -> Option<&ActiveConnection> {
        self.active.as_ref()
    }

    /// Returns true while a backend session is held.
    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    /// Parses `connection_string` and connects to it.
    ///
    /// # Errors
    /// See [`ConnectionBroker::connect`]. A malformed string is a
    /// `Configuration` error that does not echo the input.
    pub async fn connect_str(&mut self, connection_string: &str) -> Result<&ActiveConnection> {
        let descriptor = ConnectionDescriptor::parse(connection_string)?;
        self.connect(&descriptor).await
    }

    /// Connects to `descriptor`, through the bastion when one is configured.
    ///
    /// An existing session is disconnected first, tunnel included. On any
    /// failure no tunnel is left behind.
    ///
    /// # Errors
    /// - `TunnelConfig`, `TunnelAuth`, `TunnelTransport`, `LocalBind` from
    ///   bastion resolution and tunnel establishment
    /// - `RegistryResolution` if no backend claims the scheme
    /// - `BackendConnect` / `UnsupportedFeature` from the backend
    pub async fn connect(&mut self, descriptor: &ConnectionDescriptor) -> Result<&ActiveConnection> {
        if self.active.is_some() || self.tunnel.is_active() {
            info!("Replacing the existing connection");
            if let Err(e) = self.disconnect().await {
                warn!(error = %e, "Previous connection did not close cleanly");
            }
        }

        let bastion = self.bastion.resolve()?;

        let (target, tunnel) = match bastion {
            Some(bastion) => match self.tunnel_target(descriptor)? {
                Some((host, port)) => {
                    let handle = self
                        .tunnel
                        .establish(&bastion, TunnelRequest::new(host, port))
                        .await?;
                    let rewritten = descriptor
                        .with_endpoint(&Ipv4Addr::LOCALHOST.to_string(), handle.local_port);
                    match rewritten {
                        Ok(rewritten) => (rewritten, Some(handle)),
                        Err(e) => {
                            self.tunnel.close().await;
                            return Err(e);
                        }
                    }
                }
                None => {
                    debug!(
                        descriptor = %descriptor,
                        "Dialect has no network endpoint, connecting without tunnel"
                    );
                    (descriptor.clone(), None)
                }
            },
            None => (descriptor.clone(), None),
        };

        let connector = match self.registry.resolve(&target) {
            Ok(connector) => connector,
            Err(e) => {
                self.abandon_tunnel(tunnel.as_ref()).await;
                return Err(e);
            }
        };
        let database_type = connector.capability().database_type;

        let connection = match connector.connect(&target, &self.config).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(descriptor = %target, error = %e, "Backend connection failed");
                self.abandon_tunnel(tunnel.as_ref()).await;
                return Err(e);
            }
        };

        info!(
            backend = %database_type,
            descriptor = %target,
            tunnel_port = tunnel.as_ref().map(|t| t.local_port),
            "Connected"
        );

        Ok(&*self.active.insert(ActiveConnection {
            descriptor: descriptor.clone(),
            endpoint: target,
            database_type,
            tunnel,
            connection,
        }))
    }

    /// Host and port the bastion should forward to, or `None` when the
    /// dialect has no network endpoint.
    fn tunnel_target(&self, descriptor: &ConnectionDescriptor) -> Result<Option<(String, u16)>> {
        let Some(default_port) = self.registry.default_port(descriptor.scheme()) else {
            return Ok(None);
        };
        let host = descriptor.host().ok_or_else(|| {
            BrokerError::configuration(format!(
                "Descriptor has no host to tunnel to: {}",
                descriptor.redacted()
            ))
        })?;
        Ok(Some((
            host.to_string(),
            descriptor.port().unwrap_or(default_port),
        )))
    }

    async fn abandon_tunnel(&self, handle: Option<&TunnelHandle>) {
        if let Some(handle) = handle {
            debug!(local_port = handle.local_port, "Tearing down tunnel after failed connect");
            self.tunnel.close().await;
        }
    }

    /// Applies policy to `sql` and runs it on the active session.
    ///
    /// The read-only guard sees the text as submitted; the row cap is
    /// applied afterwards. A rejected statement never reaches the backend.
    ///
    /// # Errors
    /// - `NotConnected` without an active session
    /// - `TunnelTransport` if the tunnel carrying the session has died; the
    ///   session is dropped
    /// - `Execution` for backend failures
    pub async fn execute_sql(&mut self, sql: &str) -> Result<ExecutionOutcome> {
        let tunnel_lost = match &self.active {
            None => return Err(BrokerError::NotConnected),
            Some(active) => active.tunnel.is_some() && !self.tunnel.is_active(),
        };
        if tunnel_lost {
            return Err(self.invalidate_after_tunnel_loss().await);
        }
        let Some(active) = self.active.as_ref() else {
            return Err(BrokerError::NotConnected);
        };

        let dialect = active.database_type.id();
        if self.config.read_only
            && let Err(violation) = check_read_only(sql, dialect)
        {
            warn!(
                dialect,
                keyword = %violation.keyword,
                "Statement rejected by read-only policy"
            );
            return Ok(ExecutionOutcome::Rejected(violation));
        }

        let statement = match self.config.max_rows {
            Some(max_rows) => apply_row_cap(sql, max_rows, dialect),
            None => sql.to_string(),
        };

        let result = active.connection.execute_sql(&statement).await?;
        debug!(
            rows = result.row_count(),
            rows_affected = result.rows_affected,
            "Statement executed"
        );
        Ok(ExecutionOutcome::Completed(result))
    }

    async fn invalidate_after_tunnel_loss(&mut self) -> BrokerError {
        let reason = self
            .tunnel
            .last_failure()
            .unwrap_or_else(|| "tunnel closed".to_string());

        if let Some(active) = self.active.take()
            && let Err(e) = active.connection.disconnect().await
        {
            debug!(error = %e, "Backend disconnect after tunnel loss failed");
        }
        self.tunnel.close().await;

        warn!(reason = %reason, "Connection invalidated after tunnel loss");
        BrokerError::tunnel_transport(format!("SSH tunnel is no longer active: {}", reason))
    }

    /// Closes the backend session and the tunnel.
    ///
    /// Both are always attempted and the session state is cleared even when
    /// the backend reports an error.
    ///
    /// # Errors
    /// Returns the backend's disconnect error, after the tunnel is closed.
    pub async fn disconnect(&mut self) -> Result<()> {
        let backend_result = match self.active.take() {
            Some(active) => {
                let result = active.connection.disconnect().await;
                if let Err(e) = &result {
                    warn!(error = %e, "Backend disconnect failed");
                } else {
                    info!(backend = %active.database_type, "Disconnected");
                }
                result
            }
            None => Ok(()),
        };

        self.tunnel.close().await;
        backend_result
    }
}
