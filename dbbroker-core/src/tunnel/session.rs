//! Tunnel session lifecycle.
//!
//! A [`TunnelSession`] owns at most one active forwarding. Establishing it
//! opens an authenticated bastion link, binds a loopback listener and starts
//! two background tasks: the accept loop, which hands every inbound
//! connection to the link on its own task, and the keepalive monitor, which
//! tears the forwarding down when the transport dies.

use super::ssh::SshTransport;
use super::transport::{BastionLink, BastionTransport};
use crate::config::{BastionAuth, BastionConfig, BrokerConfig};
use crate::error::BrokerError;
use crate::Result;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What to forward through the bastion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    /// Database host as seen from the bastion
    pub target_host: String,
    /// Database port as seen from the bastion
    pub target_port: u16,
    /// Loopback port to listen on; 0 lets the OS choose
    pub local_port: u16,
}

impl TunnelRequest {
    /// Creates a request that lets the OS choose the local port.
    pub fn new(target_host: impl Into<String>, target_port: u16) -> Self {
        Self {
            target_host: target_host.into(),
            target_port,
            local_port: 0,
        }
    }

    /// Builder method to request a fixed local port.
    pub fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = local_port;
        self
    }
}

/// Description of an active forwarding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelHandle {
    /// Port actually bound on 127.0.0.1
    pub local_port: u16,
    /// Forwarding target host
    pub target_host: String,
    /// Forwarding target port
    pub target_port: u16,
}

impl TunnelHandle {
    /// Loopback address clients should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.local_port))
    }
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    /// Never established, or the last attempt failed
    Idle,
    /// An `establish` call is in progress
    Establishing,
    /// Forwarding connections
    Active,
    /// Closed by the caller or by the keepalive monitor
    Closed,
}

struct ActiveTunnel {
    handle: TunnelHandle,
    link: Arc<dyn BastionLink>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

enum TunnelState {
    Idle,
    Establishing,
    Active(ActiveTunnel),
    Closed { failure: Option<String> },
}

/// Owns the bastion forwarding for one broker.
pub struct TunnelSession {
    transport: Arc<dyn BastionTransport>,
    keepalive_interval: Duration,
    state: Arc<Mutex<TunnelState>>,
}

impl std::fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSession")
            .field("status", &self.status())
            .field("keepalive_interval", &self.keepalive_interval)
            .finish()
    }
}

impl TunnelSession {
    /// Creates an idle session backed by the SSH transport, using the
    /// broker's connect timeout and keepalive interval.
    pub fn new(config: &BrokerConfig) -> Self {
        let transport = SshTransport::new(config.connect_timeout, config.keepalive_interval);
        Self::with_transport(Arc::new(transport), config.keepalive_interval)
    }

    /// Creates an idle session over a custom transport.
    pub fn with_transport(
        transport: Arc<dyn BastionTransport>,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            transport,
            keepalive_interval,
            state: Arc::new(Mutex::new(TunnelState::Idle)),
        }
    }

    /// Opens the bastion link and starts forwarding.
    ///
    /// # Errors
    /// - `TunnelConfig` if the configuration is incomplete or a tunnel is
    ///   already establishing or active (no I/O is attempted)
    /// - `TunnelAuth` if the key file is unreadable or credentials are rejected
    /// - `TunnelTransport` if the bastion cannot be reached
    /// - `LocalBind` if the loopback port cannot be bound
    pub async fn establish(
        &self,
        config: &BastionConfig,
        request: TunnelRequest,
    ) -> Result<TunnelHandle> {
        {
            let mut state = lock(&self.state);
            match *state {
                TunnelState::Establishing => {
                    return Err(BrokerError::tunnel_config("A tunnel is already being established"));
                }
                TunnelState::Active(ref active) => {
                    return Err(BrokerError::tunnel_config(format!(
                        "A tunnel is already active on 127.0.0.1:{}",
                        active.handle.local_port
                    )));
                }
                TunnelState::Idle | TunnelState::Closed { .. } => {
                    *state = TunnelState::Establishing;
                }
            }
        }
        let _pending = PendingEstablish(&self.state);

        match self.open_forwarding(config, &request).await {
            Ok(active) => {
                let handle = active.handle.clone();
                *lock(&self.state) = TunnelState::Active(active);
                info!(
                    bastion = %config,
                    local_port = handle.local_port,
                    target = %format!("{}:{}", handle.target_host, handle.target_port),
                    "SSH tunnel established"
                );
                Ok(handle)
            }
            Err(e) => {
                *lock(&self.state) = TunnelState::Idle;
                warn!(bastion = %config, error = %e, "SSH tunnel could not be established");
                Err(e)
            }
        }
    }

    async fn open_forwarding(
        &self,
        config: &BastionConfig,
        request: &TunnelRequest,
    ) -> Result<ActiveTunnel> {
        config.validate()?;
        if request.target_host.trim().is_empty() || request.target_port == 0 {
            return Err(BrokerError::tunnel_config("Tunnel target host and port are required"));
        }

        if let Some(BastionAuth::PrivateKey { path, .. }) = config.auth() {
            tokio::fs::read(path).await.map_err(|e| {
                BrokerError::tunnel_auth_with(
                    format!("Cannot read private key {}", path.display()),
                    e,
                )
            })?;
        }

        let link = self.transport.open(config).await?;

        let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, request.local_port)).await {
            Ok(listener) => listener,
            Err(source) => {
                link.disconnect().await;
                return Err(BrokerError::LocalBind {
                    port: request.local_port,
                    source,
                });
            }
        };
        let local_port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(source) => {
                link.disconnect().await;
                return Err(BrokerError::LocalBind {
                    port: request.local_port,
                    source,
                });
            }
        };

        let handle = TunnelHandle {
            local_port,
            target_host: request.target_host.clone(),
            target_port: request.target_port,
        };
        let cancel = CancellationToken::new();

        let accept = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&link),
            handle.clone(),
            cancel.clone(),
        ));
        let monitor = tokio::spawn(keepalive_monitor(
            Arc::clone(&link),
            Arc::clone(&self.state),
            cancel.clone(),
            self.keepalive_interval,
        ));

        Ok(ActiveTunnel {
            handle,
            link,
            cancel,
            tasks: vec![accept, monitor],
        })
    }

    /// Stops forwarding and releases the local port. Idempotent.
    pub async fn close(&self) {
        let active = {
            let mut state = lock(&self.state);
            match std::mem::replace(&mut *state, TunnelState::Closed { failure: None }) {
                TunnelState::Active(active) => active,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        active.cancel.cancel();
        for task in active.tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "Tunnel task ended abnormally");
            }
        }
        active.link.disconnect().await;
        info!(local_port = active.handle.local_port, "SSH tunnel closed");
    }

    /// Describes the active forwarding, if any.
    pub fn info(&self) -> Option<TunnelHandle> {
        match &*lock(&self.state) {
            TunnelState::Active(active) => Some(active.handle.clone()),
            _ => None,
        }
    }

    /// Returns true while a forwarding is active.
    pub fn is_active(&self) -> bool {
        matches!(*lock(&self.state), TunnelState::Active(_))
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TunnelStatus {
        match &*lock(&self.state) {
            TunnelState::Idle => TunnelStatus::Idle,
            TunnelState::Establishing => TunnelStatus::Establishing,
            TunnelState::Active(_) => TunnelStatus::Active,
            TunnelState::Closed { .. } => TunnelStatus::Closed,
        }
    }

    /// Reason the last forwarding was torn down by the keepalive monitor.
    pub fn last_failure(&self) -> Option<String> {
        match &*lock(&self.state) {
            TunnelState::Closed { failure } => failure.clone(),
            _ => None,
        }
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        if let TunnelState::Active(active) = &*lock(&self.state) {
            active.cancel.cancel();
        }
    }
}

/// Returns the session to Idle if an `establish` future is dropped before
/// it settles.
struct PendingEstablish<'a>(&'a Mutex<TunnelState>);

impl Drop for PendingEstablish<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.0);
        if matches!(*state, TunnelState::Establishing) {
            *state = TunnelState::Idle;
        }
    }
}

fn lock(state: &Mutex<TunnelState>) -> MutexGuard<'_, TunnelState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn accept_loop(
    listener: TcpListener,
    link: Arc<dyn BastionLink>,
    handle: TunnelHandle,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, local_port = handle.local_port, "Accepted tunnel connection");
                    let link = Arc::clone(&link);
                    let target_host = handle.target_host.clone();
                    let target_port = handle.target_port;
                    let child = cancel.child_token();
                    tokio::spawn(async move {
                        match link.forward(stream, &target_host, target_port, child).await {
                            Ok((up, down)) => {
                                debug!(%peer, bytes_up = up, bytes_down = down, "Tunnel connection finished");
                            }
                            Err(e) => {
                                debug!(%peer, error = %e, "Tunnel connection ended with error");
                            }
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Failed to accept tunnel connection"),
            },
        }
    }
    debug!(local_port = handle.local_port, "Tunnel listener stopped");
}

async fn keepalive_monitor(
    link: Arc<dyn BastionLink>,
    state: Arc<Mutex<TunnelState>>,
    cancel: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }

        if let Err(e) = link.keepalive().await {
            if cancel.is_cancelled() {
                return;
            }
            error!(error = %e, "Bastion transport lost, closing tunnel");
            cancel.cancel();
            {
                let mut guard = lock(&state);
                let owns_state =
                    matches!(&*guard, TunnelState::Active(active) if active.cancel.is_cancelled());
                if owns_state {
                    *guard = TunnelState::Closed {
                        failure: Some(e.to_string()),
                    };
                }
            }
            link.disconnect().await;
            return;
        }
    }
}
