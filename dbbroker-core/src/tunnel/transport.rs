//! Transport seam between the tunnel lifecycle and the encrypted session.

use crate::{Result, config::BastionConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Byte counts for one forwarded connection: (to target, from target).
pub type ForwardStats = (u64, u64);

/// Opens authenticated sessions to a bastion host.
#[async_trait]
pub trait BastionTransport: Send + Sync {
    /// Connects and authenticates against the bastion described by `config`.
    ///
    /// # Errors
    /// - `TunnelTransport` if the bastion cannot be reached or the handshake fails
    /// - `TunnelAuth` if the credentials are rejected
    async fn open(&self, config: &BastionConfig) -> Result<Arc<dyn BastionLink>>;
}

/// One authenticated session to a bastion host.
///
/// A link serves any number of concurrent `forward` calls; each call owns a
/// single local connection and its own channel to the target.
#[async_trait]
pub trait BastionLink: Send + Sync {
    /// Relays bytes between `local` and `target_host:target_port` until
    /// either side closes, an error occurs, or `cancel` fires.
    async fn forward(
        &self,
        local: TcpStream,
        target_host: &str,
        target_port: u16,
        cancel: CancellationToken,
    ) -> std::io::Result<ForwardStats>;

    /// Probes the session; an error means the transport is gone.
    async fn keepalive(&self) -> Result<()>;

    /// Terminates the session. Best effort, never fails.
    async fn disconnect(&self);
}
