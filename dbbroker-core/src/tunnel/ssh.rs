//! SSH bastion transport built on `ssh2` (libssh2).
//!
//! Handshake and authentication run in blocking mode on the blocking pool.
//! Afterwards the session is switched to non-blocking mode and shared by
//! every forwarded connection: each one runs its own pump on the blocking
//! pool with a dedicated `direct-tcpip` channel, so a slow or broken
//! connection never stalls the others.

use super::transport::{BastionLink, BastionTransport, ForwardStats};
use crate::config::{BastionAuth, BastionConfig};
use crate::error::BrokerError;
use crate::security::Secret;
use crate::Result;
use async_trait::async_trait;
use ssh2::{Channel, Session};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Back-off while neither side of a pump has data.
const IDLE_BACKOFF: Duration = Duration::from_millis(2);

/// Pump buffer size.
const PUMP_BUFFER: usize = 32 * 1024;

/// Opens SSH sessions with password or public key authentication.
#[derive(Debug, Clone)]
pub struct SshTransport {
    connect_timeout: Duration,
    keepalive_interval: Duration,
}

impl SshTransport {
    /// Creates a transport with the given connect/handshake timeout and
    /// libssh2 keepalive interval.
    pub fn new(connect_timeout: Duration, keepalive_interval: Duration) -> Self {
        Self {
            connect_timeout,
            keepalive_interval,
        }
    }
}

#[async_trait]
impl BastionTransport for SshTransport {
    async fn open(&self, config: &BastionConfig) -> Result<Arc<dyn BastionLink>> {
        let config = config.clone();
        let timeout = self.connect_timeout;
        let keepalive = keepalive_seconds(self.keepalive_interval);

        let session =
            tokio::task::spawn_blocking(move || connect_blocking(&config, timeout, keepalive))
            .await
            .map_err(|e| BrokerError::tunnel_transport_with("SSH handshake task failed", e))??;

        Ok(Arc::new(SshLink { session }))
    }
}

fn connect_blocking(config: &BastionConfig, timeout: Duration, keepalive: u32) -> Result<Session> {
    let target = format!("{}:{}", config.host, config.port);
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| BrokerError::tunnel_transport_with(format!("Cannot resolve {}", target), e))?
        .next()
        .ok_or_else(|| BrokerError::tunnel_transport(format!("No address for {}", target)))?;

    let tcp = StdTcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| BrokerError::tunnel_transport_with(format!("Cannot reach {}", target), e))?;

    let mut session = Session::new()
        .map_err(|e| BrokerError::tunnel_transport_with("Cannot create SSH session", e))?;
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| {
        BrokerError::tunnel_transport_with(format!("SSH handshake with {} failed", target), e)
    })?;

    let auth_result = match config.auth() {
        Some(BastionAuth::Password(password)) => {
            session.userauth_password(&config.username, password.expose())
        }
        Some(BastionAuth::PrivateKey { path, passphrase }) => session.userauth_pubkey_file(
            &config.username,
            None,
            path,
            passphrase.map(Secret::expose),
        ),
        None => {
            return Err(BrokerError::tunnel_config(
                "Either an SSH password or a private key is required",
            ));
        }
    };
    auth_result.map_err(|e| {
        BrokerError::tunnel_auth_with(format!("Authentication rejected for {}", config), e)
    })?;

    if !session.authenticated() {
        return Err(BrokerError::tunnel_auth(format!(
            "Authentication incomplete for {}",
            config
        )));
    }

    session.set_keepalive(true, keepalive);
    session.set_timeout(0);
    session.set_blocking(false);

    tracing::debug!(bastion = %target, "SSH session authenticated");
    Ok(session)
}

/// Whole seconds for libssh2, which treats 0 as "disabled".
fn keepalive_seconds(interval: Duration) -> u32 {
    u32::try_from(interval.as_secs()).unwrap_or(u32::MAX).max(1)
}

/// Authenticated, non-blocking SSH session.
pub struct SshLink {
    session: Session,
}

#[async_trait]
impl BastionLink for SshLink {
    async fn forward(
        &self,
        local: TcpStream,
        target_host: &str,
        target_port: u16,
        cancel: CancellationToken,
    ) -> io::Result<ForwardStats> {
        let local = local.into_std()?;
        let session = self.session.clone();
        let target_host = target_host.to_string();

        tokio::task::spawn_blocking(move || {
            pump(&session, local, &target_host, target_port, &cancel)
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn keepalive(&self) -> Result<()> {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || match session.keepalive_send() {
            Ok(_) => Ok(()),
            Err(e) => {
                let io_err = io::Error::from(e);
                if io_err.kind() == ErrorKind::WouldBlock {
                    Ok(())
                } else {
                    Err(BrokerError::tunnel_transport_with("Bastion keepalive failed", io_err))
                }
            }
        })
        .await
        .map_err(|e| BrokerError::tunnel_transport_with("Keepalive task failed", e))?
    }

    async fn disconnect(&self) {
        let session = self.session.clone();
        let _ = tokio::task::spawn_blocking(move || {
            session.set_timeout(2_000);
            session.set_blocking(true);
            let _ = session.disconnect(None, "tunnel closed", None);
        })
        .await;
    }
}

/// Remote end of a forwarded connection.
trait RemoteChannel: Read + Write {
    /// Signals that no more bytes will be written.
    fn half_close(&mut self) -> io::Result<()>;

    /// Returns true once the target has closed its side.
    fn remote_eof(&self) -> bool;
}

impl RemoteChannel for Channel {
    fn half_close(&mut self) -> io::Result<()> {
        self.send_eof().map_err(io::Error::from)
    }

    fn remote_eof(&self) -> bool {
        self.eof()
    }
}

/// Relays one local connection over its own channel until either side ends.
fn pump(
    session: &Session,
    mut local: StdTcpStream,
    target_host: &str,
    target_port: u16,
    cancel: &CancellationToken,
) -> io::Result<ForwardStats> {
    let mut channel = loop {
        if cancel.is_cancelled() {
            return Ok((0, 0));
        }
        match session.channel_direct_tcpip(target_host, target_port, None) {
            Ok(channel) => break channel,
            Err(e) => {
                let io_err = io::Error::from(e);
                if io_err.kind() != ErrorKind::WouldBlock {
                    return Err(io_err);
                }
                std::thread::sleep(IDLE_BACKOFF);
            }
        }
    };

    let outcome = relay(&mut local, &mut channel, cancel);
    let _ = channel.close();
    outcome
}

/// Copies bytes both ways. Local EOF is passed on as a half-close and the
/// channel is drained until the target closes too.
fn relay<C: RemoteChannel>(
    local: &mut StdTcpStream,
    channel: &mut C,
    cancel: &CancellationToken,
) -> io::Result<ForwardStats> {
    local.set_nonblocking(true)?;

    let mut buf = vec![0u8; PUMP_BUFFER];
    let mut upstream = 0u64;
    let mut downstream = 0u64;
    let mut local_open = true;

    let outcome = loop {
        if cancel.is_cancelled() {
            break Ok(());
        }
        let mut idle = true;

        if local_open {
            match local.read(&mut buf) {
                Ok(0) => {
                    if let Err(e) = retry_would_block(|| channel.half_close(), cancel) {
                        break Err(e);
                    }
                    local_open = false;
                    idle = false;
                }
                Ok(n) => {
                    if let Err(e) = write_fully(channel, &buf[..n], cancel) {
                        break Err(e);
                    }
                    upstream = upstream.saturating_add(n as u64);
                    idle = false;
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                Err(e) => break Err(e),
            }
        }

        match channel.read(&mut buf) {
            Ok(0) => {
                if channel.remote_eof() {
                    break Ok(());
                }
            }
            Ok(n) => {
                if let Err(e) = write_fully(local, &buf[..n], cancel) {
                    break Err(e);
                }
                downstream = downstream.saturating_add(n as u64);
                idle = false;
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => break Err(e),
        }

        if idle {
            std::thread::sleep(IDLE_BACKOFF);
        }
    };

    if local_open {
        let _ = channel.half_close();
    }
    let _ = local.shutdown(Shutdown::Both);

    outcome.map(|()| (upstream, downstream))
}

fn retry_would_block(
    mut op: impl FnMut() -> io::Result<()>,
    cancel: &CancellationToken,
) -> io::Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Err(io::Error::new(ErrorKind::ConnectionAborted, "tunnel closed"));
        }
        match op() {
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                std::thread::sleep(IDLE_BACKOFF);
            }
            other => return other,
        }
    }
}

fn write_fully<W: Write + ?Sized>(writer: &mut W, mut data: &[u8], cancel: &CancellationToken) -> io::Result<()> {
    while !data.is_empty() {
        if cancel.is_cancelled() {
            return Err(io::Error::new(ErrorKind::ConnectionAborted, "tunnel closed"));
        }
        match writer.write(data) {
            Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
            Ok(n) => data = &data[n..],
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                std::thread::sleep(IDLE_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
    writer.flush().or_else(|e| {
        if e.kind() == ErrorKind::WouldBlock { Ok(()) } else { Err(e) }
    })
}
