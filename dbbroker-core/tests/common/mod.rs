//! Test doubles shared by the integration suites.
//!
//! `DirectTransport` stands in for an SSH bastion: every forwarded
//! connection is relayed straight to the target over plain TCP.
//! `RecordingConnector` stands in for a database backend and records the
//! descriptors and statements it receives.

#![allow(dead_code)]

use async_trait::async_trait;
use dbbroker_core::adapters::{Connector, DatabaseConnection};
use dbbroker_core::config::BastionConfig;
use dbbroker_core::models::{BackendCapability, DatabaseType, QueryResult};
use dbbroker_core::tunnel::{BastionLink, BastionTransport, ForwardStats};
use dbbroker_core::{BrokerConfig, BrokerError, ConnectionDescriptor, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Bastion transport double
// =============================================================================

/// Shared switches and counters for [`DirectTransport`].
#[derive(Debug, Default)]
pub struct TransportCounters {
    pub opened: AtomicUsize,
    pub disconnected: AtomicUsize,
    pub link_down: AtomicBool,
}

/// Transport whose links relay over plain TCP.
#[derive(Debug, Clone, Default)]
pub struct DirectTransport {
    pub counters: Arc<TransportCounters>,
    /// When set, `open` waits for a permit before returning
    pub gate: Option<Arc<Notify>>,
}

impl DirectTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose `open` blocks until the returned gate is notified.
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let transport = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (transport, gate)
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> usize {
        self.counters.disconnected.load(Ordering::SeqCst)
    }

    /// Makes every subsequent keepalive fail.
    pub fn drop_link(&self) {
        self.counters.link_down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BastionTransport for DirectTransport {
    async fn open(&self, _config: &BastionConfig) -> Result<Arc<dyn BastionLink>> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(Arc::new(DirectLink {
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct DirectLink {
    counters: Arc<TransportCounters>,
}

#[async_trait]
impl BastionLink for DirectLink {
    async fn forward(
        &self,
        mut local: TcpStream,
        target_host: &str,
        target_port: u16,
        cancel: CancellationToken,
    ) -> std::io::Result<ForwardStats> {
        let mut upstream = TcpStream::connect((target_host, target_port)).await?;
        tokio::select! {
            copied = tokio::io::copy_bidirectional(&mut local, &mut upstream) => copied,
            () = cancel.cancelled() => Ok((0, 0)),
        }
    }

    async fn keepalive(&self) -> Result<()> {
        if self.counters.link_down.load(Ordering::SeqCst) {
            Err(BrokerError::tunnel_transport("connection reset by bastion"))
        } else {
            Ok(())
        }
    }

    async fn disconnect(&self) {
        self.counters.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

/// Password-authenticated bastion config; the double ignores it.
pub fn bastion_config() -> BastionConfig {
    BastionConfig::with_password("bastion.test", "ops", "bastion-secret")
}

/// Starts an echo server on loopback and returns its port.
pub async fn spawn_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    port
}

/// Writes `message` and reads the same number of bytes back.
pub async fn round_trip(stream: &mut TcpStream, message: &[u8]) -> Vec<u8> {
    stream.write_all(message).await.unwrap();
    let mut buf = vec![0u8; message.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// Backend double
// =============================================================================

/// What the recording backend saw.
#[derive(Debug, Default)]
pub struct BackendLog {
    pub descriptors: Mutex<Vec<ConnectionDescriptor>>,
    pub statements: Mutex<Vec<String>>,
    pub disconnects: AtomicUsize,
}

impl BackendLog {
    pub fn descriptors(&self) -> Vec<ConnectionDescriptor> {
        self.descriptors.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

/// Connector that records instead of connecting.
pub struct RecordingConnector {
    capability: BackendCapability,
    pub log: Arc<BackendLog>,
    pub fail_connect: bool,
    pub fail_disconnect: bool,
}

impl RecordingConnector {
    pub fn new(database_type: DatabaseType) -> Self {
        Self {
            capability: BackendCapability::for_database(database_type, true),
            log: Arc::new(BackendLog::default()),
            fail_connect: false,
            fail_disconnect: false,
        }
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    fn capability(&self) -> &BackendCapability {
        &self.capability
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        _config: &BrokerConfig,
    ) -> Result<Box<dyn DatabaseConnection>> {
        self.log.descriptors.lock().unwrap().push(descriptor.clone());
        if self.fail_connect {
            return Err(BrokerError::backend_connect(
                format!("Cannot connect to {}", descriptor.redacted()),
                std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            ));
        }
        Ok(Box::new(RecordingConnection {
            database_type: self.capability.database_type,
            log: Arc::clone(&self.log),
            fail_disconnect: self.fail_disconnect,
        }))
    }
}

struct RecordingConnection {
    database_type: DatabaseType,
    log: Arc<BackendLog>,
    fail_disconnect: bool,
}

#[async_trait]
impl DatabaseConnection for RecordingConnection {
    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        self.log.statements.lock().unwrap().push(sql.to_string());
        Ok(QueryResult::default())
    }

    async fn disconnect(&self) -> Result<()> {
        self.log.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect {
            return Err(BrokerError::execution_msg("server went away"));
        }
        Ok(())
    }

    fn database_type(&self) -> DatabaseType {
        self.database_type
    }
}
