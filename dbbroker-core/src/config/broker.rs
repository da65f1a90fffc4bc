//! Broker-wide execution settings.
//!
//! This module provides the `BrokerConfig` struct, the process-wide switches
//! that govern every execution request: read-only mode and the row cap.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings applied by the broker to every connection and execution.
///
/// # Example
/// ```rust
/// use dbbroker_core::config::BrokerConfig;
///
/// let config = BrokerConfig::default()
///     .with_read_only(true)
///     .with_max_rows(500);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.max_rows, Some(500));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Reject statements whose leading keyword is not allow-listed
    pub read_only: bool,
    /// Cap applied to SELECT statements; `None` disables rewriting
    pub max_rows: Option<u32>,
    /// Timeout for backend connection establishment
    pub connect_timeout: Duration,
    /// Interval between transport keepalives while a tunnel is active
    pub keepalive_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            max_rows: None,
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

impl std::fmt::Display for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BrokerConfig(read_only={}, max_rows={})",
            self.read_only,
            self.max_rows
                .map_or_else(|| "unlimited".to_string(), |n| n.to_string())
        )
    }
}

impl BrokerConfig {
    /// Validates broker settings.
    ///
    /// # Errors
    /// Returns a configuration error if a value is out of range
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_rows == Some(0) {
            return Err(crate::error::BrokerError::configuration(
                "max_rows must be greater than 0",
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(crate::error::BrokerError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        if self.keepalive_interval.is_zero() {
            return Err(crate::error::BrokerError::configuration(
                "keepalive_interval must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Builder method to toggle read-only mode.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Builder method to set the row cap.
    pub fn with_max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// Builder method to set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder method to set the keepalive interval.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }
}
