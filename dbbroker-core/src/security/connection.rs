//! Parsed connection descriptors.
//!
//! A [`ConnectionDescriptor`] is immutable once parsed. Pointing it at a
//! tunnel endpoint produces a new descriptor and leaves the original alone.
//!
//! # Security
//! - `Display` and `Debug` render the redacted form only
//! - Parse errors never echo the input, which may contain a password

use super::redaction::redact_database_url;
use crate::{Result, error::BrokerError};
use url::Url;

/// Parsed connection string identifying a target database.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    url: Url,
}

impl ConnectionDescriptor {
    /// Parses a connection string.
    ///
    /// # Errors
    /// Returns a configuration error if the text is not a URL. The error
    /// message names the parse failure, not the input.
    ///
    /// # Example
    /// ```rust
    /// use dbbroker_core::security::ConnectionDescriptor;
    ///
    /// let descriptor = ConnectionDescriptor::parse("postgres://app:pw@db:5432/app")?;
    /// assert_eq!(descriptor.scheme(), "postgres");
    /// assert_eq!(descriptor.host(), Some("db"));
    /// assert_eq!(descriptor.to_string(), "postgres://app:**@db:5432/app");
    /// # Ok::<(), dbbroker_core::BrokerError>(())
    /// ```
    pub fn parse(connection_string: &str) -> Result<Self> {
        let url = Url::parse(connection_string.trim()).map_err(|e| {
            BrokerError::configuration(format!("Invalid connection string format: {}", e))
        })?;
        Ok(Self { url })
    }

    /// Scheme, e.g. `postgres` or `sqlserver`.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host, if the descriptor names one.
    pub fn host(&self) -> Option<&str> {
        self.url.host_str().filter(|h| !h.is_empty())
    }

    /// Explicit port, if present.
    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// Database name taken from the path (leading `/` removed).
    pub fn database(&self) -> Option<&str> {
        let path = self.url.path().trim_start_matches('/');
        if path.is_empty() { None } else { Some(path) }
    }

    /// Raw URL path. File-based dialects keep their file path here.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Username, possibly empty.
    pub fn username(&self) -> &str {
        self.url.username()
    }

    /// Password, if present.
    pub fn password(&self) -> Option<&str> {
        self.url.password()
    }

    /// Dialect-specific query options in declaration order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url.query_pairs().into_owned().collect()
    }

    /// Looks up one query option, case-insensitively on the key.
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.into_owned())
    }

    /// Full connection string including credentials.
    ///
    /// # Security
    /// Only hand this to a driver. Use `redacted()` for anything surfaced.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Returns a copy pointing at `host:port`, every other field unchanged.
    ///
    /// # Errors
    /// Returns a configuration error if the scheme cannot carry a host.
    pub fn with_endpoint(&self, host: &str, port: u16) -> Result<Self> {
        let mut url = self.url.clone();
        url.set_host(Some(host)).map_err(|e| {
            BrokerError::configuration(format!(
                "Cannot rewrite host of {}: {}",
                self.redacted(),
                e
            ))
        })?;
        url.set_port(Some(port)).map_err(|()| {
            BrokerError::configuration(format!("Cannot rewrite port of {}", self.redacted()))
        })?;
        Ok(Self { url })
    }

    /// Connection string with the password masked.
    pub fn redacted(&self) -> String {
        redact_database_url(self.url.as_str())
    }
}

impl std::str::FromStr for ConnectionDescriptor {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionDescriptor")
            .field(&self.redacted())
            .finish()
    }
}
