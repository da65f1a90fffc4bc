//! Bastion host configuration.
//!
//! [`BastionSettings`] is the raw tunnel surface as supplied by flags or
//! environment and may be partial. [`BastionSettings::resolve`] turns it
//! into a validated [`BastionConfig`], consulting the SSH config file when
//! the host looks like an alias.

use crate::error::BrokerError;
use crate::security::{Secret, redact_bastion_config};
use crate::tunnel::ssh_config::{default_ssh_config_path, looks_like_alias, resolve_bastion};
use std::path::{Path, PathBuf};

/// Concrete bastion endpoint and authentication material.
///
/// Password and private key may both be set; the password wins.
#[derive(Clone, PartialEq, Eq)]
pub struct BastionConfig {
    /// Bastion host name or address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub username: String,
    /// Password authentication
    pub password: Option<Secret>,
    /// Private key file for public key authentication
    pub private_key: Option<PathBuf>,
    /// Passphrase protecting the private key
    pub passphrase: Option<Secret>,
}

/// Authentication method selected from a [`BastionConfig`].
#[derive(Debug, Clone, Copy)]
pub enum BastionAuth<'a> {
    /// Password authentication
    Password(&'a Secret),
    /// Public key authentication from a key file
    PrivateKey {
        /// Key file path
        path: &'a Path,
        /// Optional key passphrase
        passphrase: Option<&'a Secret>,
    },
}

impl BastionConfig {
    /// Default SSH port.
    pub const DEFAULT_PORT: u16 = 22;

    /// Creates a password-authenticated configuration on port 22.
    pub fn with_password(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<Secret>,
    ) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            username: username.into(),
            password: Some(password.into()),
            private_key: None,
            passphrase: None,
        }
    }

    /// Creates a key-authenticated configuration on port 22.
    pub fn with_private_key(
        host: impl Into<String>,
        username: impl Into<String>,
        private_key: PathBuf,
        passphrase: Option<Secret>,
    ) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            username: username.into(),
            password: None,
            private_key: Some(private_key),
            passphrase,
        }
    }

    /// Builder method to set the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Selects the authentication method, password first.
    pub fn auth(&self) -> Option<BastionAuth<'_>> {
        if let Some(password) = self.password.as_ref().filter(|p| !p.is_empty()) {
            return Some(BastionAuth::Password(password));
        }
        self.private_key
            .as_deref()
            .map(|path| BastionAuth::PrivateKey {
                path,
                passphrase: self.passphrase.as_ref(),
            })
    }

    /// Validates completeness before any network attempt.
    ///
    /// # Errors
    /// Returns `TunnelConfig` if host or username is missing, the port is 0,
    /// or no authentication method is present.
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.trim().is_empty() {
            return Err(BrokerError::tunnel_config("SSH host is required"));
        }
        if self.username.trim().is_empty() {
            return Err(BrokerError::tunnel_config(format!(
                "SSH user is required for bastion {}",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(BrokerError::tunnel_config("SSH port must be greater than 0"));
        }
        if self.auth().is_none() {
            return Err(BrokerError::tunnel_config(format!(
                "Either an SSH password or a private key is required for {}",
                redact_bastion_config(self)
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for BastionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&redact_bastion_config(self))
    }
}

impl std::fmt::Debug for BastionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BastionConfig")
            .field(&redact_bastion_config(self))
            .finish()
    }
}

/// Tunnel settings as supplied by the operator.
///
/// A host value is what switches tunnelling on. Explicit values override
/// anything found in the SSH config file for an alias host.
#[derive(Debug, Clone, Default)]
pub struct BastionSettings {
    /// Bastion host, address or SSH config alias
    pub host: Option<String>,
    /// Bastion port
    pub port: Option<u16>,
    /// Login user
    pub username: Option<String>,
    /// Password
    pub password: Option<Secret>,
    /// Private key path
    pub private_key: Option<PathBuf>,
    /// Private key passphrase
    pub passphrase: Option<Secret>,
    /// SSH config file consulted for alias hosts (defaults to `~/.ssh/config`)
    pub ssh_config_path: Option<PathBuf>,
}

impl BastionSettings {
    /// Returns true when a bastion host has been supplied.
    pub fn is_configured(&self) -> bool {
        self.host.as_deref().is_some_and(|h| !h.trim().is_empty())
    }

    /// Resolves these settings into a validated bastion configuration.
    ///
    /// Returns `Ok(None)` when no bastion host is configured.
    ///
    /// # Errors
    /// Returns `TunnelConfig` when the merged result is incomplete.
    pub fn resolve(&self) -> crate::Result<Option<BastionConfig>> {
        let Some(host) = self.host.as_deref().map(str::trim).filter(|h| !h.is_empty()) else {
            return Ok(None);
        };

        let from_file = if looks_like_alias(host) {
            let path = self.ssh_config_path.clone().or_else(default_ssh_config_path);
            let resolved = path.as_deref().and_then(|p| resolve_bastion(host, p));
            if resolved.is_some() {
                tracing::debug!(alias = host, "Resolved bastion alias from SSH config");
            }
            resolved
        } else {
            None
        };

        let username = self
            .username
            .clone()
            .or_else(|| from_file.as_ref().map(|c| c.username.clone()))
            .ok_or_else(|| {
                BrokerError::tunnel_config(format!("SSH user is required for bastion {}", host))
            })?;

        let config = BastionConfig {
            host: from_file
                .as_ref()
                .map_or_else(|| host.to_string(), |c| c.host.clone()),
            port: self
                .port
                .or_else(|| from_file.as_ref().map(|c| c.port))
                .unwrap_or(BastionConfig::DEFAULT_PORT),
            username,
            password: self.password.clone(),
            private_key: self
                .private_key
                .clone()
                .or_else(|| from_file.as_ref().and_then(|c| c.private_key.clone())),
            passphrase: self
                .passphrase
                .clone()
                .or_else(|| from_file.as_ref().and_then(|c| c.passphrase.clone())),
        };

        config.validate()?;
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bastion_validation_requires_user() {
        let config = BastionConfig::with_password("bastion", "", "pw");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BrokerError::TunnelConfig { .. }));
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn test_bastion_validation_requires_auth() {
        let config = BastionConfig {
            host: "bastion".to_string(),
            port: 22,
            username: "ops".to_string(),
            password: None,
            private_key: None,
            passphrase: None,
        };
        assert!(matches!(
            config.validate(),
            Err(BrokerError::TunnelConfig { .. })
        ));
    }

    #[test]
    fn test_password_takes_precedence_over_key() {
        let mut config = BastionConfig::with_password("bastion", "ops", "pw");
        config.private_key = Some(PathBuf::from("/tmp/id_rsa"));
        assert!(config.validate().is_ok());
        assert!(matches!(config.auth(), Some(BastionAuth::Password(_))));
    }

    #[test]
    fn test_settings_without_host_resolve_to_none() {
        let settings = BastionSettings::default();
        assert!(!settings.is_configured());
        assert!(settings.resolve().unwrap().is_none());
    }

    #[test]
    fn test_settings_direct_host_skip_config_file() {
        let settings = BastionSettings {
            host: Some("10.1.2.3".to_string()),
            username: Some("ops".to_string()),
            password: Some("pw".into()),
            ssh_config_path: Some(PathBuf::from("/nonexistent/ssh/config")),
            ..Default::default()
        };
        let config = settings.resolve().unwrap().unwrap();
        assert_eq!(config.host, "10.1.2.3");
        assert_eq!(config.port, 22);
        assert_eq!(config.username, "ops");
    }

    #[test]
    fn test_settings_missing_user_is_config_error() {
        let settings = BastionSettings {
            host: Some("bastion.example.com".to_string()),
            password: Some("pw".into()),
            ..Default::default()
        };
        assert!(matches!(
            settings.resolve(),
            Err(BrokerError::TunnelConfig { .. })
        ));
    }

    #[test]
    fn test_settings_alias_merges_with_explicit_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_bastion");
        std::fs::write(&key, "not really a key").unwrap();

        let config_path = dir.path().join("config");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            "Host jump\n  HostName 192.168.1.100\n  User johndoe\n  Port 2222\n  IdentityFile {}",
            key.display()
        )
        .unwrap();

        let settings = BastionSettings {
            host: Some("jump".to_string()),
            port: Some(2022),
            ssh_config_path: Some(config_path),
            ..Default::default()
        };
        let config = settings.resolve().unwrap().unwrap();
        assert_eq!(config.host, "192.168.1.100");
        assert_eq!(config.username, "johndoe");
        assert_eq!(config.port, 2022);
        assert_eq!(config.private_key.as_deref(), Some(key.as_path()));
    }
}
