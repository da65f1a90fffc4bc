//! Security utilities for credential protection.
//!
//! This module provides:
//! - `credentials`: zeroizing [`Secret`] container for passwords and passphrases
//! - `connection`: [`ConnectionDescriptor`], the parsed connection string
//! - `redaction`: masking helpers applied to every surfaced descriptor or
//!   bastion configuration
//!
//! # Security Guarantees
//! - Secrets are wiped from memory on drop
//! - Masks are capped at eight characters so secret length is not leaked
//! - Private key paths are shown, since they are not secret material

mod connection;
mod credentials;
mod redaction;

// Re-export public types
pub use connection::ConnectionDescriptor;
pub use credentials::{MAX_MASK_LEN, Secret, mask};
pub use redaction::{redact_bastion_config, redact_database_url};
