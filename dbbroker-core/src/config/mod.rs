//! Configuration types for the broker.
//!
//! - `BrokerConfig`: read-only mode, row cap, and timeouts
//! - `BastionConfig`: validated bastion endpoint and authentication material
//! - `BastionSettings`: raw, possibly partial tunnel input from flags or env
//!
//! # Security
//! Bastion secrets are held in [`Secret`](crate::security::Secret) and are
//! masked in every `Display` and `Debug` rendering.

mod bastion;
mod broker;

pub use bastion::{BastionAuth, BastionConfig, BastionSettings};
pub use broker::BrokerConfig;
