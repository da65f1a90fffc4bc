//! SSH bastion tunnelling.
//!
//! - [`ssh_config`]: resolves host aliases from OpenSSH client config files
//! - [`TunnelSession`]: lifecycle of one local-port forwarding
//! - [`BastionTransport`] / [`BastionLink`]: the encrypted transport seam,
//!   implemented for SSH by [`SshTransport`]

mod session;
mod ssh;
pub mod ssh_config;
mod transport;

pub use session::{TunnelHandle, TunnelRequest, TunnelSession, TunnelStatus};
pub use ssh::{SshLink, SshTransport};
pub use ssh_config::{SshConfigResolver, looks_like_alias, resolve_bastion};
pub use transport::{BastionLink, BastionTransport, ForwardStats};
