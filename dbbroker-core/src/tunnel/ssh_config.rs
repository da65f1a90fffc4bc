//! SSH client configuration lookup for bastion aliases.
//!
//! Parses an `ssh_config(5)`-formatted file into ordered `Host` blocks and
//! computes the effective directives for one alias using the same rule as
//! the OpenSSH client: blocks are scanned in declaration order and the first
//! value obtained for each directive wins. `IdentityFile` accumulates.
//!
//! Only the directives needed to reach a bastion are interpreted:
//! `HostName`, `Port`, `User`, `IdentityFile`. `ProxyJump` and
//! `ProxyCommand` are recognized so an advisory can be logged, since
//! multi-hop tunnels are not supported.

use crate::config::BastionConfig;
use std::path::{Path, PathBuf};

/// Conventional key files tried, in order, when no `IdentityFile` is usable.
pub const DEFAULT_KEY_FILES: [&str; 4] = ["id_rsa", "id_ed25519", "id_ecdsa", "id_dsa"];

/// Returns `~/.ssh/config` for the current user.
pub fn default_ssh_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("config"))
}

/// Decides whether a host token should be looked up in the SSH config.
///
/// Tokens containing a `.` are treated as domain names and IP literals are
/// recognized by their character set, so both bypass the config file.
///
/// # Example
/// ```rust
/// use dbbroker_core::tunnel::looks_like_alias;
///
/// assert!(looks_like_alias("myserver"));
/// assert!(looks_like_alias("dev-box"));
/// assert!(!looks_like_alias("example.com"));
/// assert!(!looks_like_alias("192.168.1.1"));
/// assert!(!looks_like_alias("::1"));
/// ```
pub fn looks_like_alias(token: &str) -> bool {
    let token = token.trim();
    if token.is_empty() || token.contains('.') {
        return false;
    }
    if token.chars().all(|c| c.is_ascii_digit() || c == ':') {
        return false;
    }
    if token.contains(':') && token.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
        return false;
    }
    true
}

/// Directives computed for one alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostDirectives {
    /// `HostName`
    pub host_name: Option<String>,
    /// `Port`
    pub port: Option<u16>,
    /// `User`
    pub user: Option<String>,
    /// Every `IdentityFile`, in declaration order
    pub identity_files: Vec<String>,
    /// `ProxyJump`
    pub proxy_jump: Option<String>,
    /// `ProxyCommand`
    pub proxy_command: Option<String>,
}

impl HostDirectives {
    /// True when the alias is reached through another hop.
    pub fn uses_proxy(&self) -> bool {
        self.proxy_jump.is_some() || self.proxy_command.is_some()
    }
}

#[derive(Debug, Clone)]
enum BlockKind {
    /// Directives before the first `Host` line
    Global,
    /// `Host` block with its patterns
    Host(Vec<String>),
    /// `Match` block; criteria are not evaluated
    Match,
}

#[derive(Debug, Clone)]
struct HostBlock {
    kind: BlockKind,
    directives: Vec<(String, String)>,
}

impl HostBlock {
    fn applies_to(&self, alias: &str) -> bool {
        match &self.kind {
            BlockKind::Global => true,
            BlockKind::Host(patterns) => host_patterns_match(patterns, alias),
            BlockKind::Match => false,
        }
    }
}

/// Parsed SSH config file.
#[derive(Debug, Clone, Default)]
pub struct SshConfigFile {
    blocks: Vec<HostBlock>,
}

impl SshConfigFile {
    /// Parses config text. Unknown keywords are kept but ignored.
    pub fn parse(content: &str) -> Self {
        let mut blocks = vec![HostBlock {
            kind: BlockKind::Global,
            directives: Vec::new(),
        }];

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((keyword, value)) = split_directive(line) else {
                continue;
            };

            match keyword.as_str() {
                "host" => blocks.push(HostBlock {
                    kind: BlockKind::Host(
                        value
                            .split_whitespace()
                            .map(|p| unquote(p).to_ascii_lowercase())
                            .collect(),
                    ),
                    directives: Vec::new(),
                }),
                "match" => blocks.push(HostBlock {
                    kind: BlockKind::Match,
                    directives: Vec::new(),
                }),
                _ => {
                    if let Some(block) = blocks.last_mut() {
                        block.directives.push((keyword, unquote(&value).to_string()));
                    }
                }
            }
        }

        Self { blocks }
    }

    /// Reads and parses a config file. Returns `None` if it cannot be read.
    pub fn load(path: &Path) -> Option<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Some(Self::parse(&content)),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "SSH config not readable");
                None
            }
        }
    }

    /// True if some `Host` block names this alias (global directives do not count).
    pub fn has_host(&self, alias: &str) -> bool {
        let alias = alias.to_ascii_lowercase();
        self.blocks
            .iter()
            .any(|b| matches!(b.kind, BlockKind::Host(_)) && b.applies_to(&alias))
    }

    /// Computes the effective directives for an alias.
    pub fn compute(&self, alias: &str) -> HostDirectives {
        let lowered = alias.to_ascii_lowercase();
        let mut out = HostDirectives::default();

        for block in self.blocks.iter().filter(|b| b.applies_to(&lowered)) {
            for (keyword, value) in &block.directives {
                match keyword.as_str() {
                    "hostname" if out.host_name.is_none() => {
                        out.host_name = Some(value.replace("%h", alias));
                    }
                    "port" if out.port.is_none() => out.port = value.parse().ok(),
                    "user" if out.user.is_none() => out.user = Some(value.clone()),
                    "identityfile" => out.identity_files.push(value.clone()),
                    "proxyjump" if out.proxy_jump.is_none() => {
                        out.proxy_jump = Some(value.clone());
                    }
                    "proxycommand" if out.proxy_command.is_none() => {
                        out.proxy_command = Some(value.clone());
                    }
                    _ => {}
                }
            }
        }

        out
    }
}

/// Resolves bastion aliases against an SSH config file.
#[derive(Debug, Clone)]
pub struct SshConfigResolver {
    home_dir: Option<PathBuf>,
}

impl Default for SshConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SshConfigResolver {
    /// Resolver using the current user's home directory.
    pub fn new() -> Self {
        Self {
            home_dir: dirs::home_dir(),
        }
    }

    /// Resolver using an explicit home directory for `~` and default keys.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: Some(home_dir.into()),
        }
    }

    /// Looks up `alias` in the config file at `config_path`.
    ///
    /// Returns `None` when the file is absent, no block matches, or the
    /// merged result has no `User`. The result carries no password; the key
    /// is the first existing `IdentityFile`, else the first existing default
    /// key.
    pub fn resolve(&self, alias: &str, config_path: &Path) -> Option<BastionConfig> {
        let file = SshConfigFile::load(config_path)?;
        if !file.has_host(alias) {
            tracing::debug!(alias, "No SSH config block matches alias");
            return None;
        }

        let directives = file.compute(alias);
        if directives.uses_proxy() {
            tracing::warn!(
                alias,
                "SSH config routes this host through ProxyJump/ProxyCommand; \
                 multi-hop tunnels are not supported and the hop will be ignored"
            );
        }

        let Some(username) = directives.user.clone() else {
            tracing::debug!(alias, "SSH config entry has no User directive");
            return None;
        };

        let private_key = self
            .first_existing_identity(&directives.identity_files)
            .or_else(|| self.first_default_key());

        Some(BastionConfig {
            host: directives
                .host_name
                .clone()
                .unwrap_or_else(|| alias.to_string()),
            port: directives.port.unwrap_or(BastionConfig::DEFAULT_PORT),
            username,
            password: None,
            private_key,
            passphrase: None,
        })
    }

    fn first_existing_identity(&self, identity_files: &[String]) -> Option<PathBuf> {
        identity_files
            .iter()
            .map(|f| self.expand_tilde(f))
            .find(|p| p.is_file())
    }

    fn first_default_key(&self) -> Option<PathBuf> {
        let ssh_dir = self.home_dir.as_ref()?.join(".ssh");
        DEFAULT_KEY_FILES
            .iter()
            .map(|name| ssh_dir.join(name))
            .find(|p| p.is_file())
    }

    fn expand_tilde(&self, path: &str) -> PathBuf {
        match (path.strip_prefix('~'), &self.home_dir) {
            (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
                home.join(rest.trim_start_matches('/'))
            }
            _ => PathBuf::from(path),
        }
    }
}

/// Resolves an alias with the current user's home directory.
pub fn resolve_bastion(alias: &str, config_path: &Path) -> Option<BastionConfig> {
    SshConfigResolver::new().resolve(alias, config_path)
}

fn split_directive(line: &str) -> Option<(String, String)> {
    let idx = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let keyword = line[..idx].to_ascii_lowercase();
    let value = line[idx..]
        .trim_start()
        .trim_start_matches('=')
        .trim()
        .to_string();
    if value.is_empty() {
        None
    } else {
        Some((keyword, value))
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn host_patterns_match(patterns: &[String], alias: &str) -> bool {
    let mut matched = false;
    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            if wildcard_match(negated, alias) {
                return false;
            }
        } else if wildcard_match(pattern, alias) {
            matched = true;
        }
    }
    matched
}

/// Glob match supporting `*` (any run) and `?` (one character).
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, matched_to)) = backtrack {
            pi = star + 1;
            ti = matched_to + 1;
            backtrack = Some((star, matched_to + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# global defaults
ServerAliveInterval 30

Host myserver
    HostName 192.168.1.100
    User johndoe
    Port 2222

Host dev-*
    User developer
    IdentityFile ~/.ssh/dev_key

Host dev-box
    HostName dev.internal
    User ignored

Host *
    User fallback
    Port 2200

Host jumped
    ProxyJump gateway
";

    #[test]
    fn test_looks_like_alias() {
        assert!(!looks_like_alias("192.168.1.1"));
        assert!(!looks_like_alias("::1"));
        assert!(!looks_like_alias("fe80::1ff:fe23:4567:890a"));
        assert!(!looks_like_alias("example.com"));
        assert!(!looks_like_alias("12345"));
        assert!(!looks_like_alias(""));
        assert!(looks_like_alias("myserver"));
        assert!(looks_like_alias("dev-box"));
        assert!(looks_like_alias("cafe"));
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("dev-*", "dev-box"));
        assert!(wildcard_match("db?", "db1"));
        assert!(!wildcard_match("db?", "db12"));
        assert!(wildcard_match("*-prod-*", "eu-prod-db"));
        assert!(!wildcard_match("dev-*", "prod-box"));
    }

    #[test]
    fn test_compute_exact_block() {
        let file = SshConfigFile::parse(SAMPLE);
        let d = file.compute("myserver");
        assert_eq!(d.host_name.as_deref(), Some("192.168.1.100"));
        assert_eq!(d.user.as_deref(), Some("johndoe"));
        assert_eq!(d.port, Some(2222));
    }

    #[test]
    fn test_compute_first_value_wins_across_blocks() {
        let file = SshConfigFile::parse(SAMPLE);
        let d = file.compute("dev-box");
        // `dev-*` is declared first, so its User wins over the exact block
        assert_eq!(d.user.as_deref(), Some("developer"));
        assert_eq!(d.host_name.as_deref(), Some("dev.internal"));
        assert_eq!(d.port, Some(2200));
        assert_eq!(d.identity_files, vec!["~/.ssh/dev_key".to_string()]);
    }

    #[test]
    fn test_negated_pattern() {
        let file = SshConfigFile::parse("Host * !secret\n  User ops\n");
        assert!(file.has_host("public"));
        assert!(!file.has_host("secret"));
    }

    #[test]
    fn test_equals_syntax_and_quotes() {
        let file = SshConfigFile::parse("Host=box\nHostName = \"10.0.0.9\"\nUser=ops\n");
        let d = file.compute("box");
        assert_eq!(d.host_name.as_deref(), Some("10.0.0.9"));
        assert_eq!(d.user.as_deref(), Some("ops"));
    }

    #[test]
    fn test_resolve_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "Host myserver\n  HostName 192.168.1.100\n  User johndoe\n  Port 2222\n",
        )
        .unwrap();

        let resolver = SshConfigResolver::with_home(dir.path());
        let config = resolver.resolve("myserver", &path).unwrap();
        assert_eq!(config.host, "192.168.1.100");
        assert_eq!(config.username, "johndoe");
        assert_eq!(config.port, 2222);
        assert!(config.private_key.is_none());
    }

    #[test]
    fn test_resolve_hostname_defaults_to_alias() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "Host bastion\n  User ops\n").unwrap();

        let config = SshConfigResolver::with_home(dir.path())
            .resolve("bastion", &path)
            .unwrap();
        assert_eq!(config.host, "bastion");
        assert_eq!(config.port, 22);
    }

    #[test]
    fn test_resolve_first_existing_identity_file() {
        let dir = tempfile::tempdir().unwrap();
        let ssh_dir = dir.path().join(".ssh");
        std::fs::create_dir_all(&ssh_dir).unwrap();
        std::fs::write(ssh_dir.join("second_key"), "key").unwrap();

        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "Host box\n  User ops\n  IdentityFile ~/.ssh/missing_key\n  IdentityFile ~/.ssh/second_key\n",
        )
        .unwrap();

        let config = SshConfigResolver::with_home(dir.path())
            .resolve("box", &path)
            .unwrap();
        assert_eq!(config.private_key, Some(ssh_dir.join("second_key")));
    }

    #[test]
    fn test_resolve_falls_back_to_default_keys() {
        let dir = tempfile::tempdir().unwrap();
        let ssh_dir = dir.path().join(".ssh");
        std::fs::create_dir_all(&ssh_dir).unwrap();
        std::fs::write(ssh_dir.join("id_ecdsa"), "key").unwrap();
        std::fs::write(ssh_dir.join("id_dsa"), "key").unwrap();

        let path = dir.path().join("config");
        std::fs::write(&path, "Host box\n  User ops\n  IdentityFile ~/.ssh/gone\n").unwrap();

        let config = SshConfigResolver::with_home(dir.path())
            .resolve("box", &path)
            .unwrap();
        assert_eq!(config.private_key, Some(ssh_dir.join("id_ecdsa")));
    }

    #[test]
    fn test_resolve_failures() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SshConfigResolver::with_home(dir.path());

        // Missing file
        assert!(resolver.resolve("box", &dir.path().join("absent")).is_none());

        let path = dir.path().join("config");
        std::fs::write(&path, "Host other\n  User ops\n\nHost jumped\n  ProxyJump gw\n").unwrap();

        // No matching block
        assert!(resolver.resolve("box", &path).is_none());
        // Proxy-only block has no User
        assert!(resolver.resolve("jumped", &path).is_none());
    }
}
