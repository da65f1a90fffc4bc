//! Secure secret container with automatic memory zeroing.
//!
//! Bastion passwords and key passphrases are held in [`Secret`], which wraps
//! the value in a `Zeroizing` container and never prints it through `Debug`.

use zeroize::Zeroizing;

/// Maximum number of mask characters emitted for a redacted secret.
pub const MAX_MASK_LEN: usize = 8;

/// Secret string that is wiped from memory when dropped.
///
/// # Example
///
/// ```rust
/// use dbbroker_core::security::Secret;
///
/// let secret = Secret::new("hunter2");
/// assert_eq!(secret.expose(), "hunter2");
/// assert_eq!(secret.masked(), "*******");
/// assert!(!format!("{secret:?}").contains("hunter2"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Returns the secret for handing to a transport or driver.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Checks whether the secret is empty without exposing it.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the redacted rendering of this secret.
    pub fn masked(&self) -> String {
        mask(&self.0)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({})", self.masked())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Masks a secret as `*` characters, capped at [`MAX_MASK_LEN`].
pub fn mask(secret: &str) -> String {
    "*".repeat(secret.chars().count().min(MAX_MASK_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_is_masked() {
        let secret = Secret::new("supersecret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("********"));
    }

    #[test]
    fn test_mask_caps_length() {
        assert_eq!(mask("abc"), "***");
        assert_eq!(mask("a-twenty-char-secret"), "********");
        assert_eq!(mask(""), "");
    }

    #[test]
    fn test_secret_clone_and_expose() {
        let s1 = Secret::from("pass");
        let s2 = s1.clone();
        assert_eq!(s1, s2);
        assert_eq!(s2.expose(), "pass");
        assert!(!s2.is_empty());
    }
}
