//! Credential configuration.

use serde::Deserialize;

/// Configuration for credential hashing and generation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Optional pepper prepended to passwords before Argon2id hashing.
    pub pepper: Option<String>,
    /// Minimum password length for policy enforcement.
    pub min_password_length: usize,
    /// Length of generated temporary passwords (default: 20).
    pub temporary_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            pepper: None,
            min_password_length: 12,
            temporary_password_length: 20,
        }
    }
}
