//! Credential error types.

use plinth_core::error::PlinthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("cryptography error: {0}")]
    Crypto(String),
}

impl From<AuthError> for PlinthError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::WeakPassword { .. } => PlinthError::Validation {
                message: err.to_string(),
            },
            AuthError::Crypto(msg) => PlinthError::Crypto(msg),
        }
    }
}
