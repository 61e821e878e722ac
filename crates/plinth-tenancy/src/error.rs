//! Tenancy error types and conversions.

use plinth_core::error::PlinthError;
use plinth_db::DbError;
use thiserror::Error;

/// Failures raised by provisioning steps and external collaborators.
#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("DNS API error: {0}")]
    Dns(String),

    #[error("certificate authority error: {0}")]
    Acme(String),

    #[error("reverse proxy error: {0}")]
    Proxy(String),

    #[error("generated proxy configuration is invalid: {0}")]
    ProxyConfigInvalid(String),

    #[error("verification probe failed: {0}")]
    Verification(String),

    #[error("invalid tenancy configuration: {0}")]
    Config(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] PlinthError),

    #[error(transparent)]
    Db(#[from] DbError),

    /// A compensating action failed. Only ever logged.
    #[error("cleanup of '{step}' failed: {cause}")]
    CleanupFailed { step: String, cause: String },
}

impl From<plinth_auth::AuthError> for TenancyError {
    fn from(err: plinth_auth::AuthError) -> Self {
        TenancyError::Core(err.into())
    }
}

impl From<TenancyError> for PlinthError {
    fn from(err: TenancyError) -> Self {
        match err {
            TenancyError::Core(inner) => inner,
            TenancyError::Db(inner) => inner.into(),
            other => PlinthError::Internal(other.to_string()),
        }
    }
}

pub type TenancyResult<T> = Result<T, TenancyError>;
