//! Error types for the Plinth system.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlinthError {
    #[error("no tenant found for host '{host}': {hint}")]
    TenantNotFound { host: String, hint: String },

    #[error("tenant '{domain}' is inactive")]
    TenantInactive { domain: String },

    #[error("tenant '{domain}' is suspended")]
    TenantSuspended { domain: String },

    #[error("trial for tenant '{domain}' has expired")]
    TrialExpired { domain: String },

    #[error("domain already in use: {domain}")]
    DomainExists { domain: String },

    #[error("tenant database unreachable: {0}")]
    DatabaseUnreachable(String),

    #[error("unknown tenant database: {database}")]
    UnknownTenantDatabase { database: String },

    #[error("provisioning step '{step}' failed: {cause}")]
    ProvisioningStepFailed {
        step: String,
        cause: String,
        /// Whether every compensating action ran cleanly.
        cleanup_complete: bool,
    },

    #[error("an operation is already in progress for {key}")]
    ProvisioningInProgress { key: String },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlinthError {
    /// Whether the caller may retry after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlinthError::DatabaseUnreachable(_) | PlinthError::UnknownTenantDatabase { .. }
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PlinthError::Validation {
            message: message.into(),
        }
    }
}

pub type PlinthResult<T> = Result<T, PlinthError>;
