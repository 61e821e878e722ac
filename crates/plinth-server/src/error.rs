//! Startup errors and the mapping of domain errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use plinth_core::error::PlinthError;
use plinth_db::DbError;
use plinth_tenancy::TenancyError;
use serde_json::json;
use tracing::error;

/// Failures that stop the server from starting or serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Tenancy(#[from] TenancyError),
}

/// Error returned by request handlers and middleware.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Plinth(#[from] PlinthError),

    #[error("missing or invalid admin token")]
    Unauthorized,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let ApiError::Plinth(err) = self else {
            return StatusCode::UNAUTHORIZED;
        };
        match err {
            PlinthError::TenantNotFound { .. } | PlinthError::NotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            PlinthError::TenantInactive { .. } | PlinthError::TenantSuspended { .. } => {
                StatusCode::FORBIDDEN
            }
            PlinthError::TrialExpired { .. } => StatusCode::PAYMENT_REQUIRED,
            PlinthError::DomainExists { .. } | PlinthError::ProvisioningInProgress { .. } => {
                StatusCode::CONFLICT
            }
            PlinthError::DatabaseUnreachable(_)
            | PlinthError::UnknownTenantDatabase { .. }
            | PlinthError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            PlinthError::ProvisioningStepFailed { .. } => StatusCode::BAD_GATEWAY,
            PlinthError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PlinthError::Crypto(_) | PlinthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Plinth(PlinthError::TenantNotFound { host, hint }) => json!({
                "error": self.to_string(),
                "host": host,
                "hint": hint,
            }),
            ApiError::Plinth(PlinthError::ProvisioningStepFailed {
                step,
                cleanup_complete,
                ..
            }) => json!({
                "error": self.to_string(),
                "step": step,
                "cleanup_complete": cleanup_complete,
            }),
            ApiError::Plinth(err) if err.is_retryable() => json!({
                "error": self.to_string(),
                "retryable": true,
            }),
            // Internal details stay in the log.
            ApiError::Plinth(PlinthError::Crypto(_) | PlinthError::Internal(_)) => {
                error!(error = %self, "Request failed");
                json!({ "error": "internal server error" })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
